//! Request threat scoring.
//!
//! # Responsibilities
//! - Inspect one request (path, query, headers, method) against known attack patterns
//! - Return a non-negative suspicion score
//!
//! # Surfaces
//! ```text
//! path    → SQL injection, script injection, traversal (raw or decoded)
//! query   → SQL injection, script injection
//! headers → script injection (first matching header only), scanner user agent
//! method  → outside the allow-list
//! ```
//!
//! Every (surface, category) pair contributes its weight at most once and the
//! contributions are summed. This is a best-effort heuristic, not a parser;
//! false positives are expected.

use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Uri};
use regex::Regex;
use std::borrow::Cow;

use crate::config::ThreatConfig;

const SQL_INJECTION: &str = r"(?i)(\bunion\b[\s\S]*\bselect\b|\bselect\b[\s\S]+\bfrom\b|\binsert\s+into\b|\bdrop\s+(table|database)\b|\bdelete\s+from\b|\bupdate\s+\w+\s+set\b|'\s*(or|and)\s+'?\w+'?\s*=|\bor\s+1\s*=\s*1\b|;\s*--|/\*[\s\S]*\*/|\bsleep\s*\(|\bbenchmark\s*\(|xp_cmdshell)";

const SCRIPT_INJECTION: &str = r"(?i)(<\s*/?\s*script|javascript\s*:|vbscript\s*:|\bon(error|load|click|mouseover|focus|submit)\s*=|<\s*iframe|document\.cookie|\beval\s*\(|\balert\s*\()";

const PATH_TRAVERSAL: &str = r"(?i)(\.\.[/\\]|\.\.%2f|\.\.%5c|%2e%2e(%2f|%5c|/|\\)|%252e%252e|\.\.%c0%af)";

/// Attack family a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatCategory {
    SqlInjection,
    ScriptInjection,
    PathTraversal,
    ScannerAgent,
    UnusualMethod,
}

impl std::fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ThreatCategory::SqlInjection => "sql_injection",
            ThreatCategory::ScriptInjection => "script_injection",
            ThreatCategory::PathTraversal => "path_traversal",
            ThreatCategory::ScannerAgent => "scanner_agent",
            ThreatCategory::UnusualMethod => "unusual_method",
        };
        f.write_str(name)
    }
}

/// Part of the request a match was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Path,
    Query,
    Headers,
    Method,
}

/// A single pattern hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreatMatch {
    pub category: ThreatCategory,
    pub surface: Surface,
    pub weight: u32,
}

/// Result of scoring one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreatAssessment {
    pub matches: Vec<ThreatMatch>,
}

impl ThreatAssessment {
    pub fn score(&self) -> u32 {
        self.matches.iter().map(|m| m.weight).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn categories(&self) -> Vec<ThreatCategory> {
        self.matches.iter().map(|m| m.category).collect()
    }
}

/// Borrowed view of the request parts the engine inspects.
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
}

impl<'a> RequestView<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self { method, uri, headers }
    }

    pub fn of<B>(request: &'a Request<B>) -> Self {
        Self::new(request.method(), request.uri(), request.headers())
    }
}

/// Compiled matcher for one category.
#[derive(Debug)]
enum Matcher {
    Pattern(Regex),
    Substrings(Vec<String>),
    AllowList(Vec<String>),
}

/// A static (category, matcher, weight) tuple.
#[derive(Debug)]
struct ThreatPattern {
    category: ThreatCategory,
    matcher: Matcher,
    weight: u32,
}

impl ThreatPattern {
    fn hit(&self, surface: Surface) -> ThreatMatch {
        ThreatMatch {
            category: self.category,
            surface,
            weight: self.weight,
        }
    }

    fn matches_text(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Pattern(regex) => regex.is_match(text),
            Matcher::Substrings(needles) => {
                let haystack = text.to_ascii_lowercase();
                needles.iter().any(|needle| haystack.contains(needle.as_str()))
            }
            Matcher::AllowList(allowed) => !allowed.iter().any(|m| m.eq_ignore_ascii_case(text)),
        }
    }
}

/// Stateless scorer compiled once from configuration.
///
/// Safe to share across tasks without synchronization.
#[derive(Debug)]
pub struct ThreatScoringEngine {
    sql_injection: ThreatPattern,
    script_injection: ThreatPattern,
    path_traversal: ThreatPattern,
    scanner_agent: ThreatPattern,
    unusual_method: ThreatPattern,
}

impl ThreatScoringEngine {
    pub fn new(config: &ThreatConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            sql_injection: ThreatPattern {
                category: ThreatCategory::SqlInjection,
                matcher: Matcher::Pattern(Regex::new(SQL_INJECTION)?),
                weight: config.sql_injection_weight,
            },
            script_injection: ThreatPattern {
                category: ThreatCategory::ScriptInjection,
                matcher: Matcher::Pattern(Regex::new(SCRIPT_INJECTION)?),
                weight: config.xss_weight,
            },
            path_traversal: ThreatPattern {
                category: ThreatCategory::PathTraversal,
                matcher: Matcher::Pattern(Regex::new(PATH_TRAVERSAL)?),
                weight: config.path_traversal_weight,
            },
            scanner_agent: ThreatPattern {
                category: ThreatCategory::ScannerAgent,
                matcher: Matcher::Substrings(
                    config
                        .scanner_agents
                        .iter()
                        .map(|agent| agent.to_ascii_lowercase())
                        .filter(|agent| !agent.is_empty())
                        .collect(),
                ),
                weight: config.scanner_weight,
            },
            unusual_method: ThreatPattern {
                category: ThreatCategory::UnusualMethod,
                matcher: Matcher::AllowList(config.allowed_methods.clone()),
                weight: config.method_weight,
            },
        })
    }

    /// Suspicion score for a request.
    pub fn score(&self, request: &RequestView<'_>) -> u32 {
        self.assess(request).score()
    }

    /// Score with the individual matches, for logging.
    pub fn assess(&self, request: &RequestView<'_>) -> ThreatAssessment {
        let mut matches = Vec::new();

        let raw_path = request.uri.path();
        let path = percent_decode(raw_path);
        if self.sql_injection.matches_text(&path) {
            matches.push(self.sql_injection.hit(Surface::Path));
        }
        if self.script_injection.matches_text(&path) {
            matches.push(self.script_injection.hit(Surface::Path));
        }
        if self.path_traversal.matches_text(raw_path) || self.path_traversal.matches_text(&path) {
            matches.push(self.path_traversal.hit(Surface::Path));
        }

        if let Some(query) = request.uri.query().map(decode_query) {
            if self.sql_injection.matches_text(&query) {
                matches.push(self.sql_injection.hit(Surface::Query));
            }
            if self.script_injection.matches_text(&query) {
                matches.push(self.script_injection.hit(Surface::Query));
            }
        }

        // Values with obs-text bytes are scanned lossily rather than skipped.
        let script_header = request
            .headers
            .values()
            .any(|value| self.script_injection.matches_text(&header_text(value)));
        if script_header {
            matches.push(self.script_injection.hit(Surface::Headers));
        }

        let scanner = request
            .headers
            .get(header::USER_AGENT)
            .is_some_and(|ua| self.scanner_agent.matches_text(&header_text(ua)));
        if scanner {
            matches.push(self.scanner_agent.hit(Surface::Headers));
        }

        if self.unusual_method.matches_text(request.method.as_str()) {
            matches.push(self.unusual_method.hit(Surface::Method));
        }

        ThreatAssessment { matches }
    }
}

fn header_text(value: &HeaderValue) -> Cow<'_, str> {
    String::from_utf8_lossy(value.as_bytes())
}

fn decode_query(query: &str) -> String {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| {
            if value.is_empty() {
                key.into_owned()
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Decode `%XX` escapes; malformed escapes are kept verbatim.
fn percent_decode(input: &str) -> Cow<'_, str> {
    if !input.contains('%') {
        return Cow::Borrowed(input);
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = |b: u8| (b as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ThreatScoringEngine {
        ThreatScoringEngine::new(&ThreatConfig::default()).unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<()> {
        Request::builder().method(method).uri(uri).body(()).unwrap()
    }

    fn score(req: &Request<()>) -> u32 {
        engine().score(&RequestView::of(req))
    }

    #[test]
    fn clean_request_scores_zero() {
        let mut req = request("GET", "/api/notifications?page=2&sort=desc");
        req.headers_mut()
            .insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        assert_eq!(score(&req), 0);
    }

    #[test]
    fn encoded_traversal_in_path() {
        let req = request("GET", "/.../..%2f..%2fetc/passwd");
        let assessment = engine().assess(&RequestView::of(&req));
        assert_eq!(assessment.categories(), vec![ThreatCategory::PathTraversal]);
        assert_eq!(assessment.score(), 4);
    }

    #[test]
    fn plain_traversal_in_path() {
        assert_eq!(score(&request("GET", "/static/../../secret")), 4);
    }

    #[test]
    fn sql_in_path_and_script_in_query_accumulate() {
        let req = request(
            "GET",
            "/api/items%20union%20select%20name%20from%20users?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E",
        );
        assert_eq!(score(&req), 6);
    }

    #[test]
    fn sql_tautology_in_query() {
        let req = request("GET", "/login?user=admin%27%20OR%20%271%27%3D%271");
        let assessment = engine().assess(&RequestView::of(&req));
        assert_eq!(assessment.categories(), vec![ThreatCategory::SqlInjection]);
        assert_eq!(assessment.matches[0].surface, Surface::Query);
        assert_eq!(assessment.score(), 3);
    }

    #[test]
    fn header_scan_counts_once() {
        let mut req = request("GET", "/");
        req.headers_mut()
            .insert(header::REFERER, HeaderValue::from_static("javascript:alert(1)"));
        req.headers_mut()
            .insert("x-note", HeaderValue::from_static("<script>steal()</script>"));
        assert_eq!(score(&req), 3);
    }

    #[test]
    fn scanner_user_agent() {
        let mut req = request("GET", "/");
        req.headers_mut()
            .insert(header::USER_AGENT, HeaderValue::from_static("sqlmap/1.7.2#stable"));
        assert_eq!(score(&req), 5);
    }

    #[test]
    fn non_ascii_header_bytes_do_not_hide_matches() {
        let mut plain = request("GET", "/");
        plain
            .headers_mut()
            .insert(header::USER_AGENT, HeaderValue::from_static("sqlmap/1.7"));
        plain
            .headers_mut()
            .insert("x-note", HeaderValue::from_static("<script>x()</script>"));

        let mut obs_text = request("GET", "/");
        obs_text
            .headers_mut()
            .insert(header::USER_AGENT, HeaderValue::from_bytes(b"sqlmap/1.7\xe9").unwrap());
        obs_text
            .headers_mut()
            .insert("x-note", HeaderValue::from_bytes(b"<script>x()</script>\xe9").unwrap());
        assert!(obs_text.headers()["x-note"].to_str().is_err());

        assert_eq!(score(&plain), 8);
        assert_eq!(score(&obs_text), 8);
    }

    #[test]
    fn unusual_method() {
        assert_eq!(score(&request("PATCH", "/")), 2);
        assert_eq!(score(&request("options", "/")), 0);
        assert_eq!(score(&request("TRACE", "/")), 2);
    }

    #[test]
    fn scoring_is_deterministic() {
        let engine = engine();
        let mut req = request("PROPFIND", "/a/../b?id=1%20union%20select%20pw%20from%20t");
        req.headers_mut()
            .insert(header::USER_AGENT, HeaderValue::from_static("Nikto/2.5"));
        let view = RequestView::of(&req);
        let first = engine.score(&view);
        assert_eq!(first, 4 + 3 + 5 + 2);
        for _ in 0..10 {
            assert_eq!(engine.score(&view), first);
        }
    }

    #[test]
    fn custom_weights_apply() {
        let config = ThreatConfig {
            method_weight: 1,
            ..ThreatConfig::default()
        };
        let engine = ThreatScoringEngine::new(&config).unwrap();
        let req = request("PATCH", "/");
        assert_eq!(engine.score(&RequestView::of(&req)), 1);
    }

    #[test]
    fn percent_decode_handles_malformed_escapes() {
        assert_eq!(percent_decode("/a%2Fb"), "/a/b");
        assert_eq!(percent_decode("/100%"), "/100%");
        assert_eq!(percent_decode("/%zz%4"), "/%zz%4");
        assert_eq!(percent_decode("/plain"), "/plain");
    }
}
