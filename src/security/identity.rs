//! Client identity resolution.
//!
//! The identity is the key every reputation record is bucketed under. Clients
//! behind a proxy are assumed to list the origin client first in
//! `X-Forwarded-For`; otherwise the transport peer address is used.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

const UNKNOWN: &str = "unknown";

/// Canonical client identity string.
///
/// `"unknown"` is a valid bucket, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn unknown() -> Self {
        Self(UNKNOWN.to_string())
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        let ip = ip.to_canonical();
        if ip.is_loopback() {
            Self(format!("{} (loopback)", ip))
        } else {
            Self(ip.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ClientIdentity> for String {
    fn from(identity: ClientIdentity) -> Self {
        identity.0
    }
}

/// Resolve the identity for a request.
///
/// Unparseable forwarded entries are ignored in favour of the peer address.
pub fn resolve_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
    forwarded_origin(headers)
        .or_else(|| peer.map(|addr| addr.ip()))
        .map(ClientIdentity::from_ip)
        .unwrap_or_else(ClientIdentity::unknown)
}

fn forwarded_origin(headers: &HeaderMap) -> Option<IpAddr> {
    let value = headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }
    first
        .parse::<IpAddr>()
        .ok()
        .or_else(|| first.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn prefers_first_forwarded_address() {
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let identity = resolve_identity(&forwarded("203.0.113.7, 10.0.0.1"), Some(peer));
        assert_eq!(identity.as_str(), "203.0.113.7");
    }

    #[test]
    fn forwarded_entry_with_port() {
        let identity = resolve_identity(&forwarded("198.51.100.2:5555"), None);
        assert_eq!(identity.as_str(), "198.51.100.2");
    }

    #[test]
    fn falls_back_to_peer() {
        let peer: SocketAddr = "192.0.2.10:4000".parse().unwrap();
        assert_eq!(resolve_identity(&HeaderMap::new(), Some(peer)).as_str(), "192.0.2.10");

        let garbage = resolve_identity(&forwarded("not-an-ip"), Some(peer));
        assert_eq!(garbage.as_str(), "192.0.2.10");
    }

    #[test]
    fn loopback_is_annotated() {
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(
            resolve_identity(&HeaderMap::new(), Some(peer)).as_str(),
            "127.0.0.1 (loopback)"
        );

        let v6: SocketAddr = "[::1]:9999".parse().unwrap();
        assert_eq!(resolve_identity(&HeaderMap::new(), Some(v6)).as_str(), "::1 (loopback)");
    }

    #[test]
    fn ipv4_mapped_addresses_are_canonical() {
        let peer: SocketAddr = "[::ffff:192.0.2.33]:80".parse().unwrap();
        assert_eq!(resolve_identity(&HeaderMap::new(), Some(peer)).as_str(), "192.0.2.33");

        let mapped_loopback = resolve_identity(&forwarded("::ffff:127.0.0.1"), None);
        assert_eq!(mapped_loopback.as_str(), "127.0.0.1 (loopback)");
    }

    #[test]
    fn unknown_without_any_address() {
        let identity = resolve_identity(&HeaderMap::new(), None);
        assert!(identity.is_unknown());
        assert_eq!(identity.to_string(), "unknown");
    }
}
