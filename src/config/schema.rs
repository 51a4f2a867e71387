//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the presence gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Bearer credential validation and access policy.
    pub auth: AuthConfig,

    /// Threat pattern weights.
    pub threat: ThreatConfig,

    /// Reputation tiers and the cleanup sweep.
    pub reputation: ReputationConfig,

    /// Long-lived connection settings.
    pub connections: ConnectionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Administration API.
    pub admin: AdminConfig,

    /// Statically known users (development and small deployments).
    pub directory: DirectoryConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration for plain HTTP requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Deployment mode selecting the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Production,
    Development,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Production enforces bearer tokens and provenance checks.
    pub mode: DeploymentMode,

    /// Symmetric HMAC key used to verify bearer tokens.
    pub signing_key: String,

    /// Required `iss` claim, if any.
    pub issuer: Option<String>,

    /// Required `aud` claim, if any.
    pub audience: Option<String>,

    /// Allowed clock skew when checking `exp`/`nbf`.
    pub clock_skew_secs: u64,

    /// Claim carrying the numeric user identifier.
    pub user_id_claim: String,

    /// Query parameter accepted as a user id in development mode.
    pub dev_user_param: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Production,
            signing_key: String::new(),
            issuer: None,
            audience: None,
            clock_skew_secs: 60,
            user_id_claim: "sub".to_string(),
            dev_user_param: "userId".to_string(),
        }
    }
}

/// Weights and matchers for request threat scoring.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// SQL-injection-like token in path or query.
    pub sql_injection_weight: u32,

    /// Script injection token in path, query or any header.
    pub xss_weight: u32,

    /// Directory traversal token in the path.
    pub path_traversal_weight: u32,

    /// Known vulnerability scanner in the user agent.
    pub scanner_weight: u32,

    /// Method outside `allowed_methods`.
    pub method_weight: u32,

    /// Methods that never add to the score.
    pub allowed_methods: Vec<String>,

    /// Case-insensitive user agent substrings of known scanners.
    pub scanner_agents: Vec<String>,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            sql_injection_weight: 3,
            xss_weight: 3,
            path_traversal_weight: 4,
            scanner_weight: 5,
            method_weight: 2,
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            scanner_agents: [
                "sqlmap", "nikto", "nmap", "masscan", "acunetix", "nessus", "openvas", "w3af",
                "dirbuster", "gobuster", "wpscan", "zgrab", "nuclei",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Reputation tier thresholds and sweep schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Cumulative score at which requests are throttled.
    pub suspicious_threshold: u64,

    /// Cumulative score at which an identity is blocked for good.
    pub block_threshold: u64,

    /// Delay applied to requests from suspicious identities.
    pub throttle_delay_ms: u64,

    /// Interval between cleanup sweeps.
    pub cleanup_interval_secs: u64,

    /// Records idle for longer than this are evicted.
    pub retention_secs: u64,
}

impl ReputationConfig {
    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            suspicious_threshold: 5,
            block_threshold: 10,
            throttle_delay_ms: 1000,
            cleanup_interval_secs: 15 * 60,
            retention_secs: 24 * 60 * 60,
        }
    }
}

/// Long-lived connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Route accepting connection upgrades.
    pub path: String,

    /// Hard ceiling on a connection's active phase.
    pub max_lifetime_secs: u64,

    /// Maximum concurrently active connections.
    pub max_active: usize,

    /// Reason text sent with the normal-closure frame.
    pub close_reason: String,
}

impl ConnectionConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            max_lifetime_secs: 30 * 60,
            max_active: 10_000,
            close_reason: "Connection closed by server".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human readable or JSON lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Placeholder admin key rejected in production.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Users known to the static directory.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DirectoryConfig {
    pub users: Vec<DirectoryUser>,
}

/// A single directory entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryUser {
    pub id: u64,

    pub display_name: String,

    /// Client identities this user has previously connected from.
    #[serde(default)]
    pub known_addresses: Vec<String>,
}
