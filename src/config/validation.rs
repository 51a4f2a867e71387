//! Configuration validation.
//!
//! Serde handles syntax; this module checks the values make sense together.
//! All problems are reported at once rather than stopping at the first.

use crate::config::schema::{DeploymentMode, GatewayConfig, PLACEHOLDER_API_KEY};

/// Minimum HMAC key length accepted in production.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let rep = &config.reputation;
    if rep.suspicious_threshold == 0 {
        errors.push(ValidationError::new(
            "reputation.suspicious_threshold",
            "must be greater than zero",
        ));
    }
    if rep.block_threshold <= rep.suspicious_threshold {
        errors.push(ValidationError::new(
            "reputation.block_threshold",
            format!(
                "must be greater than suspicious_threshold ({})",
                rep.suspicious_threshold
            ),
        ));
    }
    if rep.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new(
            "reputation.cleanup_interval_secs",
            "must be greater than zero",
        ));
    }
    if rep.retention_secs == 0 {
        errors.push(ValidationError::new(
            "reputation.retention_secs",
            "must be greater than zero",
        ));
    }

    if config.connections.max_lifetime_secs == 0 {
        errors.push(ValidationError::new(
            "connections.max_lifetime_secs",
            "must be greater than zero",
        ));
    }
    if config.connections.max_active == 0 {
        errors.push(ValidationError::new(
            "connections.max_active",
            "must be greater than zero",
        ));
    }
    if !config.connections.path.starts_with('/') {
        errors.push(ValidationError::new(
            "connections.path",
            "must start with '/'",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be greater than zero",
        ));
    }

    if config.threat.allowed_methods.is_empty() {
        errors.push(ValidationError::new(
            "threat.allowed_methods",
            "at least one method must be allowed",
        ));
    }

    if config.auth.user_id_claim.trim().is_empty() {
        errors.push(ValidationError::new("auth.user_id_claim", "must not be empty"));
    }
    if config.auth.dev_user_param.trim().is_empty() {
        errors.push(ValidationError::new("auth.dev_user_param", "must not be empty"));
    }

    if config.auth.mode == DeploymentMode::Production {
        if config.auth.signing_key.len() < MIN_SIGNING_KEY_LEN {
            errors.push(ValidationError::new(
                "auth.signing_key",
                format!("must be at least {} bytes in production", MIN_SIGNING_KEY_LEN),
            ));
        }
        if config.admin.enabled && config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new(
                "admin.api_key",
                "placeholder key is not allowed in production",
            ));
        }
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.signing_key = "k".repeat(MIN_SIGNING_KEY_LEN);
        config
    }

    #[test]
    fn defaults_with_key_are_valid() {
        assert!(validate_config(&production_config()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.reputation.block_threshold = 3;
        config.connections.max_lifetime_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"reputation.block_threshold"));
        assert!(fields.contains(&"connections.max_lifetime_secs"));
        assert!(fields.contains(&"auth.signing_key"));
    }

    #[test]
    fn placeholder_admin_key_rejected_in_production() {
        let mut config = production_config();
        config.admin.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "admin.api_key");
    }

    #[test]
    fn development_mode_allows_short_key() {
        let mut config = GatewayConfig::default();
        config.auth.mode = DeploymentMode::Development;
        config.auth.signing_key = "dev".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_dev_user_param_rejected() {
        let mut config = GatewayConfig::default();
        config.auth.mode = DeploymentMode::Development;
        config.auth.dev_user_param = " ".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "auth.dev_user_param");
    }
}
