//! Access policy selected once at startup.
//!
//! Everything the gateway relaxes outside production hangs off
//! [`AccessPolicy`]; there are no mode checks anywhere else.

use crate::config::{AuthConfig, DeploymentMode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("development mode is not available in release builds")]
    DevelopmentInReleaseBuild,
}

/// Relaxations granted to development deployments.
///
/// Only obtainable through [`AccessPolicy::from_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevelopmentAccess {
    user_param: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Bearer tokens only; provenance always enforced.
    Strict,
    /// Query-parameter user ids accepted; provenance bypassed.
    Development(DevelopmentAccess),
}

impl AccessPolicy {
    pub fn from_config(config: &AuthConfig) -> Result<Self, PolicyError> {
        match config.mode {
            DeploymentMode::Production => Ok(AccessPolicy::Strict),
            DeploymentMode::Development if cfg!(debug_assertions) => {
                tracing::warn!(
                    user_param = %config.dev_user_param,
                    "Development access policy active: provenance checks disabled"
                );
                Ok(AccessPolicy::Development(DevelopmentAccess {
                    user_param: config.dev_user_param.clone(),
                }))
            }
            DeploymentMode::Development => Err(PolicyError::DevelopmentInReleaseBuild),
        }
    }

    /// Query parameter that may carry a user id when no bearer token is sent.
    pub fn fallback_user_param(&self) -> Option<&str> {
        match self {
            AccessPolicy::Strict => None,
            AccessPolicy::Development(access) => Some(&access.user_param),
        }
    }

    pub fn enforces_provenance(&self) -> bool {
        matches!(self, AccessPolicy::Strict)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccessPolicy::Strict => "strict",
            AccessPolicy::Development(_) => "development",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(mode: DeploymentMode) -> AuthConfig {
        AuthConfig {
            mode,
            ..AuthConfig::default()
        }
    }

    #[test]
    fn production_is_strict() {
        let policy = AccessPolicy::from_config(&auth(DeploymentMode::Production)).unwrap();
        assert_eq!(policy, AccessPolicy::Strict);
        assert!(policy.enforces_provenance());
        assert_eq!(policy.fallback_user_param(), None);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn development_relaxes_checks() {
        let policy = AccessPolicy::from_config(&auth(DeploymentMode::Development)).unwrap();
        assert!(!policy.enforces_provenance());
        assert_eq!(policy.fallback_user_param(), Some("userId"));
        assert_eq!(policy.name(), "development");
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn development_rejected_in_release() {
        assert_eq!(
            AccessPolicy::from_config(&auth(DeploymentMode::Development)),
            Err(PolicyError::DevelopmentInReleaseBuild)
        );
    }
}
