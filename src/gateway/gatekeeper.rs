//! Upgrade admission: credential validation and provenance.
//!
//! # Flow
//! ```text
//! Authorization: Bearer <token>  ──verify──▶ user id
//!     (absent, development only: ?userId=<n>)
//!     → provenance: directory.is_known_address(user id, identity)
//!     → display name (directory, falling back to "user-<id>")
//! ```

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::gateway::policy::AccessPolicy;
use crate::gateway::rejection::{AuthFailure, Rejection};
use crate::gateway::token::{bearer_token, TokenVerifier};
use crate::security::identity::ClientIdentity;
use crate::services::{UserDirectory, UserId};

/// Principal admitted for an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedUser {
    pub user_id: UserId,
    pub display_name: String,
}

pub struct Gatekeeper {
    verifier: TokenVerifier,
    policy: AccessPolicy,
    directory: Arc<dyn UserDirectory>,
}

impl Gatekeeper {
    pub fn new(verifier: TokenVerifier, policy: AccessPolicy, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            verifier,
            policy,
            directory,
        }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Admit or reject an upgrade request.
    pub async fn admit(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
        identity: &ClientIdentity,
    ) -> Result<AdmittedUser, Rejection> {
        let user_id = self.authenticate(headers, query).map_err(|failure| {
            tracing::warn!(
                identity = %identity,
                failure = failure.kind(),
                error = %failure,
                "Connection authentication failed"
            );
            Rejection::Authentication(failure)
        })?;

        self.check_provenance(user_id, identity).await?;

        let display_name = match self.directory.display_name(user_id).await {
            Ok(Some(name)) => name,
            Ok(None) => format!("user-{}", user_id),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Display name lookup failed");
                format!("user-{}", user_id)
            }
        };

        Ok(AdmittedUser {
            user_id,
            display_name,
        })
    }

    fn authenticate(&self, headers: &HeaderMap, query: Option<&str>) -> Result<UserId, AuthFailure> {
        if let Some(token) = bearer_token(headers) {
            return self.verifier.verify(token);
        }

        let Some(param) = self.policy.fallback_user_param() else {
            return Err(AuthFailure::MissingCredential);
        };
        let raw = query
            .and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(name, _)| name == param)
                    .map(|(_, value)| value.into_owned())
            })
            .ok_or(AuthFailure::MissingCredential)?;

        let user_id = raw.parse::<UserId>().map_err(|_| AuthFailure::InvalidDevUser)?;
        tracing::warn!(user_id = %user_id, "Accepted unauthenticated development user id");
        Ok(user_id)
    }

    async fn check_provenance(&self, user_id: UserId, identity: &ClientIdentity) -> Result<(), Rejection> {
        if !self.policy.enforces_provenance() {
            tracing::warn!(
                user_id = %user_id,
                identity = %identity,
                policy = self.policy.name(),
                "Provenance check bypassed"
            );
            return Ok(());
        }

        match self.directory.is_known_address(user_id, identity).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(
                    user_id = %user_id,
                    identity = %identity,
                    "Connection from unknown location"
                );
                Err(Rejection::UnknownLocation)
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    identity = %identity,
                    error = %e,
                    "Provenance lookup failed, rejecting"
                );
                Err(Rejection::UnknownLocation)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, DeploymentMode};
    use crate::services::{CollaboratorError, StaticUserDirectory};
    use async_trait::async_trait;
    use axum::http::{header, HeaderValue};
    use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
    use serde_json::json;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    struct BrokenDirectory;

    #[async_trait]
    impl UserDirectory for BrokenDirectory {
        async fn is_known_address(&self, _: UserId, _: &ClientIdentity) -> Result<bool, CollaboratorError> {
            Err(CollaboratorError::Unavailable("directory offline".into()))
        }

        async fn display_name(&self, _: UserId) -> Result<Option<String>, CollaboratorError> {
            Err(CollaboratorError::Unavailable("directory offline".into()))
        }
    }

    fn auth_config(mode: DeploymentMode) -> AuthConfig {
        AuthConfig {
            mode,
            signing_key: KEY.into(),
            ..AuthConfig::default()
        }
    }

    fn gatekeeper(mode: DeploymentMode, directory: Arc<dyn UserDirectory>) -> Gatekeeper {
        let config = auth_config(mode);
        Gatekeeper::new(
            TokenVerifier::new(&config),
            AccessPolicy::from_config(&config).unwrap(),
            directory,
        )
    }

    fn directory() -> Arc<StaticUserDirectory> {
        let directory = StaticUserDirectory::new();
        directory.insert_user(UserId(42), "Grace", &["203.0.113.4".to_string()]);
        Arc::new(directory)
    }

    fn bearer(user: &str) -> HeaderMap {
        let token = encode(
            &Header::default(),
            &json!({ "sub": user, "exp": get_current_timestamp() + 600 }),
            &EncodingKey::from_secret(KEY.as_bytes()),
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn ip(addr: &str) -> ClientIdentity {
        ClientIdentity::from_ip(addr.parse().unwrap())
    }

    #[tokio::test]
    async fn admits_known_user_from_known_address() {
        let gate = gatekeeper(DeploymentMode::Production, directory());
        let admitted = gate.admit(&bearer("42"), None, &ip("203.0.113.4")).await.unwrap();
        assert_eq!(
            admitted,
            AdmittedUser {
                user_id: UserId(42),
                display_name: "Grace".into()
            }
        );
    }

    #[tokio::test]
    async fn valid_token_from_unknown_address_is_forbidden() {
        let gate = gatekeeper(DeploymentMode::Production, directory());
        let rejection = gate.admit(&bearer("42"), None, &ip("198.51.100.77")).await.unwrap_err();
        assert_eq!(rejection, Rejection::UnknownLocation);
        assert_eq!(rejection.public_message(), "Connection from unknown location detected.");
    }

    #[tokio::test]
    async fn missing_credential_in_production() {
        let gate = gatekeeper(DeploymentMode::Production, directory());
        let rejection = gate
            .admit(&HeaderMap::new(), Some("userId=42"), &ip("203.0.113.4"))
            .await
            .unwrap_err();
        assert_eq!(rejection, Rejection::Authentication(AuthFailure::MissingCredential));
        assert_eq!(rejection.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn directory_errors_fail_closed() {
        let gate = gatekeeper(DeploymentMode::Production, Arc::new(BrokenDirectory));
        let rejection = gate.admit(&bearer("42"), None, &ip("203.0.113.4")).await.unwrap_err();
        assert_eq!(rejection, Rejection::UnknownLocation);
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    async fn development_accepts_query_user_and_skips_provenance() {
        let gate = gatekeeper(DeploymentMode::Development, directory());
        let admitted = gate
            .admit(&HeaderMap::new(), Some("foo=1&userId=42"), &ip("198.51.100.77"))
            .await
            .unwrap();
        assert_eq!(admitted.user_id, UserId(42));

        let unnamed = gate
            .admit(&HeaderMap::new(), Some("userId=9"), &ip("198.51.100.77"))
            .await
            .unwrap();
        assert_eq!(unnamed.display_name, "user-9");

        let invalid = gate
            .admit(&HeaderMap::new(), Some("userId=abc"), &ip("198.51.100.77"))
            .await
            .unwrap_err();
        assert_eq!(invalid, Rejection::Authentication(AuthFailure::InvalidDevUser));
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    async fn development_still_validates_presented_tokens() {
        let gate = gatekeeper(DeploymentMode::Development, directory());
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer garbage"));
        let rejection = gate.admit(&headers, Some("userId=42"), &ip("203.0.113.4")).await.unwrap_err();
        assert!(matches!(rejection, Rejection::Authentication(AuthFailure::Malformed(_))));
    }
}
