//! Bearer token verification.

use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::config::AuthConfig;
use crate::gateway::rejection::AuthFailure;
use crate::services::UserId;

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// HS256 verifier for the configured signing key.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    user_claim: String,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.clock_skew_secs;
        validation.validate_nbf = true;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(config.signing_key.as_bytes()),
            validation,
            user_claim: config.user_id_claim.clone(),
        }
    }

    /// Validate `token` and return the user id it names.
    pub fn verify(&self, token: &str) -> Result<UserId, AuthFailure> {
        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map_err(|e| classify(e.kind()))?;

        match data.claims.get(&self.user_claim) {
            Some(Value::Number(n)) => n.as_u64().map(UserId).ok_or(AuthFailure::MissingUserClaim),
            Some(Value::String(s)) => s.parse().map_err(|_| AuthFailure::MissingUserClaim),
            _ => Err(AuthFailure::MissingUserClaim),
        }
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("user_claim", &self.user_claim)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

fn classify(kind: &ErrorKind) -> AuthFailure {
    match kind {
        ErrorKind::ExpiredSignature => AuthFailure::Expired,
        ErrorKind::ImmatureSignature => AuthFailure::NotYetValid,
        ErrorKind::InvalidSignature => AuthFailure::BadSignature,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience | ErrorKind::InvalidSubject => {
            AuthFailure::ClaimMismatch
        }
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthFailure::Malformed(format!("missing required claim `{}`", claim))
        }
        other => AuthFailure::Malformed(format!("{:?}", other)),
    }
}
