//! Caller-visible rejections.
//!
//! Detail stays in the logs; callers only ever see a status code and a short
//! fixed body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub const BODY_AUTH_REQUIRED: &str = "Authentication required.";
pub const BODY_AUTH_FAILED: &str = "Authentication failed.";
pub const BODY_BLOCKED: &str = "Access denied due to suspicious activity.";
pub const BODY_UNKNOWN_LOCATION: &str = "Connection from unknown location detected.";
pub const BODY_AT_CAPACITY: &str = "Connection capacity reached.";

/// Why a credential was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("no credential presented")]
    MissingCredential,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("bad token signature")]
    BadSignature,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token issuer or audience mismatch")]
    ClaimMismatch,

    #[error("token carries no usable user id claim")]
    MissingUserClaim,

    #[error("invalid development user id")]
    InvalidDevUser,
}

impl AuthFailure {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredential => "missing",
            AuthFailure::Expired => "expired",
            AuthFailure::NotYetValid => "not_yet_valid",
            AuthFailure::BadSignature => "bad_signature",
            AuthFailure::Malformed(_) => "malformed",
            AuthFailure::ClaimMismatch => "claim_mismatch",
            AuthFailure::MissingUserClaim => "missing_user_claim",
            AuthFailure::InvalidDevUser => "invalid_dev_user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("connection from unknown location")]
    UnknownLocation,

    #[error("client blocked")]
    Blocked,

    #[error("connection capacity reached")]
    AtCapacity,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Authentication(_) => StatusCode::UNAUTHORIZED,
            Rejection::UnknownLocation | Rejection::Blocked => StatusCode::FORBIDDEN,
            Rejection::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            Rejection::Authentication(AuthFailure::MissingCredential) => BODY_AUTH_REQUIRED,
            Rejection::Authentication(_) => BODY_AUTH_FAILED,
            Rejection::UnknownLocation => BODY_UNKNOWN_LOCATION,
            Rejection::Blocked => BODY_BLOCKED,
            Rejection::AtCapacity => BODY_AT_CAPACITY,
        }
    }

    /// Label for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Authentication(_) => "authentication",
            Rejection::UnknownLocation => "unknown_location",
            Rejection::Blocked => "blocked",
            Rejection::AtCapacity => "capacity",
        }
    }
}

impl From<AuthFailure> for Rejection {
    fn from(failure: AuthFailure) -> Self {
        Rejection::Authentication(failure)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failures_share_one_public_outcome() {
        for failure in [
            AuthFailure::Expired,
            AuthFailure::BadSignature,
            AuthFailure::Malformed("garbage".into()),
            AuthFailure::MissingUserClaim,
        ] {
            let rejection = Rejection::from(failure);
            assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(rejection.public_message(), BODY_AUTH_FAILED);
        }
    }

    #[test]
    fn reasons_are_not_echoed() {
        let rejection = Rejection::from(AuthFailure::Malformed("InvalidBase64 at 17".into()));
        assert!(!rejection.public_message().contains("Base64"));
    }

    #[test]
    fn forbidden_bodies() {
        assert_eq!(Rejection::Blocked.status(), StatusCode::FORBIDDEN);
        assert_eq!(Rejection::Blocked.public_message(), "Access denied due to suspicious activity.");
        assert_eq!(Rejection::UnknownLocation.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            Rejection::UnknownLocation.public_message(),
            "Connection from unknown location detected."
        );
        assert_eq!(Rejection::AtCapacity.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
