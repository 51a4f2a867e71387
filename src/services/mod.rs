//! Collaborators the gateway talks to at its boundary.
//!
//! # Data Flow
//! ```text
//! Gatekeeper           → directory.rs     (known address? display name)
//! Lifecycle manager    → presence.rs      (online / offline)
//!                      → notifications.rs (run the connection until it ends)
//! Admin API            → notifications.rs (publish to a user's connections)
//! ```
//!
//! Each collaborator is a trait so deployments can swap the in-memory
//! implementations shipped here for real backends.

pub mod directory;
pub mod notifications;
pub mod presence;

use serde::{Deserialize, Serialize};

pub use directory::{StaticUserDirectory, UserDirectory};
pub use notifications::{DispatchError, HubDispatcher, Notification, NotificationDispatcher, NotificationHub, Termination};
pub use presence::{PresenceRegistry, PresenceService, PresenceStatus};

/// Numeric user identifier carried in bearer tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

/// Failure reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}
