//! Request threat protection.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (X-Forwarded-For or peer address → ClientIdentity)
//!     → reputation.rs (blocked? score via threat.rs, accumulate, pick tier)
//!     → reject (403) / throttle / continue
//! ```
//!
//! # Design Decisions
//! - Scoring is a heuristic signal, tuned from configuration
//! - Blocking is permanent until an operator unblocks the identity
//! - State is per process and in memory only

pub mod identity;
pub mod reputation;
pub mod threat;

pub use identity::{resolve_identity, ClientIdentity};
pub use reputation::{ReputationTracker, Tier, Verdict};
pub use threat::{RequestView, ThreatScoringEngine};
