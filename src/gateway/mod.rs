//! Connection gateway: admission and lifetime of long-lived connections.
//!
//! # Data Flow
//! ```text
//! Upgrade request (already past the threat guard)
//!     → gatekeeper.rs (bearer token or development fallback, provenance)
//!     → rejection.rs (401 / 403 / 503 on failure)
//!     → descriptor.rs (connection id, user, identity, user agent)
//!     → lifecycle.rs (dispatcher under a lifetime bound, guaranteed teardown)
//!     → channel.rs (WebSocket behind the Channel trait)
//! ```

pub mod channel;
pub mod descriptor;
pub mod gatekeeper;
pub mod lifecycle;
pub mod policy;
pub mod rejection;
pub mod token;

pub use channel::{Channel, ChannelError, WsChannel};
pub use descriptor::ConnectionDescriptor;
pub use gatekeeper::{AdmittedUser, Gatekeeper};
pub use lifecycle::{ConnectionManager, ConnectionOutcome, NORMAL_CLOSURE};
pub use policy::{AccessPolicy, PolicyError};
pub use rejection::{AuthFailure, Rejection};
pub use token::TokenVerifier;
