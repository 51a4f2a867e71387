//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake)
//!     → axum / hyper (HTTP, upgrade)
//!     → connection.rs (capacity slot, connection id, state machine)
//!     → Hand off to the connection lifecycle manager
//! ```

pub mod connection;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
