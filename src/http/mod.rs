//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → middleware/threat_guard.rs (identity, scoring, tier response)
//!     → websocket.rs (admission and upgrade) | /health
//! ```

pub mod middleware;
pub mod server;
pub mod websocket;

pub use server::{AppState, Collaborators, GatewayServer, ServerError};
