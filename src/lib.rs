//! Adaptive connection security gateway.
//!
//! Authenticates and manages long-lived WebSocket connections used for
//! presence and notification delivery, while scoring every inbound request
//! and throttling or blocking abusive clients.

pub mod admin;
pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod services;

pub use config::schema::GatewayConfig;
pub use http::{AppState, Collaborators, GatewayServer};
pub use lifecycle::Shutdown;
