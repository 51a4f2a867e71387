//! HTTP middleware.

pub mod threat_guard;

pub use threat_guard::threat_guard;
