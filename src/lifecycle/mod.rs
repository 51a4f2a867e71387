//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Build collaborators → Start sweeper → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Cancel connections → Teardown → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One cancellation token tree: every task and connection hangs off it
//! - Connections run their own teardown when cancelled

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
