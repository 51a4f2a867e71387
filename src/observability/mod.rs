//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON lines for aggregation)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Identity, user id and connection id are logged as fields, never in messages
//! - Caller-facing responses stay terse; the detail lives here
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
