//! Connection identity, state machine and active-connection accounting.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Enforce the ceiling on concurrently active connections
//! - Let shutdown wait until every connection has finished teardown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::observability::metrics;

/// Unique, opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0.simple())
    }
}

/// Connection lifecycle.
///
/// ```text
/// Accepted → Active → Closing → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade accepted, handler not yet running.
    Accepted,
    /// Dispatcher owns the channel.
    Active,
    /// Teardown in progress.
    Closing,
    /// Teardown finished.
    Closed,
}

/// Counts active connections and enforces `max_active`.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    max_active: u64,
}

impl ConnectionTracker {
    pub fn new(max_active: usize) -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            max_active: max_active as u64,
        }
    }

    /// Reserve a slot. Returns `None` at capacity.
    ///
    /// The slot is released when the guard is dropped.
    pub fn try_track(&self) -> Option<ConnectionGuard> {
        let mut current = self.active_count.load(Ordering::SeqCst);
        loop {
            if current >= self.max_active {
                return None;
            }
            match self.active_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        metrics::set_active_connections(current + 1);
        Some(ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
        })
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or the timeout elapses.
    ///
    /// Returns true if every connection finished.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

/// Holds one connection slot.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(remaining);
    }
}
