//! Per-client reputation tracking with tiered responses.
//!
//! # Tiers
//! ```text
//! tracked    (score <  suspicious)          → allow
//! suspicious (suspicious <= score < block)  → allow after a fixed delay
//! blocked    (score >= block)               → reject, permanently
//! ```
//!
//! Scores only grow between sweeps and there is no automatic demotion. Blocked
//! identities stay blocked until an operator calls [`ReputationTracker::unblock`]
//! or the process restarts.
//!
//! # Concurrency
//! Records live in a `DashMap`; each request mutates its record under the
//! shard lock for the duration of a few field updates only. The throttle delay
//! is applied by the caller after the verdict is returned, never under a lock.

use arc_swap::ArcSwap;
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ReputationConfig, ThreatConfig};
use crate::observability::metrics;
use crate::security::identity::ClientIdentity;
use crate::security::threat::{RequestView, ThreatScoringEngine};

/// Reputation tier derived from the cumulative score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tracked,
    Suspicious,
    Blocked,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tracked => "tracked",
            Tier::Suspicious => "suspicious",
            Tier::Blocked => "blocked",
        }
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Identity was already in the blocked set.
    AlreadyBlocked,
    /// This request pushed the cumulative score over the block threshold.
    ThresholdCrossed { cumulative: u64 },
}

/// Outcome of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow { score: u32 },
    Throttle { score: u32, delay: Duration },
    Reject(BlockReason),
}

/// Reputation record for one identity.
#[derive(Debug, Clone)]
pub struct ClientReputation {
    pub identity: String,
    pub request_count: u64,
    pub suspicion_score: u64,
    pub first_seen: Instant,
    pub last_request: Instant,
    pub last_suspicious: Option<Instant>,
}

impl ClientReputation {
    fn new(identity: &str, now: Instant) -> Self {
        Self {
            identity: identity.to_string(),
            request_count: 0,
            suspicion_score: 0,
            first_seen: now,
            last_request: now,
            last_suspicious: None,
        }
    }

    /// Both the last request and the last suspicious activity are older than `retention`.
    pub fn is_stale(&self, now: Instant, retention: Duration) -> bool {
        let idle = now.saturating_duration_since(self.last_request) > retention;
        let quiet = self
            .last_suspicious
            .map_or(true, |at| now.saturating_duration_since(at) > retention);
        idle && quiet
    }
}

/// Serializable view of a record for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ReputationSnapshot {
    pub identity: String,
    pub tier: Tier,
    pub request_count: u64,
    pub suspicion_score: u64,
    pub first_seen_secs_ago: u64,
    pub last_request_secs_ago: u64,
    pub last_suspicious_secs_ago: Option<u64>,
}

/// Shared reputation state for one gateway instance.
pub struct ReputationTracker {
    records: DashMap<String, ClientReputation>,
    blocked: DashSet<String>,
    engine: ArcSwap<ThreatScoringEngine>,
    settings: ArcSwap<ReputationConfig>,
    #[cfg(test)]
    sweep_faults: std::sync::atomic::AtomicUsize,
}

impl ReputationTracker {
    pub fn new(engine: ThreatScoringEngine, settings: ReputationConfig) -> Self {
        Self {
            records: DashMap::new(),
            blocked: DashSet::new(),
            engine: ArcSwap::from_pointee(engine),
            settings: ArcSwap::from_pointee(settings),
            #[cfg(test)]
            sweep_faults: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn from_config(threat: &ThreatConfig, settings: &ReputationConfig) -> Result<Self, regex::Error> {
        Ok(Self::new(ThreatScoringEngine::new(threat)?, settings.clone()))
    }

    /// Swap in new weights and thresholds. Existing records are kept.
    pub fn reconfigure(&self, threat: &ThreatConfig, settings: &ReputationConfig) -> Result<(), regex::Error> {
        let engine = ThreatScoringEngine::new(threat)?;
        self.engine.store(Arc::new(engine));
        self.settings.store(Arc::new(settings.clone()));
        tracing::info!(
            suspicious_threshold = settings.suspicious_threshold,
            block_threshold = settings.block_threshold,
            "Reputation policy reconfigured"
        );
        Ok(())
    }

    pub fn settings(&self) -> Arc<ReputationConfig> {
        self.settings.load_full()
    }

    /// Score a request and update the identity's record.
    pub fn evaluate(&self, identity: &ClientIdentity, request: &RequestView<'_>) -> Verdict {
        let key = identity.as_str();
        if self.blocked.contains(key) {
            metrics::record_verdict(Tier::Blocked.as_str());
            return Verdict::Reject(BlockReason::AlreadyBlocked);
        }

        let settings = self.settings.load();
        let assessment = self.engine.load().assess(request);
        let score = assessment.score();
        let now = Instant::now();

        let cumulative = {
            let mut record = self
                .records
                .entry(key.to_string())
                .or_insert_with(|| ClientReputation::new(key, now));
            record.suspicion_score = record.suspicion_score.saturating_add(u64::from(score));
            if score > 0 {
                record.last_suspicious = Some(now);
            }
            record.request_count += 1;
            record.last_request = now;
            record.suspicion_score
        };

        if !assessment.is_clean() {
            tracing::debug!(
                identity = %identity,
                score,
                cumulative,
                categories = ?assessment.categories(),
                path = %request.uri.path(),
                "Suspicious request content"
            );
        }

        if cumulative >= settings.block_threshold {
            if self.blocked.insert(key.to_string()) {
                tracing::warn!(identity = %identity, cumulative, "Client blocked");
                metrics::set_blocked_identities(self.blocked.len());
            }
            metrics::record_verdict(Tier::Blocked.as_str());
            Verdict::Reject(BlockReason::ThresholdCrossed { cumulative })
        } else if cumulative >= settings.suspicious_threshold {
            metrics::record_verdict(Tier::Suspicious.as_str());
            Verdict::Throttle {
                score,
                delay: settings.throttle_delay(),
            }
        } else {
            metrics::record_verdict(Tier::Tracked.as_str());
            Verdict::Allow { score }
        }
    }

    pub fn is_blocked(&self, identity: &str) -> bool {
        self.blocked.contains(identity)
    }

    pub fn tier_of(&self, identity: &str) -> Option<Tier> {
        if self.blocked.contains(identity) {
            return Some(Tier::Blocked);
        }
        let settings = self.settings.load();
        self.records
            .get(identity)
            .map(|record| tier_for(record.suspicion_score, &settings))
    }

    pub fn record(&self, identity: &str) -> Option<ClientReputation> {
        self.records.get(identity).map(|r| r.value().clone())
    }

    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn blocked_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.blocked.iter().map(|i| i.key().clone()).collect();
        identities.sort();
        identities
    }

    pub fn snapshot(&self) -> Vec<ReputationSnapshot> {
        let now = Instant::now();
        let settings = self.settings.load();
        let mut snapshot: Vec<ReputationSnapshot> = self
            .records
            .iter()
            .map(|entry| {
                let record = entry.value();
                let tier = if self.blocked.contains(entry.key()) {
                    Tier::Blocked
                } else {
                    tier_for(record.suspicion_score, &settings)
                };
                ReputationSnapshot {
                    identity: record.identity.clone(),
                    tier,
                    request_count: record.request_count,
                    suspicion_score: record.suspicion_score,
                    first_seen_secs_ago: now.saturating_duration_since(record.first_seen).as_secs(),
                    last_request_secs_ago: now.saturating_duration_since(record.last_request).as_secs(),
                    last_suspicious_secs_ago: record
                        .last_suspicious
                        .map(|at| now.saturating_duration_since(at).as_secs()),
                }
            })
            .collect();
        snapshot.sort_by(|a, b| b.suspicion_score.cmp(&a.suspicion_score));
        snapshot
    }

    /// Release a blocked identity and reset its record.
    ///
    /// Returns false if the identity was not blocked.
    pub fn unblock(&self, identity: &str) -> bool {
        if self.blocked.remove(identity).is_none() {
            return false;
        }
        self.records.remove(identity);
        metrics::set_blocked_identities(self.blocked.len());
        tracing::warn!(identity = %identity, "Client unblocked by operator");
        true
    }

    /// Evict records idle for longer than the retention window.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        #[cfg(test)]
        self.take_sweep_fault();

        let retention = self.settings.load().retention();
        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_stale(now, retention))
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .iter()
            .filter(|key| {
                // Re-checked under the shard lock: a request may have touched it since.
                self.records
                    .remove_if(key.as_str(), |_, record| record.is_stale(now, retention))
                    .is_some()
            })
            .count()
    }

    fn run_sweep_cycle(&self) {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.sweep())) {
            Ok(evicted) => {
                metrics::record_sweep(evicted, self.records.len());
                if evicted > 0 {
                    tracing::info!(evicted, remaining = self.records.len(), "Reputation sweep finished");
                } else {
                    tracing::debug!(remaining = self.records.len(), "Reputation sweep finished");
                }
            }
            Err(_) => {
                tracing::error!("Reputation sweep panicked; keeping schedule");
            }
        }
    }

    /// Start the periodic cleanup sweep. Stops when `shutdown` is cancelled.
    pub fn start_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let interval = tracker.settings.load().cleanup_interval();
            tracing::info!(interval_secs = interval.as_secs(), "Reputation sweeper starting");

            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracker.run_sweep_cycle();
                    }
                    _ = shutdown.cancelled() => {
                        tracing::info!("Reputation sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
impl ReputationTracker {
    /// Make the next `count` sweeps panic before touching any record.
    fn inject_sweep_faults(&self, count: usize) {
        self.sweep_faults
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    fn take_sweep_fault(&self) {
        use std::sync::atomic::Ordering;
        let pending = self
            .sweep_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending {
            panic!("injected sweep fault");
        }
    }
}

fn tier_for(score: u64, settings: &ReputationConfig) -> Tier {
    if score >= settings.block_threshold {
        Tier::Blocked
    } else if score >= settings.suspicious_threshold {
        Tier::Suspicious
    } else {
        Tier::Tracked
    }
}
