//! Engine counters.
//!
//! Lock-free counters updated by the registry and the notification engine.
//! [`EngineMetrics::snapshot`] returns a copy suitable for export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::record::Operation;

/// Counters for registry and notification activity.
#[derive(Debug)]
pub struct EngineMetrics {
    started_at: Instant,

    // Mutation metrics
    mutations_seen: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    bulk_skipped: AtomicU64,

    // Notification metrics
    notifications_emitted: AtomicU64,
    subscribers_notified: AtomicU64,
    cascade_hits: AtomicU64,

    // Registry metrics
    subscriptions_added: AtomicU64,
    subscriptions_removed: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub mutations_seen: u64,
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub bulk_skipped: u64,
    pub notifications_emitted: u64,
    pub subscribers_notified: u64,
    pub cascade_hits: u64,
    pub subscriptions_added: u64,
    pub subscriptions_removed: u64,
}

impl MetricsSnapshot {
    /// Subscriptions currently alive according to the counters.
    pub fn active_subscriptions(&self) -> u64 {
        self.subscriptions_added
            .saturating_sub(self.subscriptions_removed)
    }
}

impl EngineMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mutations_seen: AtomicU64::new(0),
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            bulk_skipped: AtomicU64::new(0),
            notifications_emitted: AtomicU64::new(0),
            subscribers_notified: AtomicU64::new(0),
            cascade_hits: AtomicU64::new(0),
            subscriptions_added: AtomicU64::new(0),
            subscriptions_removed: AtomicU64::new(0),
        }
    }

    /// Record a mutation handed to the engine.
    pub fn record_mutation(&self, operation: Operation) {
        self.mutations_seen.fetch_add(1, Ordering::Relaxed);

        match operation {
            Operation::Create => {
                self.creates.fetch_add(1, Ordering::Relaxed);
            }
            Operation::Update => {
                self.updates.fetch_add(1, Ordering::Relaxed);
            }
            Operation::Delete => {
                self.deletes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a bulk mutation that was not fanned out.
    pub fn record_bulk_skipped(&self) {
        self.bulk_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an emitted notification and its audience size.
    pub fn record_notification(&self, subscribers: usize) {
        self.notifications_emitted.fetch_add(1, Ordering::Relaxed);
        self.subscribers_notified
            .fetch_add(subscribers as u64, Ordering::Relaxed);
    }

    /// Record subscribers reached through a cascade.
    pub fn record_cascade(&self, subscribers: usize) {
        self.cascade_hits
            .fetch_add(subscribers as u64, Ordering::Relaxed);
    }

    /// Record a registered subscription.
    pub fn record_subscription_added(&self) {
        self.subscriptions_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a removed subscription.
    pub fn record_subscription_removed(&self) {
        self.subscriptions_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mutations_seen: self.mutations_seen.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            bulk_skipped: self.bulk_skipped.load(Ordering::Relaxed),
            notifications_emitted: self.notifications_emitted.load(Ordering::Relaxed),
            subscribers_notified: self.subscribers_notified.load(Ordering::Relaxed),
            cascade_hits: self.cascade_hits.load(Ordering::Relaxed),
            subscriptions_added: self.subscriptions_added.load(Ordering::Relaxed),
            subscriptions_removed: self.subscriptions_removed.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics handle.
pub type SharedEngineMetrics = Arc<EngineMetrics>;
