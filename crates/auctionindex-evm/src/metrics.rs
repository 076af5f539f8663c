//! Listener counters.

use serde::Serialize;

use auctionindex_core::reconciler::ReconcileStats;

/// Metrics snapshot for a listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenerMetrics {
    pub logs_received: u64,
    pub events_applied: u64,
    pub duplicates: u64,
    pub stale_bids: u64,
    pub rejected_bids: u64,
    pub unknown_events: u64,
    pub decode_errors: u64,
    pub deferred: u64,
    pub unreconciled: u64,
    pub resubscribes: u64,
    pub store_failures: u64,
}

impl ListenerMetrics {
    /// Copy the reconciler-owned counters in.
    pub fn absorb(&mut self, stats: ReconcileStats) {
        self.events_applied = stats.applied;
        self.duplicates = stats.duplicates;
        self.stale_bids = stats.stale;
        self.rejected_bids = stats.not_increasing;
        self.unknown_events = stats.unknown;
        self.deferred = stats.deferred;
        self.unreconciled = stats.unreconciled;
    }
}
