// tripwire/src/engine/stats.rs
//
// Engine counters. Relaxed atomics bumped on the hot path, read as a
// snapshot by the periodic stats line.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct EngineStats {
    pub events_observed:        AtomicU64,
    pub messages_filtered:      AtomicU64,
    pub mitigations_dispatched: AtomicU64,
    pub dispatch_failures:      AtomicU64,
    pub sweeps_completed:       AtomicU64,
    pub feed_rejected:          AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub events_observed:        u64,
    pub messages_filtered:      u64,
    pub mitigations_dispatched: u64,
    pub dispatch_failures:      u64,
    pub sweeps_completed:       u64,
    /// Feed lines that did not parse as an event.
    pub feed_rejected:          u64,
    /// Live (community, actor) entries in the destructive-action ledger.
    pub action_entries:         usize,
    /// Live (community, author) entries in the message ledger.
    pub message_entries:        usize,
}

impl EngineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, action_entries: usize, message_entries: usize) -> StatsSnapshot {
        StatsSnapshot {
            events_observed:        self.events_observed.load(Ordering::Relaxed),
            messages_filtered:      self.messages_filtered.load(Ordering::Relaxed),
            mitigations_dispatched: self.mitigations_dispatched.load(Ordering::Relaxed),
            dispatch_failures:      self.dispatch_failures.load(Ordering::Relaxed),
            sweeps_completed:       self.sweeps_completed.load(Ordering::Relaxed),
            feed_rejected:          self.feed_rejected.load(Ordering::Relaxed),
            action_entries,
            message_entries,
        }
    }
}
