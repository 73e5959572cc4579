// tripwire/src/state/ledger.rs
//
// Per-(community, actor) sliding-window ledger.
// DashMap = sharded concurrent HashMap — unrelated communities never contend
// on one lock. Each entry's record sequence sits behind its own Mutex.
//
// Lock order is always shard → entry. `update` and `evict_empty` take the
// shard lock first; `for_each_entry` only ever takes entry locks, on Arcs
// cloned out of the map beforehand. Nothing here awaits.
//
// One ledger type per pipeline:
//   ActorLedger<ActionRecord>  — destructive actions (ban/kick/role)
//   ActorLedger<MessageRecord> — message timestamps

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::events::{ActorId, CommunityId};

pub type LedgerKey = (CommunityId, ActorId);

pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Drop every record with `now - timestamp >= window`, keeping the order of
/// the rest. Returns the surviving count.
///
/// Sequences are arrival-ordered, not timestamp-sorted (a delayed feed can
/// deliver an older event after a newer one), so this scans the whole deque
/// instead of popping from the front.
pub fn expire<R: Timestamped>(records: &mut VecDeque<R>, now: DateTime<Utc>, window: Duration) -> usize {
    records.retain(|r| now - r.timestamp() < window);
    records.len()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pruned<R> {
    pub count:     usize,
    pub survivors: Vec<R>,
}

pub struct ActorLedger<R> {
    entries:        DashMap<LedgerKey, Arc<Mutex<VecDeque<R>>>>,
    total_appended: AtomicU64,
}

impl<R: Timestamped + Clone> ActorLedger<R> {
    pub fn new() -> Self {
        Self { entries: DashMap::new(), total_appended: AtomicU64::new(0) }
    }

    /// Append one record, creating the entry on first sight.
    /// Returns the sequence length after the append.
    pub fn append(&self, community: CommunityId, actor: ActorId, record: R) -> usize {
        self.update(community, actor, |records| {
            records.push_back(record);
            records.len()
        })
    }

    /// Run `f` on one actor's sequence under its lock, creating the entry if
    /// absent. The shard lock is held for the duration so a concurrent
    /// `evict_empty` cannot drop the entry mid-update; keep `f` short and
    /// never call back into the ledger from it.
    pub fn update<T>(
        &self,
        community: CommunityId,
        actor:     ActorId,
        f:         impl FnOnce(&mut VecDeque<R>) -> T,
    ) -> T {
        let slot = self.entries.entry((community, actor)).or_default();
        let mut records = slot.lock();
        let before = records.len();
        let out = f(&mut *records);
        if records.len() > before {
            self.total_appended.fetch_add((records.len() - before) as u64, Ordering::Relaxed);
        }
        out
    }

    /// Expire records older than `window` and return what is left.
    /// An absent entry is an empty sequence.
    pub fn prune(&self, community: CommunityId, actor: ActorId, now: DateTime<Utc>, window: Duration) -> Pruned<R> {
        let Some(slot) = self.slot(community, actor) else {
            return Pruned { count: 0, survivors: Vec::new() };
        };
        let mut records = slot.lock();
        let count = expire(&mut *records, now, window);
        Pruned { count, survivors: records.iter().cloned().collect() }
    }

    /// Empty one actor's sequence. Returns how many records were discarded.
    pub fn reset(&self, community: CommunityId, actor: ActorId) -> usize {
        match self.slot(community, actor) {
            Some(slot) => {
                let mut records = slot.lock();
                let n = records.len();
                records.clear();
                n
            }
            None => 0,
        }
    }

    /// Visit every entry present when the call starts. Each visit holds only
    /// that entry's lock. Entries created afterwards are left for the next
    /// pass; entries evicted meanwhile are visited as the empty sequence they
    /// were when evicted.
    pub fn for_each_entry(&self, mut visit: impl FnMut(LedgerKey, &mut VecDeque<R>)) {
        let snapshot: Vec<(LedgerKey, Arc<Mutex<VecDeque<R>>>)> = self.entries
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        for (key, slot) in snapshot {
            let mut records = slot.lock();
            visit(key, &mut *records);
        }
    }

    /// Remove entries whose sequence is empty. Returns how many were removed.
    pub fn evict_empty(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.lock().is_empty());
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            trace!(evicted, "ledger entries evicted");
        }
        evicted
    }

    /// Copy of one actor's current sequence, without expiring anything.
    pub fn records(&self, community: CommunityId, actor: ActorId) -> Vec<R> {
        self.slot(community, actor)
            .map(|slot| slot.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, community: CommunityId, actor: ActorId) -> bool {
        self.entries.contains_key(&(community, actor))
    }

    /// Number of tracked (community, actor) entries.
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn total_appended(&self) -> u64 { self.total_appended.load(Ordering::Relaxed) }

    fn slot(&self, community: CommunityId, actor: ActorId) -> Option<Arc<Mutex<VecDeque<R>>>> {
        self.entries.get(&(community, actor)).map(|s| Arc::clone(s.value()))
    }
}

impl<R: Timestamped + Clone> Default for ActorLedger<R> { fn default() -> Self { Self::new() } }
