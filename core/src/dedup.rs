// Deduplication cache — bounded, time-expiring set of seen message identities
//
// Keyed by (sender_id, message_id), which is globally stable across hops.
// Eviction is strict FIFO by insertion order, never by last access, so
// memory stays deterministically bounded regardless of query patterns.

use crate::wire::SenderId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

type Key = (SenderId, i64);

struct DedupInner {
    /// Seen identities mapped to their insertion time.
    entries: HashMap<Key, Instant>,
    /// Insertion-order queue, stamped with the insertion time. A key
    /// that expired and was re-inserted leaves a stale slot behind;
    /// eviction only honors a slot whose stamp still matches the map,
    /// so the stale slot can never evict the fresh entry.
    order: VecDeque<(Key, Instant)>,
}

/// Bounded message-identity cache shared by all forwarding paths.
///
/// Every operation is atomic with respect to concurrent callers; one
/// inbound byte stream per connected peer may query and insert at once.
pub struct DedupCache {
    inner: Mutex<DedupInner>,
    capacity: usize,
    expiry: Duration,
}

impl DedupCache {
    pub fn new(capacity: usize, expiry: Duration) -> Self {
        Self {
            inner: Mutex::new(DedupInner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
            expiry,
        }
    }

    /// Has this message already been processed?
    ///
    /// An entry past the expiration window is purged on read and
    /// reported absent, even if no sweep has run.
    pub fn contains(&self, sender: SenderId, message_id: i64) -> bool {
        let mut inner = self.inner.lock();
        let key = (sender, message_id);
        match inner.entries.get(&key) {
            Some(inserted) if inserted.elapsed() <= self.expiry => true,
            Some(_) => {
                inner.entries.remove(&key);
                false
            }
            None => false,
        }
    }

    /// Record a message identity. Returns `false` without mutating
    /// anything when the identity is already present and unexpired;
    /// otherwise evicts the oldest surviving entry if at capacity,
    /// inserts, and returns `true`.
    pub fn insert(&self, sender: SenderId, message_id: i64) -> bool {
        let mut inner = self.inner.lock();
        let key = (sender, message_id);

        match inner.entries.get(&key) {
            Some(inserted) if inserted.elapsed() <= self.expiry => return false,
            Some(_) => {
                // Expired duplicate: treat as unseen.
                inner.entries.remove(&key);
            }
            None => {}
        }

        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                // Skip stale slots: expired away, or superseded by a
                // re-insert of the same key.
                Some((old, stamp)) => {
                    if inner.entries.get(&old) == Some(&stamp) {
                        inner.entries.remove(&old);
                        debug!(sender = %old.0, message_id = old.1, "dedup cache evicted oldest entry");
                    }
                }
                None => break,
            }
        }

        let now = Instant::now();
        inner.entries.insert(key, now);
        inner.order.push_back((key, now));
        true
    }

    /// Batch sweep of expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let DedupInner { entries, order } = &mut *inner;
        let before = entries.len();
        entries.retain(|_, inserted| inserted.elapsed() <= self.expiry);
        order.retain(|(key, stamp)| entries.get(key) == Some(stamp));
        before - entries.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
