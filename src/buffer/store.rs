//! Key-sharded buffer store.
//!
//! The store is the only shared structure in the crate. Access to a buffer
//! happens under its shard mutex, giving single-writer semantics per key
//! while unrelated keys on other shards proceed in parallel. Epoch seeds
//! for closed keys are retained so that reuse of a key always produces a
//! strictly larger epoch.

use crate::buffer::key::BufferKey;
use crate::buffer::record::{AudioBuffer, BufferState};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Shard {
    live: HashMap<BufferKey, AudioBuffer>,
    /// Last epoch of keys whose buffer was closed and removed.
    retired: HashMap<BufferKey, RetiredEpoch>,
}

#[derive(Debug, Clone, Copy)]
struct RetiredEpoch {
    epoch: u64,
    retired_at_ms: u64,
}

/// Outcome of looking up a buffer for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// An existing live buffer was found.
    Existing,
    /// A buffer was created for a key never seen (or long forgotten).
    Created,
    /// The stored record was closed; a fresh buffer with a bumped epoch
    /// replaced it.
    RolledOver,
}

/// Sharded map of per-key audio buffers.
#[derive(Debug)]
pub struct BufferStore {
    shards: Vec<Mutex<Shard>>,
}

impl BufferStore {
    /// Creates a store with the given number of mutex shards.
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Self { shards }
    }

    fn shard_for(&self, key: &BufferKey) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Runs `f` against the live buffer for `key`, creating it (or rolling
    /// the epoch over) as needed.
    ///
    /// The buffer is mutated in place under the shard lock; if `f` leaves it
    /// in `Closed` state the record is removed and its epoch retired before
    /// the lock is released.
    pub fn with_buffer<R>(
        &self,
        key: &BufferKey,
        sample_rate: u32,
        now_ms: u64,
        f: impl FnOnce(&mut AudioBuffer, Lookup) -> R,
    ) -> R {
        let mut shard = self
            .shard_for(key)
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let reusable = shard
            .live
            .get(key)
            .is_some_and(|buf| !matches!(buf.state, BufferState::Finalizing | BufferState::Closed));

        let lookup = if reusable {
            Lookup::Existing
        } else {
            // A terminal record (or no record at all); retire what is there
            // and start the next epoch.
            if let Some(stale) = shard.live.remove(key) {
                retire(&mut shard, key, stale.epoch, now_ms);
            }
            let epoch = next_epoch(&shard, key);
            let lookup = if epoch == 0 {
                Lookup::Created
            } else {
                Lookup::RolledOver
            };
            shard
                .live
                .insert(key.clone(), AudioBuffer::new(epoch, sample_rate, now_ms));
            lookup
        };

        let buf = shard
            .live
            .entry(key.clone())
            .or_insert_with(|| AudioBuffer::new(0, sample_rate, now_ms));
        let result = f(buf, lookup);
        let closed = buf.state == BufferState::Closed;
        let epoch = buf.epoch;

        if closed {
            shard.live.remove(key);
            retire(&mut shard, key, epoch, now_ms);
        }
        result
    }

    /// Deletes buffers idle past the ceiling or holding a pending cache
    /// older than `2 * pending_ttl_ms`, and prunes stale epoch seeds.
    ///
    /// Emission-free: a swept buffer's audio is dropped. Returns the swept
    /// keys with their idle times, for reporting.
    pub fn cleanup_expired(
        &self,
        now_ms: u64,
        idle_ceiling_ms: u64,
        pending_ttl_ms: u64,
    ) -> Vec<(BufferKey, u64)> {
        let mut swept = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|e| e.into_inner());

            let expired: Vec<BufferKey> = shard
                .live
                .iter()
                .filter(|(_, buf)| {
                    buf.idle_ms(now_ms) > idle_ceiling_ms
                        || buf
                            .oldest_pending_age_ms(now_ms)
                            .is_some_and(|age| age > pending_ttl_ms.saturating_mul(2))
                })
                .map(|(key, _)| key.clone())
                .collect();

            for key in expired {
                if let Some(buf) = shard.live.remove(&key) {
                    let idle = buf.idle_ms(now_ms);
                    retire(&mut shard, &key, buf.epoch, now_ms);
                    swept.push((key, idle));
                }
            }

            shard
                .retired
                .retain(|_, seed| now_ms.saturating_sub(seed.retired_at_ms) <= idle_ceiling_ms);
        }
        swept
    }

    /// Number of live buffers across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).live.len())
            .sum()
    }

    /// True if no buffer is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a live buffer exists for the key.
    pub fn contains(&self, key: &BufferKey) -> bool {
        self.shard_for(key)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .live
            .contains_key(key)
    }
}

fn retire(shard: &mut Shard, key: &BufferKey, epoch: u64, now_ms: u64) {
    let entry = shard
        .retired
        .entry(key.clone())
        .or_insert(RetiredEpoch {
            epoch,
            retired_at_ms: now_ms,
        });
    entry.epoch = entry.epoch.max(epoch);
    entry.retired_at_ms = now_ms;
}

fn next_epoch(shard: &Shard, key: &BufferKey) -> u64 {
    shard.retired.get(key).map_or(0, |seed| seed.epoch + 1)
}
