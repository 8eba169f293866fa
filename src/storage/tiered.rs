//! Two-Tier Sharded Record Map
//!
//! Records live either in the resident tier (in memory, served synchronously)
//! or in the on-disk tier (evicted; touching them for a read or RMW is what
//! makes an operation go pending until the record is faulted back in).
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TieredMap<V>                          │
//! │  ┌──────────────┐ ┌──────────────┐       ┌──────────────┐    │
//! │  │   Shard 0    │ │   Shard 1    │  ...  │   Shard 63   │    │
//! │  │ ┌──────────┐ │ │ ┌──────────┐ │       │ ┌──────────┐ │    │
//! │  │ │ resident │ │ │ │ resident │ │       │ │ resident │ │    │
//! │  │ ├──────────┤ │ │ ├──────────┤ │       │ ├──────────┤ │    │
//! │  │ │ on disk  │ │ │ │ on disk  │ │       │ │ on disk  │ │    │
//! │  │ └──────────┘ │ │ └──────────┘ │       │ └──────────┘ │    │
//! │  └──────────────┘ └──────────────┘       └──────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A key is in at most one tier. Blind writes (upsert, delete) never need
//! the old record, so they complete synchronously regardless of tier.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Number of shards per map.
/// More shards = less lock contention, but more memory overhead.
pub const NUM_SHARDS: usize = 64;

/// Outcome of an access that needs the current record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency<R> {
    Resident(R),
    /// The record must be faulted in before the access can run
    OnDisk,
}

#[derive(Debug)]
struct Shard<V> {
    resident: HashMap<Bytes, V>,
    on_disk: HashMap<Bytes, V>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            resident: HashMap::new(),
            on_disk: HashMap::new(),
        }
    }

    /// Evicts one resident record other than `keep` once the tier is over
    /// `limit`.
    fn enforce_limit(&mut self, limit: Option<usize>, keep: &[u8]) {
        let Some(limit) = limit else {
            return;
        };
        while self.resident.len() > limit {
            let Some(victim) = self
                .resident
                .keys()
                .find(|k| k.as_ref() != keep)
                .cloned()
            else {
                return;
            };
            if let Some(value) = self.resident.remove(&victim) {
                self.on_disk.insert(victim, value);
            }
        }
    }
}

/// Sharded map with a resident and an on-disk tier.
#[derive(Debug)]
pub struct TieredMap<V> {
    shards: Vec<RwLock<Shard<V>>>,
    resident_limit: Option<usize>,
}

impl<V> TieredMap<V> {
    /// Creates a map; `resident_limit` caps resident records per shard.
    pub fn new(resident_limit: Option<usize>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(Shard::new())).collect();
        Self {
            shards,
            resident_limit,
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &RwLock<Shard<V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Runs `f` against the resident record (or `None` if the key is absent)
    /// under the shard's read lock.
    pub fn read<R>(&self, key: &[u8], f: impl FnOnce(Option<&V>) -> R) -> Residency<R> {
        let shard = self.shard(key).read();
        if shard.on_disk.contains_key(key) {
            return Residency::OnDisk;
        }
        Residency::Resident(f(shard.resident.get(key)))
    }

    /// Runs `f` against the record slot under the shard's write lock.
    ///
    /// `f` may fill, replace or empty the slot; the map stores whatever is
    /// left in it.
    pub fn update<R>(&self, key: &[u8], f: impl FnOnce(&mut Option<V>) -> R) -> Residency<R> {
        let mut shard = self.shard(key).write();
        if shard.on_disk.contains_key(key) {
            return Residency::OnDisk;
        }

        let (owned_key, mut slot) = match shard.resident.remove_entry(key) {
            Some((k, v)) => (Some(k), Some(v)),
            None => (None, None),
        };
        let result = f(&mut slot);

        if let Some(value) = slot {
            let owned_key = owned_key.unwrap_or_else(|| Bytes::copy_from_slice(key));
            shard.resident.insert(owned_key, value);
            shard.enforce_limit(self.resident_limit, key);
        }
        Residency::Resident(result)
    }

    /// Blind write into the resident tier.
    ///
    /// # Returns
    ///
    /// The record it replaced, from either tier.
    pub fn upsert(&self, key: Bytes, value: V) -> Option<V> {
        let mut shard = self.shard(&key).write();
        let previous = shard.on_disk.remove(&key);
        let keep = key.clone();
        let replaced = shard.resident.insert(key, value).or(previous);
        shard.enforce_limit(self.resident_limit, &keep);
        replaced
    }

    /// Removes the record from whichever tier holds it.
    pub fn remove(&self, key: &[u8]) -> Option<V> {
        let mut shard = self.shard(key).write();
        shard
            .resident
            .remove(key)
            .or_else(|| shard.on_disk.remove(key))
    }

    /// Brings an on-disk record back into the resident tier.
    ///
    /// # Returns
    ///
    /// `true` if the record was on disk.
    pub fn fault_in(&self, key: &[u8]) -> bool {
        let mut shard = self.shard(key).write();
        match shard.on_disk.remove_entry(key) {
            Some((k, v)) => {
                shard.resident.insert(k, v);
                shard.enforce_limit(self.resident_limit, key);
                true
            }
            None => false,
        }
    }

    /// Moves a resident record to the on-disk tier.
    pub fn evict(&self, key: &[u8]) -> bool {
        let mut shard = self.shard(key).write();
        match shard.resident.remove_entry(key) {
            Some((k, v)) => {
                shard.on_disk.insert(k, v);
                true
            }
            None => false,
        }
    }

    /// Moves every resident record to the on-disk tier.
    pub fn evict_all(&self) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.write();
            let resident = std::mem::take(&mut shard.resident);
            evicted += resident.len();
            shard.on_disk.extend(resident);
        }
        evicted
    }

    /// Drops every record, in both tiers, for which `keep` returns false.
    ///
    /// # Returns
    ///
    /// The number of records removed.
    pub fn retain(&self, mut keep: impl FnMut(&V) -> bool) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.write();
            let before = shard.resident.len() + shard.on_disk.len();
            shard.resident.retain(|_, v| keep(v));
            shard.on_disk.retain(|_, v| keep(v));
            removed += before - (shard.resident.len() + shard.on_disk.len());
        }
        removed
    }

    pub fn resident_len(&self) -> usize {
        self.shards.iter().map(|s| s.read().resident.len()).sum()
    }

    pub fn on_disk_len(&self) -> usize {
        self.shards.iter().map(|s| s.read().on_disk.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                let shard = s.read();
                shard.resident.len() + shard.on_disk.len()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
