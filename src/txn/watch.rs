//! Watch Version Map
//!
//! A fixed array of version counters, indexed by a hash of `(store, key)`.
//! Every write through a store context bumps its key's counter; WATCH records
//! the counter and EXEC-time validation compares it again. Keys sharing a
//! bucket can only cause spurious invalidations, never missed ones.

use crate::storage::context::StoreKind;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct VersionMap {
    buckets: Vec<AtomicU64>,
}

impl VersionMap {
    /// Creates a map with `buckets` counters, rounded up to a power of two.
    pub fn new(buckets: usize) -> Self {
        let size = buckets.max(1).next_power_of_two();
        Self {
            buckets: (0..size).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    fn bucket(&self, store: StoreKind, key: &[u8]) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        store.hash(&mut hasher);
        key.hash(&mut hasher);
        &self.buckets[(hasher.finish() as usize) & (self.buckets.len() - 1)]
    }

    pub fn bump(&self, store: StoreKind, key: &[u8]) {
        self.bucket(store, key).fetch_add(1, Ordering::AcqRel);
    }

    pub fn version(&self, store: StoreKind, key: &[u8]) -> u64 {
        self.bucket(store, key).load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_changes_version() {
        let versions = VersionMap::new(16);
        let before = versions.version(StoreKind::String, b"k");
        versions.bump(StoreKind::String, b"k");
        assert_eq!(versions.version(StoreKind::String, b"k"), before + 1);
    }

    #[test]
    fn test_size_rounds_to_power_of_two() {
        assert_eq!(VersionMap::new(1000).buckets.len(), 1024);
        assert_eq!(VersionMap::new(0).buckets.len(), 1);
    }
}
