//! Dual-Store Engine
//!
//! The engine owns everything sessions share: the string store, the optional
//! object store, the lock table and the watch version map. It hands out
//! [`StorageSession`]s, each bound to its own pair of store contexts.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         StoreEngine                          │
//! │  ┌────────────────────┐        ┌────────────────────┐        │
//! │  │    StringStore     │        │    ObjectStore     │        │
//! │  │  TieredMap<Record> │        │ TieredMap<Arc<Obj>>│        │
//! │  └────────────────────┘        └────────────────────┘        │
//! │  ┌────────────────────┐        ┌────────────────────┐        │
//! │  │     LockTable      │        │     VersionMap     │        │
//! │  └────────────────────┘        └────────────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                ▲                ▲
//!   StorageSession   StorageSession   StorageSession   (one per thread)
//! ```
//!
//! A session is used by one thread at a time; any number of sessions run in
//! parallel against the same engine.

use crate::config::EngineConfig;
use crate::session::StorageSession;
use crate::storage::context::ContextBase;
use crate::storage::object_store::{ObjectContext, ObjectStore};
use crate::storage::string_store::{StringContext, StringStore};
use crate::txn::{LockTable, SessionId, VersionMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// The shared state behind every session.
pub struct StoreEngine {
    strings: Arc<StringStore>,

    /// `None` when the object store is disabled
    objects: Option<Arc<ObjectStore>>,

    locks: Arc<LockTable>,
    versions: Arc<VersionMap>,
    config: EngineConfig,

    /// Sessions handed out so far; ids start at 1
    next_session: AtomicU64,
}

impl std::fmt::Debug for StoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEngine")
            .field("string_records", &self.strings.len())
            .field(
                "object_records",
                &self.objects.as_ref().map_or(0, |o| o.len()),
            )
            .field("sessions", &self.next_session.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StoreEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StoreEngine {
    /// Creates an engine with empty stores.
    pub fn new(config: EngineConfig) -> Self {
        let limit = config.resident_records_per_shard;
        let objects = config
            .object_store_enabled
            .then(|| Arc::new(ObjectStore::new(limit)));

        info!(
            object_store = config.object_store_enabled,
            resident_limit = ?limit,
            lock_stripes = config.lock_stripes,
            "Store engine created"
        );

        Self {
            strings: Arc::new(StringStore::new(limit)),
            objects,
            locks: Arc::new(LockTable::new(config.lock_stripes)),
            versions: Arc::new(VersionMap::new(config.watch_buckets)),
            config,
            next_session: AtomicU64::new(0),
        }
    }

    /// Opens a new session bound to this engine.
    pub fn session(self: &Arc<Self>) -> StorageSession {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session = id, "Session opened");
        StorageSession::new(Arc::clone(self), id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn string_store(&self) -> &Arc<StringStore> {
        &self.strings
    }

    pub fn object_store(&self) -> Option<&Arc<ObjectStore>> {
        self.objects.as_ref()
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn versions(&self) -> &Arc<VersionMap> {
        &self.versions
    }

    pub(crate) fn context_base(&self, session: SessionId) -> ContextBase {
        ContextBase::new(session, Arc::clone(&self.locks), Arc::clone(&self.versions))
    }

    pub(crate) fn string_context(&self, session: SessionId) -> StringContext {
        StringContext::new(Arc::clone(&self.strings), self.context_base(session))
    }

    pub(crate) fn object_context(&self, session: SessionId) -> Option<ObjectContext> {
        self.objects
            .as_ref()
            .map(|store| ObjectContext::new(Arc::clone(store), self.context_base(session)))
    }

    /// Total records across both stores and both tiers.
    pub fn len(&self) -> usize {
        self.strings.len() + self.objects.as_ref().map_or(0, |o| o.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes expired records from both stores.
    ///
    /// This is called by the background expiry sweeper.
    ///
    /// # Returns
    ///
    /// Returns the number of records that were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let strings = self.strings.cleanup_expired();
        let objects = self.objects.as_ref().map_or(0, |o| o.cleanup_expired());
        strings + objects
    }

    /// Moves the key's records in both stores to the on-disk tier.
    pub fn evict(&self, key: &[u8]) -> bool {
        let string = self.strings.evict(key);
        let object = self.objects.as_ref().is_some_and(|o| o.evict(key));
        string || object
    }

    /// Moves every resident record to the on-disk tier.
    pub fn evict_all(&self) -> usize {
        let evicted =
            self.strings.evict_all() + self.objects.as_ref().map_or(0, |o| o.evict_all());
        debug!(evicted, "Evicted all resident records");
        evicted
    }

    /// Returns engine statistics.
    pub fn stats(&self) -> EngineStats {
        let (object_resident, object_on_disk, object_expired, object_faults) =
            self.objects.as_ref().map_or((0, 0, 0, 0), |o| {
                (
                    o.resident_len(),
                    o.on_disk_len(),
                    o.expired_count(),
                    o.fault_count(),
                )
            });

        EngineStats {
            string_resident: self.strings.resident_len(),
            string_on_disk: self.strings.on_disk_len(),
            object_resident,
            object_on_disk,
            expired: self.strings.expired_count() + object_expired,
            faults: self.strings.fault_count() + object_faults,
            sessions: self.next_session.load(Ordering::Relaxed),
            lock_waits: self.locks.waits(),
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// String records in memory
    pub string_resident: usize,
    /// String records on the on-disk tier
    pub string_on_disk: usize,
    pub object_resident: usize,
    pub object_on_disk: usize,
    /// Total expired records removed by sweeps
    pub expired: u64,
    /// Records faulted back in by pending operations
    pub faults: u64,
    /// Sessions opened so far
    pub sessions: u64,
    /// Lock acquisitions that had to wait
    pub lock_waits: u64,
}
