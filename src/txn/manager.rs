//! Per-Session Transaction Manager
//!
//! Collects the keys a multi-key sequence will touch, locks them all up
//! front in a single global order, and releases them at commit.
//!
//! Two ways in:
//! - caller-managed: [`TransactionManager::save_key_entry_to_lock`] then
//!   [`run`](TransactionManager::run) ... [`commit`](TransactionManager::commit)
//! - internal: [`TransactionManager::begin_internal`] returns a [`TxnScope`]
//!   whose drop commits, so every exit path releases the locks

use crate::error::{KvError, Result};
use crate::storage::context::{StoreKind, StoreScope};
use crate::txn::lock_table::{LockTable, LockType, SessionId};
use crate::txn::watch::VersionMap;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyEntry {
    store: StoreKind,
    key: Bytes,
    lock_type: LockType,
}

/// A set of locks held by one session. Dropping it releases them.
#[derive(Debug)]
struct LockSet {
    table: Arc<LockTable>,
    owner: SessionId,
    entries: Vec<KeyEntry>,
}

impl LockSet {
    fn acquire(table: Arc<LockTable>, owner: SessionId, mut entries: Vec<KeyEntry>) -> Self {
        // One global order (store, key) across sessions; a key listed twice
        // is locked once, exclusively if any entry asked for that.
        entries.sort_by(|a, b| {
            (a.store, &a.key, std::cmp::Reverse(a.lock_type)).cmp(&(
                b.store,
                &b.key,
                std::cmp::Reverse(b.lock_type),
            ))
        });
        entries.dedup_by(|later, first| later.store == first.store && later.key == first.key);

        for entry in &entries {
            trace!(
                session = owner,
                store = ?entry.store,
                lock_type = ?entry.lock_type,
                "locking key"
            );
            table.acquire(entry.store, &entry.key, entry.lock_type, owner);
        }

        Self {
            table,
            owner,
            entries,
        }
    }

    fn covers(&self, store: StoreKind, key: &[u8], lock_type: LockType) -> bool {
        self.entries
            .iter()
            .any(|e| e.store == store && e.key.as_ref() == key && e.lock_type >= lock_type)
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        for entry in self.entries.iter().rev() {
            self.table
                .release(entry.store, &entry.key, entry.lock_type, self.owner);
        }
    }
}

/// Locks of an internal transaction. Commits when dropped.
#[derive(Debug)]
#[must_use = "the transaction commits as soon as the scope is dropped"]
pub struct TxnScope {
    locks: LockSet,
}

impl TxnScope {
    /// Commits explicitly. Equivalent to dropping the scope.
    pub fn commit(self) {
        debug!(
            session = self.locks.owner,
            keys = self.locks.entries.len(),
            "internal transaction committed"
        );
    }

    pub fn key_count(&self) -> usize {
        self.locks.entries.len()
    }
}

#[derive(Debug)]
struct WatchedKey {
    store: StoreKind,
    key: Bytes,
    version: u64,
}

/// Transaction state bound to one session.
#[derive(Debug)]
pub struct TransactionManager {
    owner: SessionId,
    locks: Arc<LockTable>,
    versions: Arc<VersionMap>,
    state: TxnState,
    pending_entries: Vec<KeyEntry>,
    held: Option<LockSet>,
    watched: Vec<WatchedKey>,
}

impl TransactionManager {
    pub fn new(owner: SessionId, locks: Arc<LockTable>, versions: Arc<VersionMap>) -> Self {
        Self {
            owner,
            locks,
            versions,
            state: TxnState::Idle,
            pending_entries: Vec::new(),
            held: None,
            watched: Vec::new(),
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TxnState::Running
    }

    /// Queues `key` to be locked by the next [`run`](Self::run) or
    /// [`begin_internal`](Self::begin_internal).
    pub fn save_key_entry_to_lock(&mut self, key: &[u8], is_object: bool, lock_type: LockType) {
        self.pending_entries.push(KeyEntry {
            store: StoreKind::from_is_object(is_object),
            key: Bytes::copy_from_slice(key),
            lock_type,
        });
    }

    /// Begins a caller-managed transaction, locking every saved key.
    pub fn run(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(KvError::TransactionAlreadyRunning);
        }
        let entries = std::mem::take(&mut self.pending_entries);
        let locks = LockSet::acquire(Arc::clone(&self.locks), self.owner, entries);
        debug!(session = self.owner, keys = locks.entries.len(), "transaction started");

        self.held = Some(locks);
        self.state = TxnState::Running;
        Ok(())
    }

    /// Ends a caller-managed transaction, releasing its locks and watches.
    pub fn commit(&mut self) -> Result<()> {
        if !self.is_running() {
            warn!(session = self.owner, "commit without a running transaction");
            return Err(KvError::NoTransaction);
        }
        self.held = None;
        self.watched.clear();
        self.state = TxnState::Idle;
        debug!(session = self.owner, "transaction committed");
        Ok(())
    }

    /// Locks every saved key for an internal sequence. The ambient state is
    /// left untouched.
    pub fn begin_internal(&mut self) -> TxnScope {
        let entries = std::mem::take(&mut self.pending_entries);
        let locks = LockSet::acquire(Arc::clone(&self.locks), self.owner, entries);
        trace!(session = self.owner, keys = locks.entries.len(), "internal transaction started");
        TxnScope { locks }
    }

    /// Records the key's current version in the chosen stores.
    pub fn watch(&mut self, key: &[u8], scope: StoreScope) {
        for store in scope.stores() {
            self.watched.push(WatchedKey {
                store,
                key: Bytes::copy_from_slice(key),
                version: self.versions.version(store, key),
            });
        }
    }

    /// Drops every watch.
    pub fn unwatch(&mut self) {
        self.watched.clear();
    }

    /// True when no watched key has been written since it was watched.
    pub fn validate_watches(&self) -> bool {
        self.watched
            .iter()
            .all(|w| self.versions.version(w.store, &w.key) == w.version)
    }

    pub fn watched_keys(&self) -> usize {
        self.watched.len()
    }

    /// While a transaction runs, the session may only touch keys it locked
    /// in the same store. Outside a transaction every key is accessible.
    pub fn verify_key_ownership(
        &self,
        key: &[u8],
        is_object: bool,
        lock_type: LockType,
    ) -> bool {
        let store = StoreKind::from_is_object(is_object);
        match (&self.state, &self.held) {
            (TxnState::Running, Some(locks)) => locks.covers(store, key, lock_type),
            _ => true,
        }
    }
}
