//! Key Lock Table
//!
//! Exclusive/shared locks at key granularity, owned by sessions. The table is
//! striped: each stripe has its own mutex and condition variable, and a key
//! always maps to the same stripe.
//!
//! ```text
//!   acquire(String, "a", Exclusive, s1)
//!        │
//!        ▼
//!   stripe = hash(store, key) % N ──> Mutex<[HashMap<key, LockState>; 2]>
//!        │                                   │
//!        │  incompatible holder?             │ yes: wait on stripe condvar
//!        │                                   │ no:  record s1 as holder
//!        ▼                                   ▼
//!   release(...) ──> drop holder, notify_all on the stripe
//! ```
//!
//! A session may upgrade a shared lock it alone holds to exclusive.

use crate::storage::context::StoreKind;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Identifies the session owning a lock.
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    exclusive: Option<SessionId>,
    shared: Vec<SessionId>,
}

impl LockState {
    fn held_by(&self, owner: SessionId, lock_type: LockType) -> bool {
        match lock_type {
            LockType::Exclusive => self.exclusive == Some(owner),
            LockType::Shared => self.exclusive == Some(owner) || self.shared.contains(&owner),
        }
    }

    fn can_grant(&self, owner: SessionId, lock_type: LockType) -> bool {
        match lock_type {
            LockType::Exclusive => {
                self.exclusive.map_or(true, |holder| holder == owner)
                    && self.shared.iter().all(|&holder| holder == owner)
            }
            LockType::Shared => self.exclusive.map_or(true, |holder| holder == owner),
        }
    }

    fn grant(&mut self, owner: SessionId, lock_type: LockType) {
        match lock_type {
            LockType::Exclusive => self.exclusive = Some(owner),
            LockType::Shared => self.shared.push(owner),
        }
    }

    fn release(&mut self, owner: SessionId, lock_type: LockType) {
        match lock_type {
            LockType::Exclusive => {
                if self.exclusive == Some(owner) {
                    self.exclusive = None;
                }
            }
            LockType::Shared => {
                if let Some(pos) = self.shared.iter().position(|&holder| holder == owner) {
                    self.shared.swap_remove(pos);
                }
            }
        }
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

struct Stripe {
    /// Indexed by [`StoreKind::index`]
    states: Mutex<[HashMap<Bytes, LockState>; 2]>,
    released: Condvar,
}

impl Stripe {
    fn new() -> Self {
        Self {
            states: Mutex::new([HashMap::new(), HashMap::new()]),
            released: Condvar::new(),
        }
    }
}

/// Striped table of key locks shared by every session of an engine.
pub struct LockTable {
    stripes: Vec<Stripe>,

    /// Statistics: locks granted
    acquisitions: AtomicU64,

    /// Statistics: times a requester had to wait
    waits: AtomicU64,
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("stripes", &self.stripes.len())
            .field("acquisitions", &self.acquisitions.load(Ordering::Relaxed))
            .field("waits", &self.waits.load(Ordering::Relaxed))
            .finish()
    }
}

impl LockTable {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Stripe::new()).collect(),
            acquisitions: AtomicU64::new(0),
            waits: AtomicU64::new(0),
        }
    }

    #[inline]
    fn stripe(&self, store: StoreKind, key: &[u8]) -> &Stripe {
        let mut hasher = DefaultHasher::new();
        store.hash(&mut hasher);
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    /// Blocks until `owner` holds `lock_type` on `key`.
    pub fn acquire(&self, store: StoreKind, key: &[u8], lock_type: LockType, owner: SessionId) {
        let stripe = self.stripe(store, key);
        let mut states = stripe.states.lock();

        while !states[store.index()]
            .get(key)
            .map_or(true, |state| state.can_grant(owner, lock_type))
        {
            self.waits.fetch_add(1, Ordering::Relaxed);
            trace!(session = owner, ?store, ?lock_type, "waiting for key lock");
            stripe.released.wait(&mut states);
        }

        let map = &mut states[store.index()];
        match map.get_mut(key) {
            Some(state) => state.grant(owner, lock_type),
            None => {
                let mut state = LockState::default();
                state.grant(owner, lock_type);
                map.insert(Bytes::copy_from_slice(key), state);
            }
        }
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn release(&self, store: StoreKind, key: &[u8], lock_type: LockType, owner: SessionId) {
        let stripe = self.stripe(store, key);
        let mut states = stripe.states.lock();
        let map = &mut states[store.index()];

        if let Some(state) = map.get_mut(key) {
            state.release(owner, lock_type);
            if state.is_free() {
                map.remove(key);
            }
        }
        stripe.released.notify_all();
    }

    /// Whether `owner` already holds at least `lock_type` on `key`.
    pub fn is_held_by(
        &self,
        store: StoreKind,
        key: &[u8],
        lock_type: LockType,
        owner: SessionId,
    ) -> bool {
        let states = self.stripe(store, key).states.lock();
        states[store.index()]
            .get(key)
            .is_some_and(|state| state.held_by(owner, lock_type))
    }

    /// Whether anyone holds a lock on `key`.
    pub fn is_locked(&self, store: StoreKind, key: &[u8]) -> bool {
        let states = self.stripe(store, key).states.lock();
        states[store.index()].contains_key(key)
    }

    /// Lock held for the duration of one store call. Skipped when `owner`
    /// already holds the key through a transaction.
    pub fn transient<'a>(
        &'a self,
        store: StoreKind,
        key: &'a [u8],
        lock_type: LockType,
        owner: SessionId,
    ) -> TransientLock<'a> {
        let acquired = !self.is_held_by(store, key, lock_type, owner);
        if acquired {
            self.acquire(store, key, lock_type, owner);
        }
        TransientLock {
            table: self,
            store,
            key,
            lock_type,
            owner,
            acquired,
        }
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }
}

/// Guard returned by [`LockTable::transient`]; releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct TransientLock<'a> {
    table: &'a LockTable,
    store: StoreKind,
    key: &'a [u8],
    lock_type: LockType,
    owner: SessionId,
    acquired: bool,
}

impl Drop for TransientLock<'_> {
    fn drop(&mut self) {
        if self.acquired {
            self.table
                .release(self.store, self.key, self.lock_type, self.owner);
        }
    }
}
