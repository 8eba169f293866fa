//! Record Store Contexts
//!
//! A context is a session's handle on one store. It exposes the engine's four
//! primitives (Read, RMW, Upsert, Delete), each of which may answer
//! [`Status::Pending`] when the record has to be brought in from the on-disk
//! tier first. Pending operations queue inside the context until
//! [`RecordStoreContext::complete_pending`] drains them.
//!
//! Both stores implement the same trait with their own key, value, input and
//! output types; the session is generic over it and every call is
//! monomorphized.

use crate::txn::{LockTable, LockType, SessionId, VersionMap};
use std::sync::Arc;

/// Engine-level outcome of a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Found,
    NotFound,
    /// The result is not available yet; drain with `complete_pending`
    Pending,
}

impl Status {
    #[inline]
    pub fn is_pending(self) -> bool {
        self == Status::Pending
    }

    #[inline]
    pub fn found(self) -> bool {
        self == Status::Found
    }

    #[inline]
    pub(crate) fn from_found(found: bool) -> Self {
        if found {
            Status::Found
        } else {
            Status::NotFound
        }
    }
}

/// Result of one drain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The queued operation finished with this terminal status
    Done(Status),
    /// Still waiting on I/O; poll again
    Retry,
}

/// What a store's RMW callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RmwOutcome {
    /// A live record existed before the call
    pub found: bool,
    /// The stored state changed
    pub mutated: bool,
}

impl RmwOutcome {
    pub(crate) fn found(mutated: bool) -> Self {
        Self {
            found: true,
            mutated,
        }
    }

    pub(crate) fn not_found(mutated: bool) -> Self {
        Self {
            found: false,
            mutated,
        }
    }
}

/// Which backend a context is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StoreKind {
    String = 0,
    Object = 1,
}

impl StoreKind {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_is_object(is_object: bool) -> Self {
        if is_object {
            StoreKind::Object
        } else {
            StoreKind::String
        }
    }
}

/// Which store(s) a logical command touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreScope {
    StringOnly,
    ObjectOnly,
    #[default]
    Both,
}

impl StoreScope {
    pub fn includes_string(self) -> bool {
        matches!(self, StoreScope::StringOnly | StoreScope::Both)
    }

    pub fn includes_object(self) -> bool {
        matches!(self, StoreScope::ObjectOnly | StoreScope::Both)
    }

    /// The stores in this scope, string store first.
    pub fn stores(self) -> impl Iterator<Item = StoreKind> {
        [
            self.includes_string().then_some(StoreKind::String),
            self.includes_object().then_some(StoreKind::Object),
        ]
        .into_iter()
        .flatten()
    }
}

/// A session's capability handle on one record store.
pub trait RecordStoreContext {
    type Key: ?Sized;
    type Value<'v>;
    type Input<'i>;
    type Output<'o>;

    fn kind(&self) -> StoreKind;

    fn read(&mut self, key: &Self::Key, input: &Self::Input<'_>, output: &mut Self::Output<'_>)
        -> Status;

    fn rmw(&mut self, key: &Self::Key, input: &Self::Input<'_>, output: &mut Self::Output<'_>)
        -> Status;

    /// Blind write. Never pending.
    fn upsert(&mut self, key: &Self::Key, value: Self::Value<'_>) -> Status;

    /// Blind delete. Never pending.
    fn delete(&mut self, key: &Self::Key) -> Status;

    /// Runs one step of the completion queue, writing the finished
    /// operation's result into `output`.
    fn complete_pending(&mut self, output: &mut Self::Output<'_>) -> Completion;

    fn pending_count(&self) -> usize;
}

/// Per-session plumbing both contexts share: transient key locks and
/// watch-version bumps.
#[derive(Debug, Clone)]
pub(crate) struct ContextBase {
    pub(crate) session: SessionId,
    pub(crate) locks: Arc<LockTable>,
    pub(crate) versions: Arc<VersionMap>,
}

impl ContextBase {
    pub(crate) fn new(
        session: SessionId,
        locks: Arc<LockTable>,
        versions: Arc<VersionMap>,
    ) -> Self {
        Self {
            session,
            locks,
            versions,
        }
    }

    #[inline]
    pub(crate) fn lock<'a>(
        &'a self,
        store: StoreKind,
        key: &'a [u8],
        lock_type: LockType,
    ) -> crate::txn::lock_table::TransientLock<'a> {
        self.locks.transient(store, key, lock_type, self.session)
    }

    #[inline]
    pub(crate) fn touched(&self, store: StoreKind, key: &[u8]) {
        self.versions.bump(store, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_store_order() {
        assert_eq!(
            StoreScope::Both.stores().collect::<Vec<_>>(),
            vec![StoreKind::String, StoreKind::Object]
        );
        assert_eq!(
            StoreScope::ObjectOnly.stores().collect::<Vec<_>>(),
            vec![StoreKind::Object]
        );
        assert!(StoreScope::StringOnly.includes_string());
        assert!(!StoreScope::StringOnly.includes_object());
    }

    #[test]
    fn test_status_helpers() {
        assert!(Status::Pending.is_pending());
        assert!(Status::Found.found());
        assert_eq!(Status::from_found(false), Status::NotFound);
    }
}
