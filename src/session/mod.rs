//! Storage Session
//!
//! A [`StorageSession`] is the façade callers use: every logical command
//! (GET, SET, EXPIRE, RENAME, ...) becomes one or more Read/RMW/Upsert/Delete
//! calls against the session's two store contexts, with pending results
//! resolved before the call returns.
//!
//! ## Call Flow
//!
//! ```text
//!   caller ──> StorageSession::expire(key, ttl, option, scope)
//!                   │
//!                   │ CommandInput::expire(..)        (input encoder)
//!                   ▼
//!              try_in_scope(scope, ..)                (router)
//!               │                    │
//!               ▼                    ▼
//!         StringContext::rmw    ObjectContext::rmw    (store contexts)
//!               │ Pending?
//!               ▼
//!         complete_pending pump                       (pending)
//!               │
//!               ▼
//!         OutputHeader -> (OpStatus, timeout_set)
//! ```
//!
//! ## Modules
//!
//! - `router`: the scope combinators
//! - `pending`: the completion pump and the settled store calls
//! - `string_ops`: commands that only touch the string store
//! - `key_ops`: commands that work on keys in either store
//! - `rename`: RENAME / RENAMENX
//!
//! A session is not `Sync`; use one per thread.

mod key_ops;
mod pending;
mod rename;
mod router;
mod string_ops;

use crate::storage::context::Status;
use crate::storage::object_store::ObjectContext;
use crate::storage::string_store::StringContext;
use crate::storage::StoreEngine;
use crate::txn::{SessionId, TransactionManager};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Caller-visible outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Ok,
    NotFound,
}

impl OpStatus {
    pub fn is_ok(self) -> bool {
        self == OpStatus::Ok
    }

    /// Maps a settled engine status. `Pending` never reaches here.
    pub(crate) fn from_status(status: Status) -> Self {
        debug_assert!(!status.is_pending(), "unsettled pending status");
        match status {
            Status::Found => OpStatus::Ok,
            Status::NotFound | Status::Pending => OpStatus::NotFound,
        }
    }
}

/// Type tag reported by TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    List,
    Set,
    Hash,
    SortedSet,
    None,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::Hash => "hash",
            KeyType::SortedSet => "zset",
            KeyType::None => "none",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    /// GETs that found the key
    pub found: u64,
    /// GETs that missed
    pub not_found: u64,
    /// Operations that went pending and were completed
    pub pending_ops: u64,
    /// Time spent completing pending operations (when tracking is on)
    pub pending_latency: Duration,
}

/// One caller's view of the engine.
pub struct StorageSession {
    id: SessionId,
    engine: Arc<StoreEngine>,
    string_ctx: StringContext,
    /// `None` when the object store is disabled
    object_ctx: Option<ObjectContext>,
    txn: TransactionManager,
    metrics: SessionMetrics,
    latency_tracking: bool,
}

impl fmt::Debug for StorageSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSession")
            .field("id", &self.id)
            .field("txn", &self.txn.state())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl StorageSession {
    pub(crate) fn new(engine: Arc<StoreEngine>, id: SessionId) -> Self {
        let string_ctx = engine.string_context(id);
        let object_ctx = engine.object_context(id);
        let txn = TransactionManager::new(
            id,
            Arc::clone(engine.lock_table()),
            Arc::clone(engine.versions()),
        );
        let latency_tracking = engine.config().latency_tracking;

        Self {
            id,
            engine,
            string_ctx,
            object_ctx,
            txn,
            metrics: SessionMetrics::default(),
            latency_tracking,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn engine(&self) -> &Arc<StoreEngine> {
        &self.engine
    }

    /// The session's transaction manager.
    pub fn transaction(&mut self) -> &mut TransactionManager {
        &mut self.txn
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = SessionMetrics::default();
    }

    pub fn object_store_enabled(&self) -> bool {
        self.object_ctx.is_some()
    }
}
