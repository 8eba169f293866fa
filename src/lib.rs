//! # DuoKV - Command Execution Over a Dual-Store Key-Value Engine
//!
//! DuoKV turns Redis-style key and string commands into store-level
//! operations against two record stores: one for raw string values and an
//! optional one for object values (lists, sets, hashes, sorted sets).
//!
//! ## Features
//!
//! - **Dual Store**: every key command can target the string store, the
//!   object store, or both
//! - **Tiered Records**: records can be evicted to a cold tier and are
//!   faulted back in transparently on the next access
//! - **TTL Support**: absolute expirations in 100ns ticks, lazy expiry on
//!   access plus a background sweeper
//! - **Key Locking**: multi-key sequences (RENAME) run under exclusive key
//!   locks, inside the caller's transaction or an internal one
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                DuoKV                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────┐   ┌────────────────────────┐   │
//! │  │  StorageSession  │──>│ Store Router │──>│  StringContext         │   │
//! │  │  (one per thread)│   │ (scope)      │   │  ObjectContext (opt.)  │   │
//! │  └────────┬─────────┘   └──────────────┘   └───────────┬────────────┘   │
//! │           │                                            │ Pending        │
//! │           ▼                                            ▼                │
//! │  ┌──────────────────┐   ┌──────────────────────────────────────────┐    │
//! │  │ TransactionMgr   │   │              StoreEngine                 │    │
//! │  │ LockTable        │   │   StringStore          ObjectStore       │    │
//! │  │ VersionMap       │   │  [resident|on-disk]   [resident|on-disk] │    │
//! │  └──────────────────┘   └──────────────────────────────────────────┘    │
//! │                                            ▲                            │
//! │                     ┌──────────────────────┴──────────────────────┐     │
//! │                     │           ExpirySweeper                     │     │
//! │                     │      (Background Tokio Task)                │     │
//! │                     └─────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use duokv::{EngineConfig, OpStatus, StoreEngine, StoreScope};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let engine = Arc::new(StoreEngine::new(EngineConfig::default()));
//! let mut session = engine.session();
//!
//! session.set(b"counter", b"41");
//! assert_eq!(session.increment(b"counter", 1), Ok(42));
//!
//! let (status, set) = session.expire(
//!     b"counter",
//!     Duration::from_secs(60),
//!     duokv::storage::ExpireOption::Unconditional,
//!     StoreScope::Both,
//! );
//! assert_eq!(status, OpStatus::Ok);
//! assert!(set);
//!
//! assert_eq!(session.rename(b"counter", b"total", StoreScope::Both), OpStatus::Ok);
//! assert_eq!(session.exists(b"counter", StoreScope::Both), OpStatus::NotFound);
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `GET key`, `GETEX key [EX|PX|EXAT|PXAT|PERSIST]`, `GETDEL key`
//! - `GETRANGE key offset len`
//! - `SET key value [EX|PX]`, `SETNX`, `SET .. XX`
//! - `APPEND key value`, `SETRANGE key offset value`
//! - `INCR` / `INCRBY` / `DECR` / `DECRBY`
//!
//! ### Key Commands
//! - `DEL key`, `EXISTS key`, `TYPE key`, `MEMORY USAGE key`
//! - `EXPIRE` / `PEXPIRE` / `EXPIREAT` / `PEXPIREAT [NX|XX|GT|LT]`
//! - `TTL` / `PTTL` / `EXPIRETIME` / `PEXPIRETIME`
//! - `PERSIST key`
//! - `RENAME key newkey`, `RENAMENX key newkey`
//! - `WATCH key`
//!
//! ## Module Overview
//!
//! - [`session`]: the per-thread command façade
//! - [`storage`]: the two record stores, their contexts and the engine
//! - [`txn`]: key locks, transactions and watch versions
//! - [`protocol`]: RESP reply encoding and decoding of store outputs
//! - [`config`]: engine configuration
//! - [`error`]: the crate error type
//!
//! ## Design Highlights
//!
//! ### Zero-Copy Outputs
//!
//! Callers may hand the store a stack span to write into. Small results land
//! there directly; larger ones spill into an owned heap buffer.
//!
//! ### Lazy + Active Expiry
//!
//! Records with a TTL are expired in two ways:
//! 1. **Lazy**: an expired record reads as absent and is dropped on write
//! 2. **Active**: a background task periodically sweeps expired records
//!
//! This ensures memory is reclaimed even for keys that are never accessed again.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod txn;

// Re-export commonly used types for convenience
pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{KvError, Result};
pub use protocol::{ParseError, RespValue};
pub use session::{KeyType, OpStatus, SessionMetrics, StorageSession};
pub use storage::{
    start_expiry_sweeper, EngineStats, ExpiryConfig, ExpirySweeper, StoreEngine, StoreScope,
    TimeUnit,
};

/// Version of DuoKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
