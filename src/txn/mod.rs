//! Transaction and Lock Management
//!
//! - [`lock_table`]: striped exclusive/shared key locks shared by all sessions
//! - [`watch`]: per-key version counters backing WATCH
//! - [`manager`]: per-session transaction boundary and the [`TxnScope`] guard

pub mod lock_table;
pub mod manager;
pub mod watch;

pub use lock_table::{LockTable, LockType, SessionId};
pub use manager::{TransactionManager, TxnScope, TxnState};
pub use watch::VersionMap;
