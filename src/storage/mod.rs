//! Storage Module
//!
//! Two record stores sit under one engine: a string store for raw byte
//! values and an object store for collection-like values. Each keeps a
//! resident tier in memory and an "on-disk" tier that must be faulted back
//! in before a record can be read or modified.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        StoreEngine                           │
//! │                                                              │
//! │  ┌───────────────────────┐      ┌───────────────────────┐    │
//! │  │     StringStore       │      │     ObjectStore       │    │
//! │  │  ┌────────┐┌────────┐ │      │  ┌────────┐┌────────┐ │    │
//! │  │  │resident││on-disk │ │      │  │resident││on-disk │ │    │
//! │  │  └────────┘└────────┘ │      │  └────────┘└────────┘ │    │
//! │  └───────────▲───────────┘      └───────────▲───────────┘    │
//! │              │                              │  (optional)    │
//! │     StringContext                  ObjectContext             │
//! │  (Read / RMW / Upsert / Delete, Pending + complete_pending)  │
//! └──────────────────────────────────────────────────────────────┘
//!                            ▲
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! Expired records read as absent everywhere. The sweeper reclaims the ones
//! nobody touches again.

pub mod clock;
pub mod context;
pub mod engine;
pub mod expiry;
pub mod input;
pub mod object;
pub mod object_store;
pub mod output;
pub mod string_store;
pub mod tiered;

// Re-export commonly used types
pub use clock::TimeUnit;
pub use context::{RecordStoreContext, Status, StoreKind, StoreScope};
pub use engine::{EngineStats, StoreEngine};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, SweepReport};
pub use input::{CommandInput, ExpireOption, GetExpiry, Opcode};
pub use object::{ObjectKind, ObjectOp, ObjectValue, StoreObject};
pub use object_store::{ObjectInput, ObjectOutput};
pub use output::{Output, OutputBuffer, OutputHeader};
pub use string_store::StringValue;
