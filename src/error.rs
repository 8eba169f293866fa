//! Error types for DuoKV
//!
//! Not-found is a first-class status ([`crate::session::OpStatus::NotFound`]),
//! never an error. The variants here cover command-level rejections the engine
//! reports through its output, malformed engine inputs, and transaction misuse.

use crate::protocol::ParseError;
use thiserror::Error;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for DuoKV operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // Command Errors
    // -------------------------------------------------------------------------
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    #[error("increment or decrement would overflow")]
    Overflow,

    /// Engine replied with an error the session has no mapping for
    #[error("engine error: {0}")]
    Engine(String),

    // -------------------------------------------------------------------------
    // Encoding Errors
    // -------------------------------------------------------------------------
    #[error("malformed command input: {0}")]
    MalformedInput(String),

    #[error("unreadable engine reply: {0}")]
    Reply(#[from] ParseError),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("transaction already running")]
    TransactionAlreadyRunning,

    #[error("no transaction is running")]
    NoTransaction,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("object store is disabled")]
    ObjectStoreDisabled,

    #[error("invalid configuration: {0}")]
    Config(String),
}
