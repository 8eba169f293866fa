//! RESP Reply Module
//!
//! The store callbacks answer in RESP, the way a server would reply to a
//! client, so outputs can be forwarded as-is. The session decodes the few
//! replies it needs to inspect (length headers, integers, error replies).
//!
//! - [`types`]: reply values and their encoding into output buffers
//! - [`parser`]: zero-copy readers for replies held in output buffers

pub mod parser;
pub mod types;

pub use parser::{ParseError, ParseResult};
pub use types::RespValue;
