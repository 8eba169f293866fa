//! String-Store Commands
//!
//! GET and its variants, SET and its conditional forms, APPEND, SETRANGE and
//! INCR/DECR. Each builds a [`CommandInput`], issues one settled store call,
//! and decodes whatever reply the callback wrote.

use super::{OpStatus, StorageSession};
use crate::error::{KvError, Result};
use crate::protocol::parser::{read_decimal, read_integer};
use crate::protocol::types::{ERR_NOT_INTEGER, ERR_OVERFLOW};
use crate::protocol::ParseError;
use crate::storage::clock;
use crate::storage::context::{RecordStoreContext, Status};
use crate::storage::input::{CommandInput, GetExpiry, Opcode};
use crate::storage::object::StoreObject;
use crate::storage::object_store::{ObjectInput, ObjectOutput};
use crate::storage::output::OutputBuffer;
use crate::storage::string_store::StringValue;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

impl StorageSession {
    /// Read with a caller-built input.
    pub fn read_raw(
        &mut self,
        key: &[u8],
        input: &CommandInput<'_>,
        output: &mut OutputBuffer<'_>,
    ) -> OpStatus {
        OpStatus::from_status(self.string_read(key, input, output))
    }

    /// RMW with a caller-built input.
    pub fn rmw_raw(
        &mut self,
        key: &[u8],
        input: &CommandInput<'_>,
        output: &mut OutputBuffer<'_>,
    ) -> OpStatus {
        OpStatus::from_status(self.string_rmw(key, input, output))
    }

    /// GET: the raw value into `output`.
    pub fn get(&mut self, key: &[u8], output: &mut OutputBuffer<'_>) -> OpStatus {
        let status = self.read_raw(key, &CommandInput::new(Opcode::Get), output);
        self.count_get(status);
        status
    }

    /// GET into a freshly allocated value.
    pub fn get_value(&mut self, key: &[u8]) -> Option<Bytes> {
        let mut output = OutputBuffer::unbound();
        match self.get(key, &mut output) {
            OpStatus::Ok => Some(output.finalize().into_bytes()),
            OpStatus::NotFound => None,
        }
    }

    /// GET against the object store; the object lands in `output.object`.
    pub fn get_object(&mut self, key: &Bytes, output: &mut ObjectOutput<'_>) -> OpStatus {
        let status = OpStatus::from_status(self.object_read(key, &ObjectInput::fetch(), output));
        self.count_get(status);
        status
    }

    fn count_get(&mut self, status: OpStatus) {
        match status {
            OpStatus::Ok => self.metrics.found += 1,
            OpStatus::NotFound => self.metrics.not_found += 1,
        }
    }

    /// GETEX: read the value and optionally change its expiration.
    pub fn get_ex(
        &mut self,
        key: &[u8],
        expiry: GetExpiry,
        output: &mut OutputBuffer<'_>,
    ) -> OpStatus {
        let status = self.rmw_raw(key, &CommandInput::get_ex(expiry), output);
        self.count_get(status);
        status
    }

    /// GETDEL: read the value and remove the key in one step.
    pub fn get_del(&mut self, key: &[u8], output: &mut OutputBuffer<'_>) -> OpStatus {
        let status = self.rmw_raw(key, &CommandInput::new(Opcode::GetDel), output);
        self.count_get(status);
        status
    }

    /// GETRANGE: `len` bytes from `offset`, clipped to the value. A negative
    /// offset counts back from the end. `output` stays empty for a missing
    /// key or an empty range.
    pub fn get_range(
        &mut self,
        key: &[u8],
        offset: i32,
        len: i32,
        output: &mut OutputBuffer<'_>,
    ) -> OpStatus {
        let status = self.read_raw(key, &CommandInput::get_range(offset, len), output);
        self.count_get(status);
        if !status.is_ok() {
            output.clear();
        }
        status
    }

    /// SET: blind write, always `Ok`.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> OpStatus {
        self.set_value(key, StringValue::new(value))
    }

    /// SET with an absolute expiration in ticks.
    pub fn set_with_expiration(&mut self, key: &[u8], value: &[u8], expire_at: i64) -> OpStatus {
        self.set_value(key, StringValue::with_expiration(value, expire_at))
    }

    fn set_value(&mut self, key: &[u8], value: StringValue<'_>) -> OpStatus {
        let status = self.string_ctx.upsert(key, value);
        debug_assert!(!status.is_pending(), "upsert went pending");
        OpStatus::Ok
    }

    /// SETEX: SET with an expiration `ttl` from now.
    pub fn setex(&mut self, key: &[u8], value: &[u8], ttl: Duration) -> OpStatus {
        self.set_with_expiration(key, value, clock::ticks_from_now(ttl))
    }

    /// SET of an object-store value.
    pub fn set_object(
        &mut self,
        key: Bytes,
        object: impl Into<Arc<StoreObject>>,
    ) -> Result<OpStatus> {
        if !self.object_store_enabled() {
            warn!(session = self.id, "object write refused: object store disabled");
            return Err(KvError::ObjectStoreDisabled);
        }
        let status = self.object_upsert(&key, object.into());
        debug_assert!(!status.is_pending(), "upsert went pending");
        Ok(OpStatus::Ok)
    }

    /// Conditional SET (SETEXNX / SETEXXX). `Ok` means the value was written.
    ///
    /// The engine status describes the key, not the write. SETEXNX writes
    /// only into an absent key, so its engine `NotFound` maps to `Ok` and
    /// `Found` maps to `NotFound`. SETEXXX writes only into a present key and
    /// maps straight through. A rejected input is `NotFound` for both.
    pub fn set_conditional(&mut self, key: &[u8], input: &CommandInput<'_>) -> OpStatus {
        let mut output = OutputBuffer::unbound();
        let status = self.string_rmw(key, input, &mut output);
        self.count_get(OpStatus::from_status(status));
        if output.as_slice().first() == Some(&b'-') {
            return OpStatus::NotFound;
        }
        let written = match input.opcode() {
            Ok(Opcode::SetExNx) => status == Status::NotFound,
            _ => status == Status::Found,
        };
        if written {
            OpStatus::Ok
        } else {
            OpStatus::NotFound
        }
    }

    /// SET ... NX: writes only if `key` is absent.
    pub fn set_nx(&mut self, key: &[u8], value: &[u8], expire_at: i64) -> OpStatus {
        self.set_conditional(
            key,
            &CommandInput::set_conditional(Opcode::SetExNx, value, expire_at),
        )
    }

    /// SET ... XX: writes only if `key` is present.
    pub fn set_xx(&mut self, key: &[u8], value: &[u8], expire_at: i64) -> OpStatus {
        self.set_conditional(
            key,
            &CommandInput::set_conditional(Opcode::SetExXx, value, expire_at),
        )
    }

    /// APPEND: returns the new length.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<usize> {
        let mut output = OutputBuffer::unbound();
        self.string_rmw(key, &CommandInput::append(value), &mut output);
        Ok(read_integer(output.as_slice())? as usize)
    }

    /// SETRANGE: overwrite at `offset`, zero-padding as needed; returns the
    /// new length.
    pub fn set_range(&mut self, key: &[u8], offset: i32, value: &[u8]) -> Result<usize> {
        let mut output = OutputBuffer::unbound();
        self.string_rmw(key, &CommandInput::set_range(offset, value), &mut output);
        Ok(read_integer(output.as_slice())? as usize)
    }

    /// INCRBY / DECRBY by `delta`; an absent key counts as 0.
    pub fn increment(&mut self, key: &[u8], delta: i64) -> Result<i64> {
        let mut output = OutputBuffer::unbound();
        self.string_rmw(key, &CommandInput::increment(delta), &mut output);
        read_decimal(output.as_slice()).map_err(|err| match err {
            ParseError::ErrorReply(message) if message == ERR_NOT_INTEGER => KvError::NotAnInteger,
            ParseError::ErrorReply(message) if message == ERR_OVERFLOW => KvError::Overflow,
            ParseError::ErrorReply(message) => KvError::Engine(message),
            other => KvError::Reply(other),
        })
    }

    pub fn decrement(&mut self, key: &[u8], delta: i64) -> Result<i64> {
        let delta = delta.checked_neg().ok_or(KvError::Overflow)?;
        self.increment(key, delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::StoreEngine;

    fn session() -> StorageSession {
        Arc::new(StoreEngine::default()).session()
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut session = session();
        let value: Vec<u8> = (0..=255).collect();
        assert_eq!(session.set(b"bin", &value), OpStatus::Ok);
        assert_eq!(session.get_value(b"bin").as_deref(), Some(&value[..]));
        assert_eq!(session.get_value(b"missing"), None);

        let metrics = session.metrics();
        assert_eq!((metrics.found, metrics.not_found), (1, 1));
    }

    #[test]
    fn test_get_into_inline_span() {
        let mut session = session();
        session.set(b"k", b"small");

        let mut span = [0u8; 16];
        let mut output = OutputBuffer::inline(&mut span);
        assert_eq!(session.get(b"k", &mut output), OpStatus::Ok);
        assert!(output.is_inline());
        assert_eq!(output.as_slice(), b"small");

        let big = vec![7u8; 64];
        session.set(b"big", &big);
        let mut span = [0u8; 16];
        let mut output = OutputBuffer::inline(&mut span);
        session.get(b"big", &mut output);
        assert!(!output.is_inline());
        assert_eq!(output.as_slice(), &big[..]);
    }

    #[test]
    fn test_getdel_removes_exactly_once() {
        let mut session = session();
        let mut output = OutputBuffer::unbound();
        assert_eq!(session.get_del(b"absent", &mut output), OpStatus::NotFound);
        assert!(session.engine().is_empty());

        session.set(b"k", b"v");
        assert_eq!(session.get_del(b"k", &mut output), OpStatus::Ok);
        assert_eq!(output.as_slice(), b"v");
        assert_eq!(session.get_del(b"k", &mut output), OpStatus::NotFound);
        assert_eq!(session.get_value(b"k"), None);
    }

    #[test]
    fn test_getex_changes_expiration() {
        let mut session = session();
        session.setex(b"k", b"v", Duration::from_secs(100));

        let mut output = OutputBuffer::unbound();
        assert_eq!(session.get_ex(b"k", GetExpiry::Persist, &mut output), OpStatus::Ok);
        assert_eq!(output.as_slice(), b"v");
        assert_eq!(
            session.ttl_value(b"k", Default::default(), clock::TimeUnit::Seconds),
            Ok(-1)
        );

        let at = clock::ticks_from_now(Duration::from_secs(50));
        session.get_ex(b"k", GetExpiry::At(at), &mut output);
        let ttl = session
            .ttl_value(b"k", Default::default(), clock::TimeUnit::Seconds)
            .unwrap();
        assert!(ttl > 48 && ttl <= 50);
    }

    #[test]
    fn test_get_range() {
        let mut session = session();
        session.set(b"k", b"Hello World");
        let mut output = OutputBuffer::unbound();

        assert_eq!(session.get_range(b"k", 0, 5, &mut output), OpStatus::Ok);
        assert_eq!(output.as_slice(), b"Hello");
        session.get_range(b"k", -5, 5, &mut output);
        assert_eq!(output.as_slice(), b"World");
        session.get_range(b"k", 6, 2, &mut output);
        assert_eq!(output.as_slice(), b"Wo");

        assert_eq!(session.get_range(b"nope", 0, 4, &mut output), OpStatus::NotFound);
        assert!(output.is_empty());
    }

    #[test]
    fn test_range_and_getex_count_hits_and_misses() {
        let mut session = session();
        session.set(b"k", b"Hello World");
        let mut output = OutputBuffer::unbound();

        session.get_range(b"k", 0, 5, &mut output);
        session.get_range(b"nope", 0, 5, &mut output);
        session.get_ex(b"k", GetExpiry::Unchanged, &mut output);
        session.get_ex(b"nope", GetExpiry::Persist, &mut output);
        session.get_ex(b"nope", GetExpiry::Unchanged, &mut output);

        let metrics = session.metrics();
        assert_eq!((metrics.found, metrics.not_found), (2, 3));
    }

    #[test]
    fn test_set_nx_inversion() {
        let mut session = session();
        assert_eq!(session.set_nx(b"k", b"first", 0), OpStatus::Ok);
        assert_eq!(session.set_nx(b"k", b"second", 0), OpStatus::NotFound);
        assert_eq!(session.get_value(b"k"), Some(Bytes::from("first")));

        let xx = CommandInput::set_conditional(Opcode::SetExXx, b"third", 0);
        assert_eq!(session.set_conditional(b"k", &xx), OpStatus::Ok);
        assert_eq!(session.get_value(b"k"), Some(Bytes::from("third")));
    }

    #[test]
    fn test_set_xx_present_is_ok() {
        let mut session = session();
        session.set(b"k", b"old");
        let at = clock::ticks_from_now(Duration::from_secs(100));

        assert_eq!(session.set_xx(b"k", b"new", at), OpStatus::Ok);
        assert_eq!(session.get_value(b"k"), Some(Bytes::from("new")));
        let ttl = session
            .ttl_value(b"k", Default::default(), clock::TimeUnit::Seconds)
            .unwrap();
        assert!(ttl > 98 && ttl <= 100);
    }

    #[test]
    fn test_set_xx_absent_is_not_found() {
        let mut session = session();
        assert_eq!(session.set_xx(b"k", b"new", 0), OpStatus::NotFound);
        assert_eq!(session.get_value(b"k"), None);
        assert!(session.engine().is_empty());

        // an expired key counts as absent
        session.set_with_expiration(b"gone", b"v", clock::now_ticks() - 1);
        assert_eq!(session.set_xx(b"gone", b"new", 0), OpStatus::NotFound);
        assert_eq!(session.get_value(b"gone"), None);
    }

    #[test]
    fn test_set_conditional_rejected_input_writes_nothing() {
        let mut session = session();
        // fields past the layout capacity fail to decode
        let bad = crate::storage::input::InputBuilder::new(Opcode::SetExNx)
            .put_i64(1)
            .put_i64(2)
            .put_i64(3)
            .build();
        assert_eq!(session.set_conditional(b"k", &bad), OpStatus::NotFound);
        assert_eq!(session.get_value(b"k"), None);
    }

    #[test]
    fn test_setex_ttl_bounds() {
        let mut session = session();
        session.setex(b"k", b"v", Duration::from_millis(10_000));

        let ttl = session
            .ttl_value(b"k", Default::default(), clock::TimeUnit::Milliseconds)
            .unwrap();
        assert!(ttl > 0 && ttl <= 10_000);

        session.setex(b"brief", b"v", Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(session.get_value(b"brief"), None);
        assert_eq!(session.exists(b"brief", Default::default()), OpStatus::NotFound);
    }

    #[test]
    fn test_append_and_set_range_lengths() {
        let mut session = session();
        assert_eq!(session.append(b"k", b"Hello"), Ok(5));
        assert_eq!(session.append(b"k", b" World"), Ok(11));
        assert_eq!(session.set_range(b"k", 6, b"Redis"), Ok(11));
        assert_eq!(session.get_value(b"k"), Some(Bytes::from("Hello Redis")));

        assert_eq!(session.set_range(b"pad", 2, b"x"), Ok(3));
        assert_eq!(session.get_value(b"pad"), Some(Bytes::from_static(b"\0\0x")));
        assert_eq!(session.set_range(b"none", 2, b""), Ok(0));
        assert_eq!(session.get_value(b"none"), None);
    }

    #[test]
    fn test_increment_arithmetic() {
        let mut session = session();
        assert_eq!(session.increment(b"n", 5), Ok(5));
        assert_eq!(session.increment(b"n", -3), Ok(2));
        assert_eq!(session.decrement(b"n", 4), Ok(-2));

        session.set(b"text", b"hello");
        assert_eq!(session.increment(b"text", 1), Err(KvError::NotAnInteger));

        session.set(b"max", i64::MAX.to_string().as_bytes());
        assert_eq!(session.increment(b"max", 1), Err(KvError::Overflow));
        assert_eq!(session.decrement(b"n", i64::MIN), Err(KvError::Overflow));
    }

    #[test]
    fn test_object_writes_need_the_object_store() {
        let engine = Arc::new(StoreEngine::new(
            EngineConfig::builder().object_store_enabled(false).build().unwrap(),
        ));
        let mut session = engine.session();
        let result = session.set_object(Bytes::from("o"), StoreObject::list(Vec::new()));
        assert_eq!(result, Err(KvError::ObjectStoreDisabled));

        let mut output = ObjectOutput::default();
        assert_eq!(session.get_object(&Bytes::from("o"), &mut output), OpStatus::NotFound);
    }
}
