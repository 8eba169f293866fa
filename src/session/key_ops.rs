//! Key Commands
//!
//! Commands addressed to a key regardless of which store holds it: DELETE,
//! EXISTS, the EXPIRE and TTL families, PERSIST, WATCH, TYPE and MEMORY
//! USAGE. All of them route through the scope combinators.

use super::{KeyType, OpStatus, StorageSession};
use crate::error::Result;
use crate::protocol::parser::read_integer;
use crate::storage::clock::{self, TimeUnit};
use crate::storage::context::{RecordStoreContext, Status, StoreKind, StoreScope};
use crate::storage::input::{CommandInput, ExpireOption, Opcode};
use crate::storage::object::{ObjectKind, ObjectOp};
use crate::storage::object_store::{ObjectInput, ObjectOutput};
use crate::storage::output::{OutputBuffer, OutputHeader};
use crate::txn::LockType;
use bytes::Bytes;
use std::time::Duration;

/// Per-record header of a string record, and the allocation alignment.
const RECORD_INFO_SIZE: i64 = 8;

/// Size of the length prefix stored with string keys and values.
const LENGTH_PREFIX_SIZE: i64 = 4;

/// Object-store record: header, key reference and value reference.
const OBJECT_RECORD_SIZE: i64 = RECORD_INFO_SIZE + 2 * 8;

/// Heap overhead of an owned object-store key.
const KEY_ALLOCATION_OVERHEAD: i64 = 24;

#[inline]
fn round_up(n: i64, to: i64) -> i64 {
    (n + to - 1) / to * to
}

/// Whether an EXPIRE/PERSIST reply header reports a change.
fn header_set(output: &OutputBuffer<'_>) -> bool {
    OutputHeader::read(output.as_slice()).is_some_and(|h| h.result1 == 1)
}

fn persisted(found: bool, output: &OutputBuffer<'_>) -> OpStatus {
    if found && header_set(output) {
        OpStatus::Ok
    } else {
        OpStatus::NotFound
    }
}

impl StorageSession {
    /// DELETE: object store first, then the string store if the object
    /// store did not have the key.
    pub fn delete(&mut self, key: &[u8], scope: StoreScope) -> OpStatus {
        self.try_object_first(
            scope,
            &mut (),
            |session, _| {
                let status = session.string_delete(key);
                OpStatus::from_status(status)
            },
            |session, _| {
                let status = session.object_delete(&Bytes::copy_from_slice(key));
                debug_assert!(!status.is_pending(), "object delete went pending");
                OpStatus::from_status(status)
            },
        )
    }

    fn string_delete(&mut self, key: &[u8]) -> Status {
        let status = self.string_ctx.delete(key);
        debug_assert!(!status.is_pending(), "string delete went pending");
        status
    }

    /// EXISTS: any store holding a live record answers `Ok`.
    pub fn exists(&mut self, key: &[u8], scope: StoreScope) -> OpStatus {
        self.try_in_scope(
            scope,
            &mut (),
            |session, _| {
                let mut output = OutputBuffer::unbound();
                session.read_raw(key, &CommandInput::new(Opcode::Get), &mut output)
            },
            |session, _| {
                let mut output = ObjectOutput::default();
                let key = Bytes::copy_from_slice(key);
                OpStatus::from_status(session.object_read(&key, &ObjectInput::fetch(), &mut output))
            },
        )
    }

    /// EXPIRE / PEXPIRE: set the expiration `ttl` from now.
    ///
    /// # Returns
    ///
    /// The status and whether the timeout was actually changed.
    pub fn expire(
        &mut self,
        key: &[u8],
        ttl: Duration,
        option: ExpireOption,
        scope: StoreScope,
    ) -> (OpStatus, bool) {
        let opcode = if ttl.subsec_millis() == 0 {
            Opcode::Expire
        } else {
            Opcode::PExpire
        };
        self.expire_ticks(key, clock::ticks_from_now(ttl), opcode, option, scope)
    }

    /// EXPIREAT / PEXPIREAT: set an absolute Unix expiration in `unit`.
    pub fn expire_at(
        &mut self,
        key: &[u8],
        timestamp: i64,
        unit: TimeUnit,
        option: ExpireOption,
        scope: StoreScope,
    ) -> (OpStatus, bool) {
        let opcode = match unit {
            TimeUnit::Seconds => Opcode::Expire,
            TimeUnit::Milliseconds => Opcode::PExpire,
        };
        self.expire_ticks(key, clock::unix_to_ticks(timestamp, unit), opcode, option, scope)
    }

    fn expire_ticks(
        &mut self,
        key: &[u8],
        expire_at: i64,
        opcode: Opcode,
        option: ExpireOption,
        scope: StoreScope,
    ) -> (OpStatus, bool) {
        let mut timeout_set = false;
        let status = self.try_in_scope(
            scope,
            &mut timeout_set,
            |session, timeout_set| {
                let mut output = OutputBuffer::unbound();
                let input = CommandInput::expire(opcode, expire_at, option);
                let status = session.rmw_raw(key, &input, &mut output);
                *timeout_set = status.is_ok() && header_set(&output);
                status
            },
            |session, timeout_set| {
                let mut output = ObjectOutput::default();
                let input = ObjectInput::new(ObjectOp::Expire { expire_at, option });
                let key = Bytes::copy_from_slice(key);
                let status = OpStatus::from_status(session.object_rmw(&key, &input, &mut output));
                *timeout_set = status.is_ok() && header_set(&output.buffer);
                status
            },
        );
        (status, timeout_set)
    }

    /// PERSIST: `Ok` only if an expiration was removed. A store holding the
    /// key without an expiration does not stop the lookup.
    pub fn persist(&mut self, key: &[u8], scope: StoreScope) -> OpStatus {
        self.try_in_scope(
            scope,
            &mut (),
            |session, _| {
                let mut output = OutputBuffer::unbound();
                let status = session.rmw_raw(key, &CommandInput::new(Opcode::Persist), &mut output);
                persisted(status.is_ok(), &output)
            },
            |session, _| {
                let mut output = ObjectOutput::default();
                let key = Bytes::copy_from_slice(key);
                let status =
                    session.object_rmw(&key, &ObjectInput::new(ObjectOp::Persist), &mut output);
                persisted(status.found(), &output.buffer)
            },
        )
    }

    /// TTL / PTTL as a RESP integer reply; `-1` for a key without expiry.
    pub fn ttl(
        &mut self,
        key: &[u8],
        scope: StoreScope,
        unit: TimeUnit,
        output: &mut OutputBuffer<'_>,
    ) -> OpStatus {
        let opcode = match unit {
            TimeUnit::Seconds => Opcode::Ttl,
            TimeUnit::Milliseconds => Opcode::PTtl,
        };
        self.query_in_scope(key, scope, opcode, ObjectOp::Ttl(unit), output)
    }

    /// EXPIRETIME / PEXPIRETIME as a RESP integer reply; `-1` for a key
    /// without expiry.
    pub fn expire_time(
        &mut self,
        key: &[u8],
        scope: StoreScope,
        unit: TimeUnit,
        output: &mut OutputBuffer<'_>,
    ) -> OpStatus {
        let opcode = match unit {
            TimeUnit::Seconds => Opcode::ExpireTime,
            TimeUnit::Milliseconds => Opcode::PExpireTime,
        };
        self.query_in_scope(key, scope, opcode, ObjectOp::ExpireTime(unit), output)
    }

    /// TTL as a number: `-2` for a missing key, `-1` for no expiry.
    pub fn ttl_value(&mut self, key: &[u8], scope: StoreScope, unit: TimeUnit) -> Result<i64> {
        let mut output = OutputBuffer::unbound();
        match self.ttl(key, scope, unit, &mut output) {
            OpStatus::Ok => Ok(read_integer(output.as_slice())?),
            OpStatus::NotFound => Ok(-2),
        }
    }

    /// EXPIRETIME as a number: `-2` for a missing key, `-1` for no expiry.
    pub fn expire_time_value(
        &mut self,
        key: &[u8],
        scope: StoreScope,
        unit: TimeUnit,
    ) -> Result<i64> {
        let mut output = OutputBuffer::unbound();
        match self.expire_time(key, scope, unit, &mut output) {
            OpStatus::Ok => Ok(read_integer(output.as_slice())?),
            OpStatus::NotFound => Ok(-2),
        }
    }

    /// Read-only query in both stores, writing the reply into the caller's
    /// buffer. The buffer is lent to the object store and handed back.
    fn query_in_scope(
        &mut self,
        key: &[u8],
        scope: StoreScope,
        opcode: Opcode,
        object_op: ObjectOp,
        output: &mut OutputBuffer<'_>,
    ) -> OpStatus {
        self.try_in_scope(
            scope,
            output,
            |session, output| session.read_raw(key, &CommandInput::new(opcode), output),
            |session, output| {
                let mut object_output = ObjectOutput::new(std::mem::take(output));
                let key = Bytes::copy_from_slice(key);
                let input = ObjectInput::new(object_op);
                let status = session.object_read(&key, &input, &mut object_output);
                *output = object_output.buffer;
                OpStatus::from_status(status)
            },
        )
    }

    /// WATCH: remember the key's current version for EXEC-time validation.
    ///
    /// # Returns
    ///
    /// Whether the session may read the key under its current transaction.
    pub fn watch(&mut self, key: &[u8], scope: StoreScope) -> bool {
        self.txn.watch(key, scope);
        scope.stores().all(|store| {
            self.txn
                .verify_key_ownership(key, store == StoreKind::Object, LockType::Shared)
        })
    }

    /// TYPE: `string` for the string store, the object variant otherwise.
    pub fn key_type(&mut self, key: &[u8]) -> (OpStatus, KeyType) {
        if self.exists(key, StoreScope::StringOnly).is_ok() {
            return (OpStatus::Ok, KeyType::String);
        }

        let mut output = ObjectOutput::default();
        let status = self.get_object(&Bytes::copy_from_slice(key), &mut output);
        match output.object {
            Some(object) if status.is_ok() => {
                let key_type = match object.kind() {
                    ObjectKind::List => KeyType::List,
                    ObjectKind::Set => KeyType::Set,
                    ObjectKind::Hash => KeyType::Hash,
                    ObjectKind::SortedSet => KeyType::SortedSet,
                    // custom types keep the default tag
                    ObjectKind::Custom(_) => KeyType::String,
                };
                (OpStatus::Ok, key_type)
            }
            _ => (OpStatus::NotFound, KeyType::None),
        }
    }

    /// MEMORY USAGE: estimated bytes the key's record occupies, `-1` if the
    /// key is in neither store.
    pub fn memory_usage(&mut self, key: &[u8]) -> (OpStatus, i64) {
        let key_len = key.len() as i64;

        let mut output = OutputBuffer::unbound();
        if self.get(key, &mut output).is_ok() {
            let value_len = output.len() as i64;
            let usage = RECORD_INFO_SIZE
                + round_up(key_len + LENGTH_PREFIX_SIZE, RECORD_INFO_SIZE)
                + round_up(value_len + LENGTH_PREFIX_SIZE, RECORD_INFO_SIZE);
            return (OpStatus::Ok, usage);
        }

        let mut output = ObjectOutput::default();
        let status = self.get_object(&Bytes::copy_from_slice(key), &mut output);
        match output.object {
            Some(object) if status.is_ok() => {
                let usage = OBJECT_RECORD_SIZE
                    + round_up(key_len, 8)
                    + KEY_ALLOCATION_OVERHEAD
                    + object.size();
                (OpStatus::Ok, usage)
            }
            _ => (OpStatus::NotFound, -1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::object::StoreObject;
    use crate::storage::StoreEngine;
    use std::sync::Arc;

    fn session() -> StorageSession {
        Arc::new(StoreEngine::default()).session()
    }

    fn list() -> StoreObject {
        StoreObject::list([Bytes::from("a"), Bytes::from("b")])
    }

    #[test]
    fn test_delete_prefers_object_store() {
        let mut session = session();
        session.set_object(Bytes::from("k"), list()).unwrap();
        session.set(b"k", b"string shadow");

        assert_eq!(session.delete(b"k", StoreScope::Both), OpStatus::Ok);
        // the object went first; the string record is still there
        assert_eq!(session.get_value(b"k"), Some(Bytes::from("string shadow")));
        assert_eq!(session.delete(b"k", StoreScope::Both), OpStatus::Ok);
        assert_eq!(session.delete(b"k", StoreScope::Both), OpStatus::NotFound);
    }

    #[test]
    fn test_dual_store_exists_and_delete() {
        let mut session = session();
        session.set_object(Bytes::from("obj"), list()).unwrap();

        assert_eq!(session.exists(b"obj", StoreScope::StringOnly), OpStatus::NotFound);
        assert_eq!(session.exists(b"obj", StoreScope::Both), OpStatus::Ok);
        assert_eq!(session.delete(b"obj", StoreScope::Both), OpStatus::Ok);
        assert_eq!(session.exists(b"obj", StoreScope::Both), OpStatus::NotFound);
    }

    #[test]
    fn test_expire_options() {
        let mut session = session();
        session.set(b"k", b"v");

        let (status, set) = session.expire(
            b"k",
            Duration::from_millis(5000),
            ExpireOption::OnlyIfHasExpiry,
            StoreScope::Both,
        );
        assert_eq!((status, set), (OpStatus::Ok, false));
        assert_eq!(session.ttl_value(b"k", StoreScope::Both, TimeUnit::Milliseconds), Ok(-1));

        let (status, set) = session.expire(
            b"k",
            Duration::from_millis(5000),
            ExpireOption::OnlyIfNoExpiry,
            StoreScope::Both,
        );
        assert_eq!((status, set), (OpStatus::Ok, true));
        let ttl = session
            .ttl_value(b"k", StoreScope::Both, TimeUnit::Milliseconds)
            .unwrap();
        assert!(ttl > 4900 && ttl <= 5000);

        let (status, set) = session.expire(
            b"missing",
            Duration::from_secs(1),
            Default::default(),
            StoreScope::Both,
        );
        assert_eq!((status, set), (OpStatus::NotFound, false));
    }

    #[test]
    fn test_expire_reaches_objects() {
        let mut session = session();
        session.set_object(Bytes::from("obj"), list()).unwrap();

        let (status, set) =
            session.expire(b"obj", Duration::from_secs(60), Default::default(), StoreScope::Both);
        assert_eq!((status, set), (OpStatus::Ok, true));
        let ttl = session
            .ttl_value(b"obj", StoreScope::Both, TimeUnit::Seconds)
            .unwrap();
        assert!(ttl > 58 && ttl <= 60);

        assert_eq!(session.persist(b"obj", StoreScope::Both), OpStatus::Ok);
        assert_eq!(session.ttl_value(b"obj", StoreScope::Both, TimeUnit::Seconds), Ok(-1));
        assert_eq!(session.persist(b"obj", StoreScope::Both), OpStatus::NotFound);
    }

    #[test]
    fn test_expire_at_absolute() {
        let mut session = session();
        session.set(b"k", b"v");
        let now_ms = clock::ticks_to_unix(clock::now_ticks(), TimeUnit::Milliseconds);
        let at = now_ms + 30_000;

        let (status, set) = session.expire_at(
            b"k",
            at,
            TimeUnit::Milliseconds,
            ExpireOption::Unconditional,
            StoreScope::Both,
        );
        assert_eq!((status, set), (OpStatus::Ok, true));
        assert_eq!(
            session.expire_time_value(b"k", StoreScope::Both, TimeUnit::Milliseconds),
            Ok(at)
        );
        assert_eq!(
            session.expire_time_value(b"k", StoreScope::Both, TimeUnit::Seconds),
            Ok(at / 1000)
        );

        // GT against a later instant fails, LT succeeds
        let (_, set) = session.expire_at(
            b"k",
            at + 1000,
            TimeUnit::Milliseconds,
            ExpireOption::OnlyIfLess,
            StoreScope::Both,
        );
        assert!(!set);
        let (_, set) = session.expire_at(
            b"k",
            at + 1000,
            TimeUnit::Milliseconds,
            ExpireOption::OnlyIfGreater,
            StoreScope::Both,
        );
        assert!(set);
    }

    #[test]
    fn test_persist_string_key() {
        let mut session = session();
        session.set(b"plain", b"v");
        assert_eq!(session.persist(b"plain", StoreScope::Both), OpStatus::NotFound);

        session.setex(b"timed", b"v", Duration::from_secs(10));
        assert_eq!(session.persist(b"timed", StoreScope::Both), OpStatus::Ok);
        assert_eq!(session.ttl_value(b"timed", StoreScope::Both, TimeUnit::Seconds), Ok(-1));
    }

    #[test]
    fn test_ttl_missing_key() {
        let mut session = session();
        assert_eq!(session.ttl_value(b"nope", StoreScope::Both, TimeUnit::Seconds), Ok(-2));
        assert_eq!(
            session.expire_time_value(b"nope", StoreScope::Both, TimeUnit::Seconds),
            Ok(-2)
        );
    }

    #[test]
    fn test_key_type() {
        let mut session = session();
        session.set(b"s", b"v");
        session.set_object(Bytes::from("l"), list()).unwrap();
        session
            .set_object(Bytes::from("z"), StoreObject::sorted_set([(Bytes::from("m"), 1.0)]))
            .unwrap();
        session
            .set_object(Bytes::from("c"), StoreObject::custom(3, "payload"))
            .unwrap();

        assert_eq!(session.key_type(b"s"), (OpStatus::Ok, KeyType::String));
        assert_eq!(session.key_type(b"l"), (OpStatus::Ok, KeyType::List));
        assert_eq!(session.key_type(b"z"), (OpStatus::Ok, KeyType::SortedSet));
        assert_eq!(session.key_type(b"c"), (OpStatus::Ok, KeyType::String));
        assert_eq!(session.key_type(b"none"), (OpStatus::NotFound, KeyType::None));
    }

    #[test]
    fn test_memory_usage() {
        let mut session = session();
        session.set(b"key", b"value");
        // 8 + round_up(3 + 4, 8) + round_up(5 + 4, 8)
        assert_eq!(session.memory_usage(b"key"), (OpStatus::Ok, 8 + 8 + 16));

        let object = list();
        let size = object.size();
        session.set_object(Bytes::from("obj"), object).unwrap();
        assert_eq!(
            session.memory_usage(b"obj"),
            (OpStatus::Ok, 24 + 8 + 24 + size)
        );

        assert_eq!(session.memory_usage(b"absent"), (OpStatus::NotFound, -1));
    }

    #[test]
    fn test_watch_sees_other_sessions_writes() {
        let engine = Arc::new(StoreEngine::default());
        let mut watcher = engine.session();
        let mut writer = engine.session();

        assert!(watcher.watch(b"k", StoreScope::Both));
        assert!(watcher.transaction().validate_watches());

        writer.set(b"k", b"changed");
        assert!(!watcher.transaction().validate_watches());
    }

    #[test]
    fn test_watch_ownership_checks_each_store() {
        let engine = Arc::new(StoreEngine::default());
        let mut session = engine.session();

        let txn = session.transaction();
        txn.save_key_entry_to_lock(b"k", false, LockType::Shared);
        txn.run().unwrap();

        assert!(session.watch(b"k", StoreScope::StringOnly));
        assert!(!session.watch(b"k", StoreScope::ObjectOnly));
        assert!(!session.watch(b"k", StoreScope::Both));
        session.transaction().commit().unwrap();

        assert!(session.watch(b"k", StoreScope::Both));
    }
}
