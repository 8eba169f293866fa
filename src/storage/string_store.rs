//! Raw Byte-String Store
//!
//! Values are opaque byte strings with an extra-metadata field holding the
//! absolute expiration instant. The store reacts to a [`CommandInput`]
//! through two callbacks:
//!
//! - **reader**: runs for Read under the shard's read lock
//! - **rmw**: runs for RMW under the shard's write lock, against the record
//!   slot (empty when the key is absent, which is the "initial update" case)
//!
//! ## Status conventions
//!
//! - Read answers `Found` only for a live record.
//! - RMW answers `Found` when a live record existed before the call and
//!   `NotFound` when it did not, whether or not the call created one. A
//!   conditional set-if-absent therefore *succeeds* with `NotFound`.
//!
//! Expired records behave as absent everywhere; an RMW that meets one drops
//! it before running.

use crate::error::KvError;
use crate::protocol::types::{write_bulk, write_decimal, ERR_NOT_INTEGER, ERR_OVERFLOW};
use crate::protocol::RespValue;
use crate::storage::clock::{self, NO_EXPIRATION};
use crate::storage::context::{
    Completion, ContextBase, RecordStoreContext, RmwOutcome, Status, StoreKind,
};
use crate::storage::input::{CommandInput, GetExpiry, StringCommand};
use crate::storage::output::{OutputBuffer, OutputHeader};
use crate::storage::tiered::{Residency, TieredMap};
use crate::txn::LockType;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// A stored string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRecord {
    pub value: Bytes,
    /// Absolute expiration in ticks, [`NO_EXPIRATION`] if none
    pub expire_at: i64,
}

impl StringRecord {
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expire_at: NO_EXPIRATION,
        }
    }

    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        clock::is_expired(self.expire_at, now)
    }
}

/// Value handed to Upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringValue<'a> {
    pub data: &'a [u8],
    pub expire_at: i64,
}

impl<'a> StringValue<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            expire_at: NO_EXPIRATION,
        }
    }

    pub fn with_expiration(data: &'a [u8], expire_at: i64) -> Self {
        Self { data, expire_at }
    }
}

/// The byte-string store shared by every session.
#[derive(Debug)]
pub struct StringStore {
    records: TieredMap<StringRecord>,

    /// Statistics: expired records removed by sweeps
    expired_count: AtomicU64,

    /// Statistics: records brought back from the on-disk tier
    fault_count: AtomicU64,
}

impl StringStore {
    pub fn new(resident_limit: Option<usize>) -> Self {
        Self {
            records: TieredMap::new(resident_limit),
            expired_count: AtomicU64::new(0),
            fault_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn read(
        &self,
        key: &[u8],
        cmd: &StringCommand<'_>,
        output: &mut OutputBuffer<'_>,
    ) -> Residency<bool> {
        let now = clock::now_ticks();
        self.records
            .read(key, |record| reader(record, cmd, output, now))
    }

    pub(crate) fn rmw(
        &self,
        key: &[u8],
        cmd: &StringCommand<'_>,
        output: &mut OutputBuffer<'_>,
    ) -> Residency<RmwOutcome> {
        let now = clock::now_ticks();
        self.records.update(key, |slot| {
            if slot.as_ref().is_some_and(|r| r.is_expired(now)) {
                *slot = None;
            }
            rmw(slot, cmd, output, now)
        })
    }

    pub(crate) fn upsert(&self, key: &[u8], value: StringValue<'_>) {
        self.records.upsert(
            Bytes::copy_from_slice(key),
            StringRecord {
                value: Bytes::copy_from_slice(value.data),
                expire_at: value.expire_at,
            },
        );
    }

    /// Removes the key. `true` only if a live record was removed.
    pub(crate) fn delete(&self, key: &[u8]) -> bool {
        let now = clock::now_ticks();
        self.records
            .remove(key)
            .is_some_and(|record| !record.is_expired(now))
    }

    pub(crate) fn fault_in(&self, key: &[u8]) -> bool {
        let faulted = self.records.fault_in(key);
        if faulted {
            self.fault_count.fetch_add(1, Ordering::Relaxed);
        }
        faulted
    }

    pub fn evict(&self, key: &[u8]) -> bool {
        self.records.evict(key)
    }

    pub fn evict_all(&self) -> usize {
        self.records.evict_all()
    }

    /// Removes every expired record from both tiers.
    pub fn cleanup_expired(&self) -> u64 {
        let now = clock::now_ticks();
        let removed = self.records.retain(|record| !record.is_expired(now)) as u64;
        self.expired_count.fetch_add(removed, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn resident_len(&self) -> usize {
        self.records.resident_len()
    }

    pub fn on_disk_len(&self) -> usize {
        self.records.on_disk_len()
    }

    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    pub fn fault_count(&self) -> u64 {
        self.fault_count.load(Ordering::Relaxed)
    }
}

// ============================================================================
// STORE CALLBACKS
// ============================================================================

fn reader(
    record: Option<&StringRecord>,
    cmd: &StringCommand<'_>,
    output: &mut OutputBuffer<'_>,
    now: i64,
) -> bool {
    let Some(record) = record.filter(|r| !r.is_expired(now)) else {
        return false;
    };

    match *cmd {
        StringCommand::ReadResp => write_bulk(&record.value, output),
        StringCommand::GetRange { offset, len } => {
            let range = clip_range(record.value.len(), offset, len).unwrap_or(0..0);
            output.fill(&record.value[range]);
        }
        StringCommand::Ttl(unit) => {
            let ttl = match record.expire_at {
                NO_EXPIRATION => -1,
                at => clock::remaining(at, now, unit),
            };
            RespValue::integer(ttl).write_to(output);
        }
        StringCommand::ExpireTime(unit) => {
            let at = match record.expire_at {
                NO_EXPIRATION => -1,
                at => clock::ticks_to_unix(at, unit),
            };
            RespValue::integer(at).write_to(output);
        }
        // Raw value for GET and for anything that is not a read opcode
        _ => output.fill(&record.value),
    }
    true
}

fn rmw(
    slot: &mut Option<StringRecord>,
    cmd: &StringCommand<'_>,
    output: &mut OutputBuffer<'_>,
    now: i64,
) -> RmwOutcome {
    let record = match slot {
        Some(record) => record,
        None => return initial_update(slot, cmd, output),
    };

    match *cmd {
        StringCommand::GetEx(expiry) => {
            output.fill(&record.value);
            let mutated = match expiry {
                GetExpiry::Unchanged => false,
                GetExpiry::Persist => {
                    std::mem::replace(&mut record.expire_at, NO_EXPIRATION) != NO_EXPIRATION
                }
                GetExpiry::At(at) => {
                    record.expire_at = at;
                    true
                }
            };
            RmwOutcome::found(mutated)
        }
        StringCommand::GetDel => {
            output.fill(&record.value);
            *slot = None;
            RmwOutcome::found(true)
        }
        // Key exists: the set-if-absent condition fails, nothing is written
        StringCommand::SetIfAbsent { .. } => RmwOutcome::found(false),
        StringCommand::SetIfPresent { value, expire_at } => {
            *record = StringRecord {
                value: Bytes::copy_from_slice(value),
                expire_at,
            };
            RmwOutcome::found(true)
        }
        StringCommand::Append { value } => {
            if !value.is_empty() {
                let mut buf = take_mut(&mut record.value);
                buf.extend_from_slice(value);
                record.value = buf.freeze();
            }
            RespValue::integer(record.value.len() as i64).write_to(output);
            RmwOutcome::found(!value.is_empty())
        }
        StringCommand::SetRange { offset, value } => {
            if !value.is_empty() {
                let offset = offset.max(0) as usize;
                let mut buf = take_mut(&mut record.value);
                if buf.len() < offset + value.len() {
                    buf.resize(offset + value.len(), 0);
                }
                buf[offset..offset + value.len()].copy_from_slice(value);
                record.value = buf.freeze();
            }
            RespValue::integer(record.value.len() as i64).write_to(output);
            RmwOutcome::found(!value.is_empty())
        }
        StringCommand::Increment {
            magnitude,
            negative,
        } => match increment(Some(&record.value[..]), magnitude, negative) {
            Ok(next) => {
                record.value = integer_value(next);
                write_decimal(next, output);
                RmwOutcome::found(true)
            }
            Err(message) => {
                RespValue::error(message).write_to(output);
                RmwOutcome::found(false)
            }
        },
        StringCommand::Expire { expire_at, option } => {
            let allowed = option.allows(record.expire_at, expire_at);
            if allowed {
                record.expire_at = expire_at;
            }
            OutputHeader::new(allowed as i32).write_to(output);
            RmwOutcome::found(allowed)
        }
        StringCommand::Persist => {
            let had_expiration = record.expire_at != NO_EXPIRATION;
            record.expire_at = NO_EXPIRATION;
            OutputHeader::new(had_expiration as i32).write_to(output);
            RmwOutcome::found(had_expiration)
        }
        StringCommand::ReadResp
        | StringCommand::Get
        | StringCommand::GetRange { .. }
        | StringCommand::Ttl(_)
        | StringCommand::ExpireTime(_) => {
            reader(Some(&*record), cmd, output, now);
            RmwOutcome::found(false)
        }
    }
}

/// RMW against an absent key: only creating commands write a record.
fn initial_update(
    slot: &mut Option<StringRecord>,
    cmd: &StringCommand<'_>,
    output: &mut OutputBuffer<'_>,
) -> RmwOutcome {
    match *cmd {
        StringCommand::SetIfAbsent { value, expire_at } => {
            *slot = Some(StringRecord {
                value: Bytes::copy_from_slice(value),
                expire_at,
            });
            RmwOutcome::not_found(true)
        }
        StringCommand::Append { value } => {
            *slot = Some(StringRecord::new(Bytes::copy_from_slice(value)));
            RespValue::integer(value.len() as i64).write_to(output);
            RmwOutcome::not_found(true)
        }
        StringCommand::SetRange { offset, value } => {
            if value.is_empty() {
                RespValue::integer(0).write_to(output);
                return RmwOutcome::not_found(false);
            }
            let offset = offset.max(0) as usize;
            let mut buf = BytesMut::zeroed(offset);
            buf.extend_from_slice(value);
            let len = buf.len();
            *slot = Some(StringRecord::new(buf.freeze()));
            RespValue::integer(len as i64).write_to(output);
            RmwOutcome::not_found(true)
        }
        StringCommand::Increment {
            magnitude,
            negative,
        } => match increment(None, magnitude, negative) {
            Ok(next) => {
                *slot = Some(StringRecord::new(integer_value(next)));
                write_decimal(next, output);
                RmwOutcome::not_found(true)
            }
            Err(message) => {
                RespValue::error(message).write_to(output);
                RmwOutcome::not_found(false)
            }
        },
        StringCommand::Expire { .. } | StringCommand::Persist => {
            OutputHeader::new(0).write_to(output);
            RmwOutcome::not_found(false)
        }
        _ => RmwOutcome::not_found(false),
    }
}

/// Clips `count` bytes from `offset` to a value of `len` bytes. A negative
/// offset counts back from the end and stops at the first byte.
fn clip_range(len: usize, offset: i32, count: i32) -> Option<Range<usize>> {
    let len = len as i64;
    let mut start = offset as i64;
    if start < 0 {
        start += len;
    }
    let start = start.max(0);
    let end = (start + count as i64).min(len);
    (count > 0 && start < end).then(|| start as usize..end as usize)
}

fn increment(current: Option<&[u8]>, magnitude: u64, negative: bool) -> Result<i64, &'static str> {
    let base = match current {
        None => 0,
        Some(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(ERR_NOT_INTEGER)?,
    };
    let delta = magnitude as i128;
    let next = if negative {
        base as i128 - delta
    } else {
        base as i128 + delta
    };
    i64::try_from(next).map_err(|_| ERR_OVERFLOW)
}

fn integer_value(n: i64) -> Bytes {
    let mut digits = [0u8; crate::protocol::types::MAX_I64_DIGITS];
    Bytes::copy_from_slice(crate::protocol::types::format_i64(n, &mut digits))
}

/// Takes the value for in-place growth; copies only when it is shared.
fn take_mut(value: &mut Bytes) -> BytesMut {
    match std::mem::take(value).try_into_mut() {
        Ok(buf) => buf,
        Err(shared) => BytesMut::from(&shared[..]),
    }
}

// ============================================================================
// SESSION CONTEXT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Read,
    Rmw,
}

#[derive(Debug)]
struct PendingOp {
    kind: PendingKind,
    key: Bytes,
    input: CommandInput<'static>,
}

/// A session's handle on the [`StringStore`].
#[derive(Debug)]
pub struct StringContext {
    store: Arc<StringStore>,
    base: ContextBase,
    pending: VecDeque<PendingOp>,
}

impl StringContext {
    pub(crate) fn new(store: Arc<StringStore>, base: ContextBase) -> Self {
        Self {
            store,
            base,
            pending: VecDeque::new(),
        }
    }

    fn park(&mut self, kind: PendingKind, key: &[u8], input: &CommandInput<'_>) -> Status {
        trace!(?kind, "string store record on disk, operation pending");
        self.pending.push_back(PendingOp {
            kind,
            key: Bytes::copy_from_slice(key),
            input: input.detach(),
        });
        Status::Pending
    }
}

/// Answers an undecodable input with an error reply instead of running it.
fn reject(err: KvError, output: &mut OutputBuffer<'_>) -> Status {
    warn!(error = %err, "rejecting string store input");
    RespValue::error(format!("ERR {err}")).write_to(output);
    Status::NotFound
}

impl RecordStoreContext for StringContext {
    type Key = [u8];
    type Value<'v> = StringValue<'v>;
    type Input<'i> = CommandInput<'i>;
    type Output<'o> = OutputBuffer<'o>;

    fn kind(&self) -> StoreKind {
        StoreKind::String
    }

    fn read(
        &mut self,
        key: &[u8],
        input: &CommandInput<'_>,
        output: &mut OutputBuffer<'_>,
    ) -> Status {
        let cmd = match input.decode() {
            Ok(cmd) => cmd,
            Err(err) => return reject(err, output),
        };
        let residency = {
            let _lock = self.base.lock(StoreKind::String, key, LockType::Shared);
            self.store.read(key, &cmd, output)
        };
        match residency {
            Residency::Resident(found) => Status::from_found(found),
            Residency::OnDisk => self.park(PendingKind::Read, key, input),
        }
    }

    fn rmw(
        &mut self,
        key: &[u8],
        input: &CommandInput<'_>,
        output: &mut OutputBuffer<'_>,
    ) -> Status {
        let cmd = match input.decode() {
            Ok(cmd) => cmd,
            Err(err) => return reject(err, output),
        };
        let residency = {
            let _lock = self.base.lock(StoreKind::String, key, LockType::Exclusive);
            self.store.rmw(key, &cmd, output)
        };
        match residency {
            Residency::Resident(outcome) => {
                if outcome.mutated {
                    self.base.touched(StoreKind::String, key);
                }
                Status::from_found(outcome.found)
            }
            Residency::OnDisk => self.park(PendingKind::Rmw, key, input),
        }
    }

    fn upsert(&mut self, key: &[u8], value: StringValue<'_>) -> Status {
        let _lock = self.base.lock(StoreKind::String, key, LockType::Exclusive);
        self.store.upsert(key, value);
        self.base.touched(StoreKind::String, key);
        Status::Found
    }

    fn delete(&mut self, key: &[u8]) -> Status {
        let _lock = self.base.lock(StoreKind::String, key, LockType::Exclusive);
        let found = self.store.delete(key);
        if found {
            self.base.touched(StoreKind::String, key);
        }
        Status::from_found(found)
    }

    fn complete_pending(&mut self, output: &mut OutputBuffer<'_>) -> Completion {
        let Some(op) = self.pending.pop_front() else {
            debug_assert!(false, "complete_pending called with nothing queued");
            return Completion::Done(Status::NotFound);
        };

        self.store.fault_in(&op.key);
        let status = match op.kind {
            PendingKind::Read => self.read(&op.key, &op.input, output),
            PendingKind::Rmw => self.rmw(&op.key, &op.input, output),
        };

        if status.is_pending() {
            Completion::Retry
        } else {
            Completion::Done(status)
        }
    }

    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
