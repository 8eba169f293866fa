//! Structured-Object Store
//!
//! Keys are owned byte strings; values are reference-counted
//! [`StoreObject`]s. A read hands the object back by reference count, so the
//! caller holds it for as long as it needs without pinning the record. RMW
//! mutates copy-on-write, which leaves any reference a reader still holds
//! untouched.

use crate::storage::clock;
use crate::storage::context::{
    Completion, ContextBase, RecordStoreContext, RmwOutcome, Status, StoreKind,
};
use crate::storage::object::{ObjectOp, StoreObject};
use crate::storage::output::{OutputBuffer, OutputHeader};
use crate::storage::tiered::{Residency, TieredMap};
use crate::txn::LockType;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Engine-level input of an object-store call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectInput {
    pub op: ObjectOp,
}

impl ObjectInput {
    pub fn new(op: ObjectOp) -> Self {
        Self { op }
    }

    pub fn fetch() -> Self {
        Self::new(ObjectOp::Fetch)
    }
}

impl Default for ObjectInput {
    fn default() -> Self {
        Self::fetch()
    }
}

/// Result of an object-store call: reply bytes plus, for a fetch, the object.
#[derive(Debug, Default)]
pub struct ObjectOutput<'a> {
    pub buffer: OutputBuffer<'a>,
    pub object: Option<Arc<StoreObject>>,
}

impl<'a> ObjectOutput<'a> {
    pub fn new(buffer: OutputBuffer<'a>) -> Self {
        Self {
            buffer,
            object: None,
        }
    }
}

/// The object store shared by every session.
#[derive(Debug)]
pub struct ObjectStore {
    records: TieredMap<Arc<StoreObject>>,
    expired_count: AtomicU64,
    fault_count: AtomicU64,
}

impl ObjectStore {
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
        op: &ObjectOp,
        output: &mut ObjectOutput<'_>,
    ) -> Residency<bool> {
        let now = clock::now_ticks();
        self.records.read(key, |record| {
            let Some(object) = record.filter(|o| !o.is_expired(now)) else {
                return false;
            };
            match op {
                ObjectOp::Fetch => output.object = Some(Arc::clone(object)),
                op => object.query(op, &mut output.buffer, now),
            }
            true
        })
    }

    pub(crate) fn rmw(
        &self,
        key: &[u8],
        op: &ObjectOp,
        output: &mut ObjectOutput<'_>,
    ) -> Residency<RmwOutcome> {
        let now = clock::now_ticks();
        self.records.update(key, |slot| {
            if slot.as_ref().is_some_and(|o| o.is_expired(now)) {
                *slot = None;
            }
            let Some(object) = slot.as_mut() else {
                if matches!(op, ObjectOp::Expire { .. } | ObjectOp::Persist) {
                    OutputHeader::new(0).write_to(&mut output.buffer);
                }
                return RmwOutcome::not_found(false);
            };

            let mutated = match op {
                ObjectOp::Fetch => {
                    output.object = Some(Arc::clone(object));
                    false
                }
                ObjectOp::Expire { .. } | ObjectOp::Persist => {
                    Arc::make_mut(object).operate(op, &mut output.buffer, now)
                }
                op => {
                    object.query(op, &mut output.buffer, now);
                    false
                }
            };
            RmwOutcome::found(mutated)
        })
    }

    pub(crate) fn upsert(&self, key: Bytes, object: Arc<StoreObject>) {
        self.records.upsert(key, object);
    }

    /// Removes the key. `true` only if a live object was removed.
    pub(crate) fn delete(&self, key: &[u8]) -> bool {
        let now = clock::now_ticks();
        self.records
            .remove(key)
            .is_some_and(|object| !object.is_expired(now))
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

    pub fn cleanup_expired(&self) -> u64 {
        let now = clock::now_ticks();
        let removed = self.records.retain(|object| !object.is_expired(now)) as u64;
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Read,
    Rmw,
}

#[derive(Debug)]
struct PendingOp {
    kind: PendingKind,
    key: Bytes,
    input: ObjectInput,
}

/// A session's handle on the [`ObjectStore`].
#[derive(Debug)]
pub struct ObjectContext {
    store: Arc<ObjectStore>,
    base: ContextBase,
    pending: VecDeque<PendingOp>,
}

impl ObjectContext {
    pub(crate) fn new(store: Arc<ObjectStore>, base: ContextBase) -> Self {
        Self {
            store,
            base,
            pending: VecDeque::new(),
        }
    }

    fn park(&mut self, kind: PendingKind, key: &Bytes, input: &ObjectInput) -> Status {
        trace!(?kind, "object store record on disk, operation pending");
        self.pending.push_back(PendingOp {
            kind,
            key: key.clone(),
            input: *input,
        });
        Status::Pending
    }
}

impl RecordStoreContext for ObjectContext {
    type Key = Bytes;
    type Value<'v> = Arc<StoreObject>;
    type Input<'i> = ObjectInput;
    type Output<'o> = ObjectOutput<'o>;

    fn kind(&self) -> StoreKind {
        StoreKind::Object
    }

    fn read(&mut self, key: &Bytes, input: &ObjectInput, output: &mut ObjectOutput<'_>) -> Status {
        let residency = {
            let _lock = self.base.lock(StoreKind::Object, key, LockType::Shared);
            self.store.read(key, &input.op, output)
        };
        match residency {
            Residency::Resident(found) => Status::from_found(found),
            Residency::OnDisk => self.park(PendingKind::Read, key, input),
        }
    }

    fn rmw(&mut self, key: &Bytes, input: &ObjectInput, output: &mut ObjectOutput<'_>) -> Status {
        let residency = {
            let _lock = self.base.lock(StoreKind::Object, key, LockType::Exclusive);
            self.store.rmw(key, &input.op, output)
        };
        match residency {
            Residency::Resident(outcome) => {
                if outcome.mutated {
                    self.base.touched(StoreKind::Object, key);
                }
                Status::from_found(outcome.found)
            }
            Residency::OnDisk => self.park(PendingKind::Rmw, key, input),
        }
    }

    fn upsert(&mut self, key: &Bytes, value: Arc<StoreObject>) -> Status {
        let _lock = self.base.lock(StoreKind::Object, key, LockType::Exclusive);
        self.store.upsert(key.clone(), value);
        self.base.touched(StoreKind::Object, key);
        Status::Found
    }

    fn delete(&mut self, key: &Bytes) -> Status {
        let _lock = self.base.lock(StoreKind::Object, key, LockType::Exclusive);
        let found = self.store.delete(key);
        if found {
            self.base.touched(StoreKind::Object, key);
        }
        Status::from_found(found)
    }

    fn complete_pending(&mut self, output: &mut ObjectOutput<'_>) -> Completion {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parser::read_integer;
    use crate::storage::clock::TimeUnit;
    use crate::storage::input::ExpireOption;
    use crate::txn::{LockTable, VersionMap};
    use std::time::Duration;

    fn context() -> ObjectContext {
        let base = ContextBase::new(
            1,
            Arc::new(LockTable::new(8)),
            Arc::new(VersionMap::new(64)),
        );
        ObjectContext::new(Arc::new(ObjectStore::new(None)), base)
    }

    fn list(items: &[&'static str]) -> Arc<StoreObject> {
        Arc::new(StoreObject::list(
            items.iter().map(|i| Bytes::from_static(i.as_bytes())),
        ))
    }

    #[test]
    fn test_fetch_returns_shared_object() {
        let mut ctx = context();
        let key = Bytes::from("list");
        let object = list(&["a", "b"]);
        ctx.upsert(&key, Arc::clone(&object));

        let mut output = ObjectOutput::default();
        assert_eq!(ctx.read(&key, &ObjectInput::fetch(), &mut output), Status::Found);
        let fetched = output.object.unwrap();
        assert!(Arc::ptr_eq(&fetched, &object));

        let mut output = ObjectOutput::default();
        assert_eq!(
            ctx.read(&Bytes::from("missing"), &ObjectInput::fetch(), &mut output),
            Status::NotFound
        );
        assert!(output.object.is_none());
    }

    #[test]
    fn test_expire_is_copy_on_write() {
        let mut ctx = context();
        let key = Bytes::from("k");
        let object = list(&["a"]);
        ctx.upsert(&key, Arc::clone(&object));

        let at = clock::ticks_from_now(Duration::from_secs(10));
        let input = ObjectInput::new(ObjectOp::Expire {
            expire_at: at,
            option: ExpireOption::Unconditional,
        });
        let mut output = ObjectOutput::default();
        assert_eq!(ctx.rmw(&key, &input, &mut output), Status::Found);
        assert_eq!(OutputHeader::read(output.buffer.as_slice()), Some(OutputHeader::new(1)));

        // the reference taken before the write still sees the old state
        assert_eq!(object.expiration(), 0);

        let mut output = ObjectOutput::default();
        ctx.read(&key, &ObjectInput::new(ObjectOp::Ttl(TimeUnit::Seconds)), &mut output);
        let ttl = read_integer(output.buffer.as_slice()).unwrap();
        assert!(ttl > 8 && ttl <= 10);
    }

    #[test]
    fn test_absent_key_headers() {
        let mut ctx = context();
        let mut output = ObjectOutput::default();
        let input = ObjectInput::new(ObjectOp::Persist);
        let status = ctx.rmw(&Bytes::from("nope"), &input, &mut output);
        assert_eq!(status, Status::NotFound);
        assert_eq!(OutputHeader::read(output.buffer.as_slice()), Some(OutputHeader::new(0)));
    }

    #[test]
    fn test_expired_object_is_absent() {
        let mut ctx = context();
        let key = Bytes::from("old");
        let object = StoreObject::list(Vec::new()).with_expiration(clock::now_ticks() - 1);
        ctx.upsert(&key, Arc::new(object));

        let mut output = ObjectOutput::default();
        assert_eq!(ctx.read(&key, &ObjectInput::fetch(), &mut output), Status::NotFound);
        assert_eq!(ctx.store.cleanup_expired(), 1);
        assert!(ctx.store.is_empty());
    }

    #[test]
    fn test_delete_reports_live_objects_only() {
        let mut ctx = context();
        let key = Bytes::from("k");
        ctx.upsert(&key, list(&["a"]));
        assert_eq!(ctx.delete(&key), Status::Found);
        assert_eq!(ctx.delete(&key), Status::NotFound);
    }

    #[test]
    fn test_pending_read_completes_after_fault() {
        let mut ctx = context();
        let key = Bytes::from("cold");
        ctx.upsert(&key, list(&["x"]));
        assert_eq!(ctx.store.evict_all(), 1);

        let mut output = ObjectOutput::default();
        assert_eq!(ctx.read(&key, &ObjectInput::fetch(), &mut output), Status::Pending);
        assert_eq!(ctx.pending_count(), 1);
        assert_eq!(ctx.complete_pending(&mut output), Completion::Done(Status::Found));
        assert_eq!(output.object.map(|o| o.len()), Some(1));
        assert_eq!(ctx.store.resident_len(), 1);
    }
}
