//! Structured Store Objects
//!
//! A [`StoreObject`] is the value type of the object store: one collection
//! variant plus its own expiration. Collection command semantics (LPUSH,
//! SADD, ...) are not implemented here; the store only needs the uniform
//! pieces every object answers to: its type tag, a size estimate and the
//! expiration operations.

use crate::protocol::RespValue;
use crate::storage::clock::{self, TimeUnit, NO_EXPIRATION};
use crate::storage::input::ExpireOption;
use crate::storage::output::{OutputBuffer, OutputHeader};
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

/// Heap overhead estimates, in bytes, for the size accounting.
pub mod overhead {
    /// Object header plus the collection's own allocation
    pub const OBJECT: i64 = 80;
    /// A byte string allocated on the heap
    pub const BYTE_ARRAY: i64 = 24;
    pub const LIST_ENTRY: i64 = 48;
    pub const SET_ENTRY: i64 = 40;
    pub const HASH_ENTRY: i64 = 56;
    /// Member plus its position in the score index
    pub const SORTED_SET_ENTRY: i64 = 96;
}

/// The variant tag of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    List,
    Set,
    Hash,
    SortedSet,
    Custom(u8),
}

/// Collection payload of a [`StoreObject`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectValue {
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    /// Member to score
    SortedSet(HashMap<Bytes, f64>),
    /// Opaque payload of a registered object type
    Custom { type_id: u8, payload: Bytes },
}

/// An operation every object answers to, whatever its variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectOp {
    /// Hand the object itself back to the caller
    Fetch,
    Ttl(TimeUnit),
    ExpireTime(TimeUnit),
    Expire {
        expire_at: i64,
        option: ExpireOption,
    },
    Persist,
    /// Number of elements
    Length,
}

/// A polymorphic object value with its expiration state.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreObject {
    value: ObjectValue,
    /// Absolute expiration in ticks, [`NO_EXPIRATION`] if none
    expiration: i64,
}

impl StoreObject {
    pub fn new(value: ObjectValue) -> Self {
        Self {
            value,
            expiration: NO_EXPIRATION,
        }
    }

    pub fn list(items: impl IntoIterator<Item = Bytes>) -> Self {
        Self::new(ObjectValue::List(items.into_iter().collect()))
    }

    pub fn set(members: impl IntoIterator<Item = Bytes>) -> Self {
        Self::new(ObjectValue::Set(members.into_iter().collect()))
    }

    pub fn hash(fields: impl IntoIterator<Item = (Bytes, Bytes)>) -> Self {
        Self::new(ObjectValue::Hash(fields.into_iter().collect()))
    }

    pub fn sorted_set(members: impl IntoIterator<Item = (Bytes, f64)>) -> Self {
        Self::new(ObjectValue::SortedSet(members.into_iter().collect()))
    }

    pub fn custom(type_id: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(ObjectValue::Custom {
            type_id,
            payload: payload.into(),
        })
    }

    /// Sets the absolute expiration, builder style.
    pub fn with_expiration(mut self, expire_at: i64) -> Self {
        self.expiration = expire_at;
        self
    }

    pub fn value(&self) -> &ObjectValue {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut ObjectValue {
        &mut self.value
    }

    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn set_expiration(&mut self, expire_at: i64) {
        self.expiration = expire_at;
    }

    #[inline]
    pub fn is_expired(&self, now: i64) -> bool {
        clock::is_expired(self.expiration, now)
    }

    pub fn kind(&self) -> ObjectKind {
        match &self.value {
            ObjectValue::List(_) => ObjectKind::List,
            ObjectValue::Set(_) => ObjectKind::Set,
            ObjectValue::Hash(_) => ObjectKind::Hash,
            ObjectValue::SortedSet(_) => ObjectKind::SortedSet,
            ObjectValue::Custom { type_id, .. } => ObjectKind::Custom(*type_id),
        }
    }

    pub fn len(&self) -> usize {
        match &self.value {
            ObjectValue::List(items) => items.len(),
            ObjectValue::Set(members) => members.len(),
            ObjectValue::Hash(fields) => fields.len(),
            ObjectValue::SortedSet(members) => members.len(),
            ObjectValue::Custom { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated heap footprint in bytes.
    pub fn size(&self) -> i64 {
        let bytes = |b: &Bytes| overhead::BYTE_ARRAY + b.len() as i64;
        let entries: i64 = match &self.value {
            ObjectValue::List(items) => items
                .iter()
                .map(|item| overhead::LIST_ENTRY + bytes(item))
                .sum(),
            ObjectValue::Set(members) => members
                .iter()
                .map(|member| overhead::SET_ENTRY + bytes(member))
                .sum(),
            ObjectValue::Hash(fields) => fields
                .iter()
                .map(|(field, value)| overhead::HASH_ENTRY + bytes(field) + bytes(value))
                .sum(),
            ObjectValue::SortedSet(members) => members
                .keys()
                .map(|member| overhead::SORTED_SET_ENTRY + bytes(member))
                .sum(),
            ObjectValue::Custom { payload, .. } => bytes(payload),
        };
        overhead::OBJECT + entries
    }

    /// Answers a read-only operation into `output`.
    pub(crate) fn query(&self, op: &ObjectOp, output: &mut OutputBuffer<'_>, now: i64) {
        match *op {
            ObjectOp::Ttl(unit) => {
                let ttl = match self.expiration {
                    NO_EXPIRATION => -1,
                    at => clock::remaining(at, now, unit),
                };
                RespValue::integer(ttl).write_to(output);
            }
            ObjectOp::ExpireTime(unit) => {
                let at = match self.expiration {
                    NO_EXPIRATION => -1,
                    at => clock::ticks_to_unix(at, unit),
                };
                RespValue::integer(at).write_to(output);
            }
            ObjectOp::Length => RespValue::integer(self.len() as i64).write_to(output),
            // The store hands the object back itself; writes here are misuse
            ObjectOp::Fetch | ObjectOp::Expire { .. } | ObjectOp::Persist => {}
        }
    }

    /// Runs `op` against the object.
    ///
    /// # Returns
    ///
    /// `true` if the object changed.
    pub(crate) fn operate(
        &mut self,
        op: &ObjectOp,
        output: &mut OutputBuffer<'_>,
        now: i64,
    ) -> bool {
        match *op {
            ObjectOp::Expire { expire_at, option } => {
                let allowed = option.allows(self.expiration, expire_at);
                if allowed {
                    self.expiration = expire_at;
                }
                OutputHeader::new(allowed as i32).write_to(output);
                allowed
            }
            ObjectOp::Persist => {
                let had_expiration = self.expiration != NO_EXPIRATION;
                self.expiration = NO_EXPIRATION;
                OutputHeader::new(had_expiration as i32).write_to(output);
                had_expiration
            }
            _ => {
                self.query(op, output, now);
                false
            }
        }
    }
}

impl From<ObjectValue> for StoreObject {
    fn from(value: ObjectValue) -> Self {
        Self::new(value)
    }
}
