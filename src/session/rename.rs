//! RENAME / RENAMENX
//!
//! A rename moves one key across to another in up to two phases, string
//! store first, then object store. Each phase runs with both keys locked
//! exclusively: inside the caller's transaction if one is running, otherwise
//! inside an internal one that commits when the phase ends, however it ends.
//!
//! The string phase copies the value through the bulk reply of a plain read
//! and carries the old key's absolute expiration over via PEXPIRETIME. The
//! object phase moves the object itself; its expiration travels with it.

use super::{OpStatus, StorageSession};
use crate::protocol::parser::read_bulk;
use crate::storage::clock::{self, TimeUnit, NO_EXPIRATION};
use crate::storage::context::{Status, StoreScope};
use crate::storage::input::CommandInput;
use crate::storage::object_store::{ObjectInput, ObjectOutput};
use crate::storage::output::OutputBuffer;
use crate::txn::LockType;
use bytes::Bytes;
use tracing::debug;

/// Outcome of one rename phase: whether the old key was there, and the
/// RENAMENX result (1 renamed, 0 blocked by an existing new key).
type PhaseResult = (OpStatus, i32);

impl StorageSession {
    /// RENAME: moves `old` to `new`, overwriting `new`.
    pub fn rename(&mut self, old: &[u8], new: &[u8], scope: StoreScope) -> OpStatus {
        self.rename_with(old, new, scope, false).0
    }

    /// RENAMENX: moves `old` to `new` only if `new` does not exist.
    ///
    /// # Returns
    ///
    /// The status and 1 if the key was renamed, 0 if `new` already existed.
    pub fn rename_nx(&mut self, old: &[u8], new: &[u8], scope: StoreScope) -> (OpStatus, i32) {
        self.rename_with(old, new, scope, true)
    }

    fn rename_with(&mut self, old: &[u8], new: &[u8], scope: StoreScope, nx: bool) -> PhaseResult {
        if old == new {
            return (OpStatus::Ok, 1);
        }

        let mut outcome = (OpStatus::NotFound, 0);

        if scope.includes_string() {
            let phase = self.locked_phase(old, new, false, |session| {
                session.rename_string(old, new, nx)
            });
            if phase.0.is_ok() {
                outcome = phase;
            }
        }

        if scope.includes_object() && self.object_store_enabled() {
            let phase = self.locked_phase(old, new, true, |session| {
                session.rename_object(old, new, nx)
            });
            if phase.0.is_ok() {
                outcome = phase;
            }
        }

        debug!(
            session = self.id,
            nx,
            status = ?outcome.0,
            result = outcome.1,
            "Rename finished"
        );
        outcome
    }

    /// Runs `body` with `old` and `new` exclusively locked in one store.
    fn locked_phase(
        &mut self,
        old: &[u8],
        new: &[u8],
        is_object: bool,
        body: impl FnOnce(&mut Self) -> PhaseResult,
    ) -> PhaseResult {
        if self.txn.is_running() {
            return body(self);
        }

        self.txn.save_key_entry_to_lock(old, is_object, LockType::Exclusive);
        self.txn.save_key_entry_to_lock(new, is_object, LockType::Exclusive);
        let scope = self.txn.begin_internal();
        let result = body(self);
        scope.commit();
        result
    }

    fn rename_string(&mut self, old: &[u8], new: &[u8], nx: bool) -> PhaseResult {
        let mut output = OutputBuffer::unbound();
        if !self.read_raw(old, &CommandInput::default(), &mut output).is_ok() {
            return (OpStatus::NotFound, 0);
        }
        let Ok(Some(value)) = read_bulk(output.as_slice()) else {
            return (OpStatus::NotFound, 0);
        };

        let expire_time =
            self.expire_time_value(old, StoreScope::StringOnly, TimeUnit::Milliseconds);
        let expire_at = match expire_time {
            Ok(ms) if ms > 0 => clock::unix_to_ticks(ms, TimeUnit::Milliseconds),
            Ok(-1) => NO_EXPIRATION,
            // expired (or removed) since the read: nothing to move
            _ => return (OpStatus::NotFound, 0),
        };

        let written = if nx {
            self.set_nx(new, value, expire_at).is_ok()
        } else {
            self.set_with_expiration(new, value, expire_at);
            true
        };

        if written {
            self.delete(old, StoreScope::StringOnly);
        }
        (OpStatus::Ok, written as i32)
    }

    fn rename_object(&mut self, old: &[u8], new: &[u8], nx: bool) -> PhaseResult {
        let old_key = Bytes::copy_from_slice(old);
        let mut output = ObjectOutput::default();
        if self.object_read(&old_key, &ObjectInput::fetch(), &mut output) != Status::Found {
            return (OpStatus::NotFound, 0);
        }
        let Some(object) = output.object.take() else {
            return (OpStatus::NotFound, 0);
        };

        let new_key = Bytes::copy_from_slice(new);
        if nx {
            let mut existing = ObjectOutput::default();
            if self.object_read(&new_key, &ObjectInput::fetch(), &mut existing).found() {
                return (OpStatus::Ok, 0);
            }
        }

        self.object_upsert(&new_key, object);
        self.delete(old, StoreScope::ObjectOnly);
        (OpStatus::Ok, 1)
    }
}
