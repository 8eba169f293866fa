//! Store Router
//!
//! Every dual-store command is the same shape: try one store, and on a miss
//! fall through to the other. The string store goes first for everything
//! except DELETE, which tries the object store first.
//!
//! The two halves of a command usually write to the same output, so the
//! router threads one piece of caller state through both closures instead of
//! letting each capture it.

use super::{OpStatus, StorageSession};
use crate::storage::context::StoreScope;
use tracing::trace;

impl StorageSession {
    /// Runs `string_op`, then `object_op` if the first did not answer `Ok`.
    /// Stores outside `scope` are skipped.
    pub(crate) fn try_in_scope<T>(
        &mut self,
        scope: StoreScope,
        state: &mut T,
        string_op: impl FnOnce(&mut Self, &mut T) -> OpStatus,
        object_op: impl FnOnce(&mut Self, &mut T) -> OpStatus,
    ) -> OpStatus {
        if scope.includes_string() {
            let status = string_op(self, state);
            trace!(session = self.id, ?scope, ?status, "string store tried");
            if status.is_ok() {
                return status;
            }
        }
        if scope.includes_object() && self.object_store_enabled() {
            let status = object_op(self, state);
            trace!(session = self.id, ?scope, ?status, "object store tried");
            return status;
        }
        OpStatus::NotFound
    }

    /// [`try_in_scope`](Self::try_in_scope) with the object store first.
    pub(crate) fn try_object_first<T>(
        &mut self,
        scope: StoreScope,
        state: &mut T,
        string_op: impl FnOnce(&mut Self, &mut T) -> OpStatus,
        object_op: impl FnOnce(&mut Self, &mut T) -> OpStatus,
    ) -> OpStatus {
        if scope.includes_object() && self.object_store_enabled() {
            let status = object_op(self, state);
            trace!(session = self.id, ?scope, ?status, "object store tried");
            if status.is_ok() {
                return status;
            }
        }
        if scope.includes_string() {
            let status = string_op(self, state);
            trace!(session = self.id, ?scope, ?status, "string store tried");
            return status;
        }
        OpStatus::NotFound
    }
}
