//! Pending-Completion Pump
//!
//! A store call that needs a record from the on-disk tier answers `Pending`.
//! The pump drains the context's completion queue until the operation
//! finishes, so no `Pending` status ever leaves the session.

use super::{SessionMetrics, StorageSession};
use crate::storage::context::{Completion, RecordStoreContext, Status};
use crate::storage::input::CommandInput;
use crate::storage::object::StoreObject;
use crate::storage::object_store::{ObjectInput, ObjectOutput};
use crate::storage::output::OutputBuffer;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Drives `ctx` until the pending operation yields a terminal status.
///
/// Polls the completion queue and yields the thread between polls that are
/// still waiting.
pub(crate) fn complete_pending<C: RecordStoreContext>(
    ctx: &mut C,
    output: &mut C::Output<'_>,
    metrics: &mut SessionMetrics,
    track_latency: bool,
) -> Status {
    let started = track_latency.then(Instant::now);

    let status = loop {
        match ctx.complete_pending(output) {
            Completion::Done(status) => break status,
            Completion::Retry => std::thread::yield_now(),
        }
    };

    metrics.pending_ops += 1;
    if let Some(started) = started {
        let elapsed = started.elapsed();
        metrics.pending_latency += elapsed;
        debug!(
            store = ?ctx.kind(),
            ?status,
            latency_us = elapsed.as_micros() as u64,
            "Pending operation completed"
        );
    }
    status
}

impl StorageSession {
    pub(crate) fn string_read(
        &mut self,
        key: &[u8],
        input: &CommandInput<'_>,
        output: &mut OutputBuffer<'_>,
    ) -> Status {
        match self.string_ctx.read(key, input, output) {
            Status::Pending => complete_pending(
                &mut self.string_ctx,
                output,
                &mut self.metrics,
                self.latency_tracking,
            ),
            status => status,
        }
    }

    pub(crate) fn string_rmw(
        &mut self,
        key: &[u8],
        input: &CommandInput<'_>,
        output: &mut OutputBuffer<'_>,
    ) -> Status {
        match self.string_ctx.rmw(key, input, output) {
            Status::Pending => complete_pending(
                &mut self.string_ctx,
                output,
                &mut self.metrics,
                self.latency_tracking,
            ),
            status => status,
        }
    }

    /// Object-store Read; misses when the object store is disabled.
    pub(crate) fn object_read(
        &mut self,
        key: &Bytes,
        input: &ObjectInput,
        output: &mut ObjectOutput<'_>,
    ) -> Status {
        let Some(ctx) = self.object_ctx.as_mut() else {
            return Status::NotFound;
        };
        match ctx.read(key, input, output) {
            Status::Pending => {
                complete_pending(ctx, output, &mut self.metrics, self.latency_tracking)
            }
            status => status,
        }
    }

    pub(crate) fn object_rmw(
        &mut self,
        key: &Bytes,
        input: &ObjectInput,
        output: &mut ObjectOutput<'_>,
    ) -> Status {
        let Some(ctx) = self.object_ctx.as_mut() else {
            return Status::NotFound;
        };
        match ctx.rmw(key, input, output) {
            Status::Pending => {
                complete_pending(ctx, output, &mut self.metrics, self.latency_tracking)
            }
            status => status,
        }
    }

    pub(crate) fn object_upsert(&mut self, key: &Bytes, object: Arc<StoreObject>) -> Status {
        match self.object_ctx.as_mut() {
            Some(ctx) => ctx.upsert(key, object),
            None => Status::NotFound,
        }
    }

    pub(crate) fn object_delete(&mut self, key: &Bytes) -> Status {
        match self.object_ctx.as_mut() {
            Some(ctx) => ctx.delete(key),
            None => Status::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::session::OpStatus;
    use crate::storage::input::Opcode;
    use crate::storage::StoreEngine;

    #[test]
    fn test_evicted_read_is_completed_transparently() {
        let engine = Arc::new(StoreEngine::default());
        let mut session = engine.session();
        session.set(b"k", b"value");
        engine.evict_all();

        let mut output = OutputBuffer::unbound();
        let status = session.string_read(b"k", &CommandInput::new(Opcode::Get), &mut output);

        assert_eq!(status, Status::Found);
        assert_eq!(output.as_slice(), b"value");
        assert_eq!(session.metrics().pending_ops, 1);
        assert_eq!(engine.stats().faults, 1);
        assert_eq!(engine.stats().string_on_disk, 0);
    }

    #[test]
    fn test_evicted_rmw_is_completed_transparently() {
        let engine = Arc::new(StoreEngine::default());
        let mut session = engine.session();
        session.set(b"n", b"10");
        engine.evict(b"n");

        assert_eq!(session.increment(b"n", 5), Ok(15));
        assert_eq!(session.metrics().pending_ops, 1);
        assert_eq!(session.get_value(b"n"), Some(Bytes::from("15")));
        assert_eq!(session.metrics().pending_ops, 1);
    }

    #[test]
    fn test_latency_tracking_can_be_disabled() {
        let engine = Arc::new(StoreEngine::new(
            EngineConfig::builder().latency_tracking(false).build().unwrap(),
        ));
        let mut session = engine.session();
        session.set(b"k", b"v");
        engine.evict_all();

        let mut output = OutputBuffer::unbound();
        assert_eq!(session.get(b"k", &mut output), OpStatus::Ok);
        let metrics = session.metrics();
        assert_eq!(metrics.pending_ops, 1);
        assert_eq!(metrics.pending_latency, std::time::Duration::ZERO);
    }

    #[test]
    fn test_object_pending_path() {
        let engine = Arc::new(StoreEngine::default());
        let mut session = engine.session();
        let key = Bytes::from("obj");
        session
            .set_object(key.clone(), StoreObject::hash([(Bytes::from("f"), Bytes::from("v"))]))
            .unwrap();
        engine.evict_all();

        let mut output = ObjectOutput::default();
        assert_eq!(session.get_object(&key, &mut output), OpStatus::Ok);
        assert_eq!(output.object.map(|o| o.len()), Some(1));
        assert_eq!(session.metrics().pending_ops, 1);
    }
}
