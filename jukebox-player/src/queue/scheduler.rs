//! Scheduling policies
//!
//! A policy decides where a newly enqueued entry lands. It is injected into
//! [`QueueStore`](super::QueueStore) and invoked inside the same unit of work
//! as the mutation it observes, so it always sees a consistent queue.

use super::QueueTx;
use async_trait::async_trait;
use jukebox_common::db::QueueEntry;
use jukebox_common::Result;

/// Insertion strategy for new queue entries
#[async_trait]
pub trait SchedulingPolicy: Send + Sync {
    /// Desired position for `candidate`, which currently sits at the tail
    /// (`candidate.position`).
    ///
    /// Must return a value in `[0, candidate.position]` and must only read
    /// through `tx`. Anything outside that range aborts the enqueue with a
    /// validation error.
    async fn position(&self, tx: &mut QueueTx<'_>, candidate: &QueueEntry) -> Result<i64>;

    /// Called after an entry has been placed
    async fn on_enqueued(&self, _tx: &mut QueueTx<'_>, _entry: &QueueEntry) -> Result<()> {
        Ok(())
    }

    /// Called after an entry has been taken off the queue
    async fn on_dequeued(&self, _tx: &mut QueueTx<'_>, _entry: &QueueEntry) -> Result<()> {
        Ok(())
    }

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// First in, first out: every entry is appended at the tail
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoPolicy;

#[async_trait]
impl SchedulingPolicy for FifoPolicy {
    async fn position(&self, _tx: &mut QueueTx<'_>, candidate: &QueueEntry) -> Result<i64> {
        Ok(candidate.position)
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}
