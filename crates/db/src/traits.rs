//! Trait definitions for low level database interfaces.

#[cfg(feature = "mocks")]
use mockall::automock;

use crate::{
    types::{BatchReceipt, IngestBatch, PushOutcome, QueueBounds, StreamId},
    DbResult,
};

/// Database interface for durable FIFO queues.  Each queue is identified by
/// name and stores opaque encoded entries.
/// Operations are NOT VALIDATED at this level beyond keeping the counters
/// consistent.
#[cfg_attr(feature = "mocks", automock)]
pub trait QueueDatabase {
    /// Gets the current counters for the queue.  An unknown queue is empty at
    /// `(0, 0)`.
    fn get_queue_bounds(&self, queue: &str) -> DbResult<QueueBounds>;

    /// Gets the entry at a seq, if it is still within the bounds.
    fn get_entry(&self, queue: &str, seq: u64) -> DbResult<Option<Vec<u8>>>;

    /// Gets up to `max` entries from the head without removing them.
    fn get_entries(&self, queue: &str, max: u64) -> DbResult<Vec<Vec<u8>>>;

    /// Atomically appends the entries and, if `capacity` is set, pops from the
    /// head until the queue length is within it.  A capacity of 0 is invalid.
    fn push_entries(
        &self,
        queue: &str,
        entries: Vec<Vec<u8>>,
        capacity: Option<u64>,
    ) -> DbResult<PushOutcome>;

    /// Atomically removes up to `max` entries from the head and returns them
    /// in order.
    fn pop_entries(&self, queue: &str, max: u64) -> DbResult<Vec<Vec<u8>>>;
}

/// Database interface for ingestion bookkeeping.  Watermarks, the deposit
/// nonce and the queues they feed are committed together through
/// [`IngestDatabase::commit_ingest_batch`].
pub trait IngestDatabase: QueueDatabase {
    /// Gets the last finalized block processed for the stream.
    fn get_watermark(&self, stream: StreamId) -> DbResult<Option<u64>>;

    /// Sets the watermark if the stream doesn't have one yet.  Returns the
    /// watermark now in effect.
    fn init_watermark(&self, stream: StreamId, block: u64) -> DbResult<u64>;

    /// Gets the nonce the next admitted deposit must carry.
    fn get_next_deposit_nonce(&self) -> DbResult<Option<u64>>;

    /// Sets the deposit nonce if it isn't set yet.  Returns the nonce now in
    /// effect.
    fn init_deposit_nonce(&self, nonce: u64) -> DbResult<u64>;

    /// Applies every part of the batch in one transaction or none of it.
    /// Fails with `WatermarkRegression` if any watermark would move backwards
    /// and with `NonceMismatch` if the nonce has moved underneath the caller.
    fn commit_ingest_batch(&self, batch: IngestBatch) -> DbResult<BatchReceipt>;
}
