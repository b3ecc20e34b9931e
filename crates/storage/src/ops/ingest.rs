//! Ingestion bookkeeping operation interface.

use std::sync::Arc;

use kiln_db::{
    traits::*,
    types::{BatchReceipt, IngestBatch, StreamId},
    DbError, DbResult,
};
use tracing::*;

use crate::exec::*;

/// Database context for an database operation interface.
pub struct Context<D: IngestDatabase + Sync + Send + 'static> {
    db: Arc<D>,
}

impl<D: IngestDatabase + Sync + Send + 'static> Context<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }

    pub fn into_ops(self, pool: threadpool::ThreadPool) -> IngestDataOps {
        IngestDataOps::new(pool, Arc::new(self))
    }
}

inst_ops! {
    (IngestDataOps, Context<D: IngestDatabase>) {
        get_watermark(stream: StreamId) => Option<u64>;
        init_watermark(stream: StreamId, block: u64) => u64;
        get_next_deposit_nonce() => Option<u64>;
        init_deposit_nonce(nonce: u64) => u64;
        commit_ingest_batch(batch: IngestBatch) => BatchReceipt;
    }
}

fn get_watermark<D: IngestDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    stream: StreamId,
) -> DbResult<Option<u64>> {
    context.db.get_watermark(stream)
}

fn init_watermark<D: IngestDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    stream: StreamId,
    block: u64,
) -> DbResult<u64> {
    context.db.init_watermark(stream, block)
}

fn get_next_deposit_nonce<D: IngestDatabase + Sync + Send + 'static>(
    context: &Context<D>,
) -> DbResult<Option<u64>> {
    context.db.get_next_deposit_nonce()
}

fn init_deposit_nonce<D: IngestDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    nonce: u64,
) -> DbResult<u64> {
    context.db.init_deposit_nonce(nonce)
}

fn commit_ingest_batch<D: IngestDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    batch: IngestBatch,
) -> DbResult<BatchReceipt> {
    let n = batch.num_entries();
    let res = context.db.commit_ingest_batch(batch);
    if let Err(e) = &res {
        warn!(entries = n, err = %e, "failed to commit ingest batch");
    }
    res
}
