//! Queue data operation interface.

use std::sync::Arc;

use kiln_db::{
    traits::*,
    types::{PushOutcome, QueueBounds, QueueId},
    DbError, DbResult,
};
use tracing::*;

use crate::exec::*;

/// Database context for an database operation interface.
pub struct Context<D: QueueDatabase + Sync + Send + 'static> {
    db: Arc<D>,
}

impl<D: QueueDatabase + Sync + Send + 'static> Context<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }

    pub fn into_ops(self, pool: threadpool::ThreadPool) -> QueueDataOps {
        QueueDataOps::new(pool, Arc::new(self))
    }
}

inst_ops! {
    (QueueDataOps, Context<D: QueueDatabase>) {
        get_queue_bounds(queue: QueueId) => QueueBounds;
        get_entries(queue: QueueId, max: u64) => Vec<Vec<u8>>;
        push_entries(queue: QueueId, entries: Vec<Vec<u8>>, capacity: Option<u64>) => PushOutcome;
        pop_entries(queue: QueueId, max: u64) => Vec<Vec<u8>>;
    }
}

fn get_queue_bounds<D: QueueDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    queue: QueueId,
) -> DbResult<QueueBounds> {
    context.db.get_queue_bounds(&queue)
}

fn get_entries<D: QueueDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    queue: QueueId,
    max: u64,
) -> DbResult<Vec<Vec<u8>>> {
    context.db.get_entries(&queue, max)
}

fn push_entries<D: QueueDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    queue: QueueId,
    entries: Vec<Vec<u8>>,
    capacity: Option<u64>,
) -> DbResult<PushOutcome> {
    context.db.push_entries(&queue, entries, capacity)
}

fn pop_entries<D: QueueDatabase + Sync + Send + 'static>(
    context: &Context<D>,
    queue: QueueId,
    max: u64,
) -> DbResult<Vec<Vec<u8>>> {
    context.db.pop_entries(&queue, max)
}
