//! Queue manipulation inside an open transaction.  Callers are responsible for
//! validating arguments before calling these, since anything returned from here
//! is treated as a storage failure.

use kiln_db::{
    errors::DbError,
    types::{PushOutcome, QueueBounds},
    DbResult,
};
use rockbound::{TransactionCtx, TransactionDBMarker};

use super::schemas::{QueueBoundsSchema, QueueEntrySchema};

pub(crate) fn get_bounds_for_update<DB: TransactionDBMarker>(
    txn: &TransactionCtx<DB>,
    queue: &str,
) -> DbResult<QueueBounds> {
    Ok(txn
        .get_for_update::<QueueBoundsSchema>(&queue.to_owned())?
        .unwrap_or_default())
}

/// Reads up to `max` entries from the head without removing them.  Taking the
/// bounds for update makes a concurrent pop conflict instead of leaving a
/// hole under us.
pub(crate) fn peek_in_txn<DB: TransactionDBMarker>(
    txn: &TransactionCtx<DB>,
    queue: &str,
    max: u64,
) -> DbResult<Vec<Vec<u8>>> {
    let bounds = get_bounds_for_update(txn, queue)?;
    let end = bounds.head() + max.min(bounds.len());

    let mut out = Vec::new();
    for seq in bounds.head()..end {
        let ent = txn
            .get::<QueueEntrySchema>(&(queue.to_owned(), seq))?
            .ok_or_else(|| DbError::MissingQueueEntry(queue.to_owned(), seq))?;
        out.push(ent);
    }
    Ok(out)
}

fn pop_one<DB: TransactionDBMarker>(
    txn: &TransactionCtx<DB>,
    queue: &str,
    bounds: &mut QueueBounds,
) -> DbResult<Vec<u8>> {
    let seq = bounds
        .advance_head()
        .ok_or_else(|| DbError::MissingQueueEntry(queue.to_owned(), bounds.head()))?;
    let key = (queue.to_owned(), seq);
    let ent = txn
        .get::<QueueEntrySchema>(&key)?
        .ok_or_else(|| DbError::MissingQueueEntry(queue.to_owned(), seq))?;
    txn.delete::<QueueEntrySchema>(&key)?;
    Ok(ent)
}

/// Appends entries at the tail, then evicts from the head down to `capacity`.
/// The counters are written once at the end.
pub(crate) fn push_in_txn<DB: TransactionDBMarker>(
    txn: &TransactionCtx<DB>,
    queue: &str,
    entries: &[Vec<u8>],
    capacity: Option<u64>,
) -> DbResult<PushOutcome> {
    let mut bounds = get_bounds_for_update(txn, queue)?;

    for ent in entries {
        let seq = bounds.advance_tail();
        txn.put::<QueueEntrySchema>(&(queue.to_owned(), seq), ent)?;
    }

    let mut evicted = Vec::new();
    if let Some(cap) = capacity {
        while bounds.len() > cap {
            evicted.push(pop_one(txn, queue, &mut bounds)?);
        }
    }

    txn.put::<QueueBoundsSchema>(&queue.to_owned(), &bounds)?;
    Ok(PushOutcome { bounds, evicted })
}

/// Removes up to `max` entries from the head.
pub(crate) fn pop_in_txn<DB: TransactionDBMarker>(
    txn: &TransactionCtx<DB>,
    queue: &str,
    max: u64,
) -> DbResult<Vec<Vec<u8>>> {
    let mut bounds = get_bounds_for_update(txn, queue)?;
    let n = max.min(bounds.len());
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(n as usize);
    for _ in 0..n {
        out.push(pop_one(txn, queue, &mut bounds)?);
    }

    txn.put::<QueueBoundsSchema>(&queue.to_owned(), &bounds)?;
    Ok(out)
}
