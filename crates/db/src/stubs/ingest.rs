use std::collections::*;

use parking_lot::Mutex;

use crate::{errors::*, traits::*, types::*, DbResult};

#[derive(Clone, Debug, Default)]
struct StubQueue {
    bounds: QueueBounds,
    entries: BTreeMap<u64, Vec<u8>>,
}

#[derive(Clone, Debug, Default)]
struct State {
    queues: HashMap<QueueId, StubQueue>,
    watermarks: HashMap<StreamId, u64>,
    deposit_nonce: Option<u64>,
}

impl State {
    fn push(
        &mut self,
        queue: &str,
        entries: Vec<Vec<u8>>,
        capacity: Option<u64>,
    ) -> DbResult<PushOutcome> {
        if capacity == Some(0) {
            return Err(DbError::InvalidCapacity(0));
        }

        let q = self.queues.entry(queue.to_owned()).or_default();
        for ent in entries {
            let seq = q.bounds.advance_tail();
            q.entries.insert(seq, ent);
        }

        let mut evicted = Vec::new();
        if let Some(cap) = capacity {
            while q.bounds.len() > cap {
                evicted.push(pop_one(queue, q)?);
            }
        }

        Ok(PushOutcome {
            bounds: q.bounds,
            evicted,
        })
    }

    fn pop(&mut self, queue: &str, max: u64) -> DbResult<Vec<Vec<u8>>> {
        let Some(q) = self.queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let n = max.min(q.bounds.len());
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            out.push(pop_one(queue, q)?);
        }
        Ok(out)
    }
}

fn pop_one(queue: &str, q: &mut StubQueue) -> DbResult<Vec<u8>> {
    let seq = q
        .bounds
        .advance_head()
        .ok_or_else(|| DbError::MissingQueueEntry(queue.to_owned(), q.bounds.head()))?;
    q.entries
        .remove(&seq)
        .ok_or_else(|| DbError::MissingQueueEntry(queue.to_owned(), seq))
}

/// In-memory database with the same commit semantics as the persistent one.
/// Batches are applied to a copy of the state which replaces the original
/// only if every step succeeded.
#[derive(Debug, Default)]
pub struct StubIngestDb {
    state: Mutex<State>,
}

impl StubIngestDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueDatabase for StubIngestDb {
    fn get_queue_bounds(&self, queue: &str) -> DbResult<QueueBounds> {
        let st = self.state.lock();
        Ok(st.queues.get(queue).map(|q| q.bounds).unwrap_or_default())
    }

    fn get_entry(&self, queue: &str, seq: u64) -> DbResult<Option<Vec<u8>>> {
        let st = self.state.lock();
        Ok(st.queues.get(queue).and_then(|q| q.entries.get(&seq).cloned()))
    }

    fn get_entries(&self, queue: &str, max: u64) -> DbResult<Vec<Vec<u8>>> {
        let st = self.state.lock();
        Ok(st
            .queues
            .get(queue)
            .map(|q| q.entries.values().take(max as usize).cloned().collect())
            .unwrap_or_default())
    }

    fn push_entries(
        &self,
        queue: &str,
        entries: Vec<Vec<u8>>,
        capacity: Option<u64>,
    ) -> DbResult<PushOutcome> {
        let mut st = self.state.lock();
        let mut next = st.clone();
        let out = next.push(queue, entries, capacity)?;
        *st = next;
        Ok(out)
    }

    fn pop_entries(&self, queue: &str, max: u64) -> DbResult<Vec<Vec<u8>>> {
        let mut st = self.state.lock();
        st.pop(queue, max)
    }
}

impl IngestDatabase for StubIngestDb {
    fn get_watermark(&self, stream: StreamId) -> DbResult<Option<u64>> {
        let st = self.state.lock();
        Ok(st.watermarks.get(&stream).copied())
    }

    fn init_watermark(&self, stream: StreamId, block: u64) -> DbResult<u64> {
        let mut st = self.state.lock();
        Ok(*st.watermarks.entry(stream).or_insert(block))
    }

    fn get_next_deposit_nonce(&self) -> DbResult<Option<u64>> {
        let st = self.state.lock();
        Ok(st.deposit_nonce)
    }

    fn init_deposit_nonce(&self, nonce: u64) -> DbResult<u64> {
        let mut st = self.state.lock();
        Ok(*st.deposit_nonce.get_or_insert(nonce))
    }

    fn commit_ingest_batch(&self, batch: IngestBatch) -> DbResult<BatchReceipt> {
        let mut st = self.state.lock();
        let mut next = st.clone();

        if let Some(adv) = batch.deposit_nonce {
            let stored = next.deposit_nonce.ok_or(DbError::NotBootstrapped)?;
            if stored != adv.expected {
                return Err(DbError::NonceMismatch {
                    expected: adv.expected,
                    stored,
                });
            }
            next.deposit_nonce = Some(adv.next);
        }

        for (stream, block) in batch.watermarks {
            if let Some(cur) = next.watermarks.get(&stream) {
                if *cur > block {
                    return Err(DbError::WatermarkRegression(stream, *cur, block));
                }
            }
            next.watermarks.insert(stream, block);
        }

        let mut receipt = BatchReceipt::default();
        for push in batch.pushes {
            let out = next.push(&push.queue, push.entries, push.capacity)?;
            if !out.evicted.is_empty() {
                receipt.evicted.push((push.queue, out.evicted));
            }
        }

        *st = next;
        Ok(receipt)
    }
}
