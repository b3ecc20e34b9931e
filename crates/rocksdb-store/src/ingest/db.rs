use std::sync::Arc;

use kiln_db::{
    errors::DbError,
    traits::{IngestDatabase, QueueDatabase},
    types::{BatchReceipt, IngestBatch, PushOutcome, QueueBounds, StreamId},
    DbResult,
};
use rockbound::{OptimisticTransactionDB as DB, SchemaDBOperationsExt, TransactionRetry};
use tracing::*;

use super::schemas::WatermarkSchema;
use crate::{
    queue::{
        schemas::{QueueBoundsSchema, QueueEntrySchema},
        txn::{peek_in_txn, pop_in_txn, push_in_txn},
    },
    sequence::{get_seq_for_update, put_seq, DEPOSIT_NONCE_KEY},
    DbOpsConfig,
};

pub struct RBIngestDb {
    db: Arc<DB>,
    ops: DbOpsConfig,
}

impl RBIngestDb {
    pub fn new(db: Arc<DB>, ops: DbOpsConfig) -> Self {
        Self { db, ops }
    }

    /// Runs `f` in an optimistic transaction.  `f` returns the outcome to hand
    /// back to the caller as the inner result, so validation failures reach
    /// the caller untouched instead of being flattened into a
    /// `TransactionError`.  Validation must happen before any write.
    fn with_txn<T, F>(&self, f: F) -> DbResult<T>
    where
        F: Fn(&rockbound::TransactionCtx<DB>) -> Result<DbResult<T>, DbError>,
    {
        self.db
            .with_optimistic_txn(TransactionRetry::Count(self.ops.retry_count), |txn| f(txn))
            .map_err(|e| DbError::TransactionError(e.to_string()))?
    }
}

impl QueueDatabase for RBIngestDb {
    fn get_queue_bounds(&self, queue: &str) -> DbResult<QueueBounds> {
        Ok(self
            .db
            .get::<QueueBoundsSchema>(&queue.to_owned())?
            .unwrap_or_default())
    }

    fn get_entry(&self, queue: &str, seq: u64) -> DbResult<Option<Vec<u8>>> {
        Ok(self.db.get::<QueueEntrySchema>(&(queue.to_owned(), seq))?)
    }

    fn get_entries(&self, queue: &str, max: u64) -> DbResult<Vec<Vec<u8>>> {
        self.with_txn(|txn| Ok(Ok(peek_in_txn(txn, queue, max)?)))
    }

    fn push_entries(
        &self,
        queue: &str,
        entries: Vec<Vec<u8>>,
        capacity: Option<u64>,
    ) -> DbResult<PushOutcome> {
        if capacity == Some(0) {
            return Err(DbError::InvalidCapacity(0));
        }

        self.with_txn(|txn| Ok(Ok(push_in_txn(txn, queue, &entries, capacity)?)))
    }

    fn pop_entries(&self, queue: &str, max: u64) -> DbResult<Vec<Vec<u8>>> {
        self.with_txn(|txn| Ok(Ok(pop_in_txn(txn, queue, max)?)))
    }
}

impl IngestDatabase for RBIngestDb {
    fn get_watermark(&self, stream: StreamId) -> DbResult<Option<u64>> {
        Ok(self.db.get::<WatermarkSchema>(&stream)?)
    }

    fn init_watermark(&self, stream: StreamId, block: u64) -> DbResult<u64> {
        self.with_txn(|txn| {
            if let Some(cur) = txn.get_for_update::<WatermarkSchema>(&stream)? {
                return Ok(Ok(cur));
            }
            txn.put::<WatermarkSchema>(&stream, &block)?;
            Ok(Ok(block))
        })
    }

    fn get_next_deposit_nonce(&self) -> DbResult<Option<u64>> {
        Ok(self
            .db
            .get::<crate::sequence::SequenceSchema>(&DEPOSIT_NONCE_KEY.to_vec())?)
    }

    fn init_deposit_nonce(&self, nonce: u64) -> DbResult<u64> {
        self.with_txn(|txn| {
            if let Some(cur) = get_seq_for_update(txn, DEPOSIT_NONCE_KEY)? {
                return Ok(Ok(cur));
            }
            put_seq(txn, DEPOSIT_NONCE_KEY, nonce)?;
            Ok(Ok(nonce))
        })
    }

    fn commit_ingest_batch(&self, batch: IngestBatch) -> DbResult<BatchReceipt> {
        if let Some(push) = batch.pushes.iter().find(|p| p.capacity == Some(0)) {
            warn!(queue = %push.queue, "refusing push with zero capacity");
            return Err(DbError::InvalidCapacity(0));
        }

        self.with_txn(|txn| {
            // Validate.
            if let Some(adv) = batch.deposit_nonce {
                let Some(stored) = get_seq_for_update(txn, DEPOSIT_NONCE_KEY)? else {
                    return Ok(Err(DbError::NotBootstrapped));
                };
                if stored != adv.expected {
                    return Ok(Err(DbError::NonceMismatch {
                        expected: adv.expected,
                        stored,
                    }));
                }
            }

            for (stream, block) in &batch.watermarks {
                if let Some(cur) = txn.get_for_update::<WatermarkSchema>(stream)? {
                    if cur > *block {
                        return Ok(Err(DbError::WatermarkRegression(*stream, cur, *block)));
                    }
                }
            }

            // Write.
            if let Some(adv) = batch.deposit_nonce {
                put_seq(txn, DEPOSIT_NONCE_KEY, adv.next)?;
            }

            for (stream, block) in &batch.watermarks {
                txn.put::<WatermarkSchema>(stream, block)?;
            }

            let mut receipt = BatchReceipt::default();
            for push in &batch.pushes {
                let out = push_in_txn(txn, &push.queue, &push.entries, push.capacity)?;
                if !out.evicted.is_empty() {
                    receipt.evicted.push((push.queue.clone(), out.evicted));
                }
            }

            Ok(Ok(receipt))
        })
    }
}

#[cfg(feature = "test_utils")]
#[cfg(test)]
mod tests {
    use kiln_db::types::{NonceAdvance, QueuePush};
    use kiln_primitives::buf::Buf32;
    use kiln_test_utils::ArbitraryGenerator;

    use super::*;
    use crate::test_utils::get_rocksdb_tmp_instance;

    fn setup_db() -> RBIngestDb {
        let (db, db_ops) = get_rocksdb_tmp_instance().unwrap();
        RBIngestDb::new(db, db_ops)
    }

    fn gen_entries(n: usize) -> Vec<Vec<u8>> {
        let gen = ArbitraryGenerator::new();
        (0..n).map(|_| gen.generate::<Vec<u8>>()).collect()
    }

    #[test]
    fn test_unknown_queue_is_empty() {
        let db = setup_db();
        let bounds = db.get_queue_bounds("nothing").unwrap();
        assert!(bounds.is_empty());
        assert_eq!(bounds.head(), 0);
        assert!(db.pop_entries("nothing", 10).unwrap().is_empty());
        assert!(db.get_entries("nothing", 10).unwrap().is_empty());
    }

    #[test]
    fn test_push_then_pop_in_order() {
        let db = setup_db();
        let entries = gen_entries(5);

        let out = db.push_entries("q", entries.clone(), None).unwrap();
        assert_eq!(out.bounds, QueueBounds::new(0, 5));
        assert!(out.evicted.is_empty());

        assert_eq!(db.get_entries("q", 2).unwrap(), entries[..2].to_vec());
        assert_eq!(db.pop_entries("q", 3).unwrap(), entries[..3].to_vec());
        assert_eq!(db.get_queue_bounds("q").unwrap(), QueueBounds::new(3, 5));

        // Popped slots are gone from the table.
        assert_eq!(db.get_entry("q", 0).unwrap(), None);
        assert_eq!(db.get_entry("q", 3).unwrap(), Some(entries[3].clone()));

        assert_eq!(db.pop_entries("q", 10).unwrap(), entries[3..].to_vec());
        assert!(db.get_queue_bounds("q").unwrap().is_empty());
    }

    #[test]
    fn test_queues_are_independent() {
        let db = setup_db();
        db.push_entries("a", vec![vec![1]], None).unwrap();
        db.push_entries("ab", vec![vec![2], vec![3]], None).unwrap();

        assert_eq!(db.get_queue_bounds("a").unwrap().len(), 1);
        assert_eq!(db.pop_entries("ab", 1).unwrap(), vec![vec![2]]);
        assert_eq!(db.pop_entries("a", 1).unwrap(), vec![vec![1]]);
    }

    #[test]
    fn test_push_with_capacity_evicts_oldest() {
        let db = setup_db();
        let entries: Vec<Vec<u8>> = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        db.push_entries("ring", entries, Some(3)).unwrap();

        let out = db.push_entries("ring", vec![b"d".to_vec()], Some(3)).unwrap();
        assert_eq!(out.evicted, vec![b"a".to_vec()]);
        assert_eq!(out.bounds, QueueBounds::new(1, 4));
        assert_eq!(
            db.get_entries("ring", 10).unwrap(),
            vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
    }

    #[test]
    fn test_peek_during_pops_sees_consistent_head() {
        let db = Arc::new(setup_db());
        let entries: Vec<Vec<u8>> = (0..200u64).map(|i| i.to_le_bytes().to_vec()).collect();
        db.push_entries("q", entries, None).unwrap();

        let popper = {
            let db = db.clone();
            std::thread::spawn(move || {
                let mut popped = 0;
                while popped < 200 {
                    popped += db.pop_entries("q", 1).unwrap().len();
                }
            })
        };

        loop {
            match db.get_entries("q", 3) {
                Ok(ents) if ents.is_empty() => break,
                Ok(ents) => {
                    let first = u64::from_le_bytes(ents[0].clone().try_into().unwrap());
                    for (i, e) in ents.iter().enumerate() {
                        assert_eq!(e, &(first + i as u64).to_le_bytes().to_vec());
                    }
                }
                // Losing the race too many times is fine, a hole is not.
                Err(DbError::TransactionError(_)) => {}
                Err(e) => panic!("peek failed: {e}"),
            }
        }

        popper.join().unwrap();
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let db = setup_db();
        let res = db.push_entries("ring", vec![vec![0]], Some(0));
        assert!(matches!(res, Err(DbError::InvalidCapacity(0))));
    }

    #[test]
    fn test_init_watermark_only_once() {
        let db = setup_db();
        let stream = Buf32::from([3; 32]);
        assert_eq!(db.get_watermark(stream).unwrap(), None);
        assert_eq!(db.init_watermark(stream, 100).unwrap(), 100);
        assert_eq!(db.init_watermark(stream, 7).unwrap(), 100);
        assert_eq!(db.get_watermark(stream).unwrap(), Some(100));
    }

    #[test]
    fn test_commit_batch_applies_everything() {
        let db = setup_db();
        let stream = Buf32::from([3; 32]);
        db.init_watermark(stream, 100).unwrap();
        db.init_deposit_nonce(5).unwrap();

        let batch = IngestBatch {
            pushes: vec![
                QueuePush::new("deposits".to_owned(), vec![vec![5], vec![6]], None),
                QueuePush::new("logs".to_owned(), vec![vec![1], vec![2]], Some(1)),
            ],
            watermarks: vec![(stream, 103)],
            deposit_nonce: Some(NonceAdvance {
                expected: 5,
                next: 7,
            }),
        };

        let receipt = db.commit_ingest_batch(batch).unwrap();
        assert_eq!(receipt.evicted, vec![("logs".to_owned(), vec![vec![1]])]);
        assert_eq!(db.get_watermark(stream).unwrap(), Some(103));
        assert_eq!(db.get_next_deposit_nonce().unwrap(), Some(7));
        assert_eq!(db.get_queue_bounds("deposits").unwrap().len(), 2);
        assert_eq!(db.get_entries("logs", 5).unwrap(), vec![vec![2]]);
    }

    #[test]
    fn test_commit_batch_rejects_regression_atomically() {
        let db = setup_db();
        let stream = Buf32::from([3; 32]);
        db.init_watermark(stream, 100).unwrap();

        let batch = IngestBatch {
            pushes: vec![QueuePush::new("logs".to_owned(), vec![vec![1]], None)],
            watermarks: vec![(stream, 99)],
            deposit_nonce: None,
        };

        let res = db.commit_ingest_batch(batch);
        assert!(matches!(
            res,
            Err(DbError::WatermarkRegression(_, 100, 99))
        ));
        assert_eq!(db.get_watermark(stream).unwrap(), Some(100));
        assert!(db.get_queue_bounds("logs").unwrap().is_empty());
    }

    #[test]
    fn test_commit_batch_checks_nonce() {
        let db = setup_db();

        let batch = IngestBatch {
            deposit_nonce: Some(NonceAdvance {
                expected: 0,
                next: 1,
            }),
            ..Default::default()
        };
        let res = db.commit_ingest_batch(batch.clone());
        assert!(matches!(res, Err(DbError::NotBootstrapped)));

        db.init_deposit_nonce(2).unwrap();
        let res = db.commit_ingest_batch(batch);
        assert!(matches!(
            res,
            Err(DbError::NonceMismatch {
                expected: 0,
                stored: 2
            })
        ));
        assert_eq!(db.get_next_deposit_nonce().unwrap(), Some(2));
    }
}
