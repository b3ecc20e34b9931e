//! Consumer side of the ingested queues.

use std::sync::Arc;

use kiln_db::{
    types::{IngestBatch, NonceAdvance, QueuePush},
    DbError,
};
use kiln_primitives::payload::Deposit;
use kiln_storage::{encode_value, CircularQueue, IngestDataOps, PersistentQueue, QueueResult};
use tokio::sync::Mutex;
use tracing::*;

use crate::{
    errors::IngestError,
    factory::DecodedLogContainer,
    ordering::{admit, next_nonce, Decision},
};

/// Queue holding admitted deposits in nonce order.
pub const DEPOSIT_QUEUE: &str = "deposits";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnqueueOutcome {
    Applied,

    /// Nonce was already applied, nothing was written.
    Duplicate,
}

/// Decoded logs of a non-deposit stream.
#[derive(Clone)]
pub enum StreamQueue {
    Unbounded(PersistentQueue<DecodedLogContainer>),
    Circular(CircularQueue<DecodedLogContainer>),
}

impl StreamQueue {
    pub fn id(&self) -> &str {
        match self {
            Self::Unbounded(q) => q.id(),
            Self::Circular(q) => q.id(),
        }
    }

    pub async fn peek(&self) -> QueueResult<DecodedLogContainer> {
        match self {
            Self::Unbounded(q) => q.peek().await,
            Self::Circular(q) => q.peek().await,
        }
    }

    pub async fn pop_multi(&self, n: u64) -> QueueResult<Vec<DecodedLogContainer>> {
        match self {
            Self::Unbounded(q) => q.pop_multi(n).await,
            Self::Circular(q) => q.pop_multi(n).await,
        }
    }

    pub async fn len(&self) -> QueueResult<u64> {
        match self {
            Self::Unbounded(q) => q.len().await,
            Self::Circular(q) => q.len().await,
        }
    }
}

/// Handle for the validator-set side.  Cheap to clone.
#[derive(Clone)]
pub struct DepositHandle {
    deposits: PersistentQueue<Deposit>,
    streams: Arc<Vec<(String, StreamQueue)>>,
    ingest_ops: Arc<IngestDataOps>,
    cycle_lock: Arc<Mutex<()>>,
}

impl DepositHandle {
    pub(crate) fn new(
        deposits: PersistentQueue<Deposit>,
        streams: Vec<(String, StreamQueue)>,
        ingest_ops: Arc<IngestDataOps>,
        cycle_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            deposits,
            streams: Arc::new(streams),
            ingest_ops,
            cycle_lock,
        }
    }

    /// Pops up to `max` admitted deposits, lowest nonce first.
    pub async fn next_deposits(&self, max: u64) -> Result<Vec<Deposit>, IngestError> {
        Ok(self.deposits.pop_multi(max).await?)
    }

    /// Admits a deposit outside of log ingestion, as genesis seeding does.
    /// Waits for any running cycle so both agree on the nonce.
    pub async fn enqueue_deposit(&self, deposit: Deposit) -> Result<EnqueueOutcome, IngestError> {
        let _guard = self.cycle_lock.lock().await;

        let expected = self.next_expected_nonce_unlocked().await?;
        let nonce = deposit.nonce();
        match admit(nonce, expected) {
            Decision::DiscardDuplicate => {
                debug!(%nonce, %expected, "ignoring already applied deposit");
                Ok(EnqueueOutcome::Duplicate)
            }
            Decision::RejectGap => Err(IngestError::OutOfOrderDeposit {
                expected,
                got: nonce,
                block: None,
            }),
            Decision::Apply => {
                let batch = IngestBatch {
                    pushes: vec![QueuePush::new(
                        DEPOSIT_QUEUE.to_owned(),
                        vec![encode_value(&deposit)?],
                        None,
                    )],
                    watermarks: Vec::new(),
                    deposit_nonce: Some(NonceAdvance {
                        expected,
                        next: next_nonce(expected)?,
                    }),
                };
                self.ingest_ops.commit_ingest_batch_async(batch).await?;
                debug!(%nonce, "enqueued deposit");
                Ok(EnqueueOutcome::Applied)
            }
        }
    }

    pub async fn pending_deposits(&self) -> Result<u64, IngestError> {
        Ok(self.deposits.len().await?)
    }

    pub async fn next_expected_nonce(&self) -> Result<u64, IngestError> {
        let _guard = self.cycle_lock.lock().await;
        self.next_expected_nonce_unlocked().await
    }

    async fn next_expected_nonce_unlocked(&self) -> Result<u64, IngestError> {
        self.ingest_ops
            .get_next_deposit_nonce_async()
            .await?
            .ok_or(IngestError::Db(DbError::NotBootstrapped))
    }

    /// Queue of a non-deposit stream, by stream name.
    pub fn stream_queue(&self, name: &str) -> Option<&StreamQueue> {
        self.streams
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, q)| q)
    }
}
