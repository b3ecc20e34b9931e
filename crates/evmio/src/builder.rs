use std::sync::Arc;

use kiln_config::IngestConfig;
use kiln_db::traits::IngestDatabase;
use kiln_primitives::buf::Buf20;
use kiln_storage::{
    ops::{ingest, queue},
    CircularQueue, PersistentQueue,
};
use tokio::sync::Mutex;
use tracing::*;

use crate::{
    errors::IngestError,
    events::{EventKind, EventSignature},
    factory::LogFactory,
    handle::{DepositHandle, StreamQueue, DEPOSIT_QUEUE},
    processor::BatchProcessor,
    registry::EventTypeRegistry,
    rpc::traits::{ExecReader, FinalityProvider},
};

/// Collects stream registrations, then wires up the processor and the
/// consumer handle over one database.
pub struct IngestBuilder {
    config: IngestConfig,
    registry: EventTypeRegistry,
}

impl IngestBuilder {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            registry: EventTypeRegistry::new(),
        }
    }

    /// Registers every stream listed in the config.
    pub fn from_config(config: IngestConfig) -> Result<Self, IngestError> {
        let streams = config.streams.clone();
        let mut builder = Self::new(config);
        for s in streams {
            let kind = EventKind::from(s.kind);
            builder.register_stream(kind.signature(), &s.name, kind, s.address, s.queue_capacity)?;
        }
        Ok(builder)
    }

    pub fn register_stream(
        &mut self,
        signature: EventSignature,
        name: &str,
        kind: EventKind,
        address: Buf20,
        queue_capacity: Option<u64>,
    ) -> Result<&mut Self, IngestError> {
        self.registry
            .register_stream(signature, name, kind, address, queue_capacity)?;
        Ok(self)
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    /// Initializes absent watermarks and the deposit nonce, then returns the
    /// processor and a handle sharing its cycle lock.  Database calls run on
    /// `pool`.
    pub async fn build<C, F, D>(
        self,
        client: Arc<C>,
        finality: Arc<F>,
        db: Arc<D>,
        pool: threadpool::ThreadPool,
    ) -> Result<(BatchProcessor<C, F>, DepositHandle), IngestError>
    where
        C: ExecReader,
        F: FinalityProvider,
        D: IngestDatabase + Sync + Send + 'static,
    {
        let ingest_ops = Arc::new(ingest::Context::new(db.clone()).into_ops(pool.clone()));
        let queue_ops = Arc::new(queue::Context::new(db).into_ops(pool));

        let nonce = ingest_ops
            .init_deposit_nonce_async(self.config.genesis_deposit_nonce)
            .await?;

        let mut watermarks = Vec::with_capacity(self.registry.streams().len());
        let mut stream_queues = Vec::new();
        for s in self.registry.streams() {
            let wm = ingest_ops
                .init_watermark_async(s.id(), self.config.start_block)
                .await?;
            info!(stream = %s.name(), watermark = %wm, "loaded stream");
            watermarks.push(wm);

            if s.is_deposit_stream() {
                continue;
            }

            let q = match s.queue_capacity() {
                Some(cap) => StreamQueue::Circular(CircularQueue::new(
                    s.queue_id(),
                    queue_ops.clone(),
                    cap,
                )),
                None => StreamQueue::Unbounded(PersistentQueue::new(s.queue_id(), queue_ops.clone())),
            };
            stream_queues.push((s.name().to_owned(), q));
        }

        let decode_pool = threadpool::Builder::new()
            .num_threads(self.config.decode_workers.max(1))
            .thread_name("kiln-decode".to_owned())
            .build();

        let registry = Arc::new(self.registry);
        let factory = Arc::new(LogFactory::new(
            registry.clone(),
            decode_pool,
            self.config.parallel_decode_threshold,
        ));
        let cycle_lock = Arc::new(Mutex::new(()));

        let processor = BatchProcessor::new(
            client,
            finality,
            factory,
            registry,
            watermarks,
            ingest_ops.clone(),
            cycle_lock.clone(),
            self.config.max_blocks_per_query,
        );
        let handle = DepositHandle::new(
            PersistentQueue::new(DEPOSIT_QUEUE, queue_ops),
            stream_queues,
            ingest_ops,
            cycle_lock,
        );

        info!(next_nonce = %nonce, floor = ?processor.floor(), "ingest pipeline ready");
        Ok((processor, handle))
    }
}

#[cfg(test)]
mod tests {
    use kiln_config::{StreamConfig, StreamKind};
    use kiln_db::stubs::ingest::StubIngestDb;
    use kiln_primitives::payload::Deposit;
    use kiln_rocksdb::{test_utils::get_rocksdb_tmp_instance, RBIngestDb};
    use kiln_test_utils::evm::make_log;
    use threadpool::ThreadPool;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        events::abi,
        handle::EnqueueOutcome,
        processor::CycleOutcome,
        rpc::types::FinalizedRef,
        test_utils::{TestExecClient, TestFinality},
    };

    fn config() -> IngestConfig {
        IngestConfig {
            start_block: 10,
            genesis_deposit_nonce: 3,
            streams: vec![
                StreamConfig {
                    name: "deposits".into(),
                    kind: StreamKind::Deposit,
                    address: Buf20::from([1; 20]),
                    queue_capacity: None,
                },
                StreamConfig {
                    name: "redirects".into(),
                    kind: StreamKind::Redirect,
                    address: Buf20::from([2; 20]),
                    queue_capacity: Some(8),
                },
            ],
            ..Default::default()
        }
    }

    fn deposit(index: u64) -> Deposit {
        Deposit {
            index,
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config_registers_streams() {
        let b = IngestBuilder::from_config(config()).unwrap();
        let reg = b.registry();
        assert_eq!(reg.streams().len(), 2);
        assert!(reg.deposit_stream().is_some());
        assert_eq!(
            reg.stream_for(&EventKind::Redirect.signature())
                .and_then(|s| s.queue_capacity())
                .map(|c| c.get()),
            Some(8)
        );
    }

    #[test]
    fn test_from_config_rejects_duplicate_names() {
        let mut cfg = config();
        cfg.streams[1].name = "deposits".into();
        assert!(matches!(
            IngestBuilder::from_config(cfg),
            Err(IngestError::Registry(_))
        ));
    }

    #[tokio::test]
    async fn test_enqueue_deposit_ordering() {
        let (_proc, handle) = IngestBuilder::from_config(config())
            .unwrap()
            .build(
                Arc::new(TestExecClient::new()),
                Arc::new(TestFinality::new(FinalizedRef::Number(10))),
                Arc::new(StubIngestDb::new()),
                ThreadPool::new(1),
            )
            .await
            .unwrap();

        assert_eq!(handle.next_expected_nonce().await.unwrap(), 3);
        assert_eq!(
            handle.enqueue_deposit(deposit(2)).await.unwrap(),
            EnqueueOutcome::Duplicate
        );
        assert!(matches!(
            handle.enqueue_deposit(deposit(4)).await,
            Err(IngestError::OutOfOrderDeposit {
                expected: 3,
                got: 4,
                block: None
            })
        ));
        assert_eq!(
            handle.enqueue_deposit(deposit(3)).await.unwrap(),
            EnqueueOutcome::Applied
        );
        assert_eq!(
            handle.enqueue_deposit(deposit(4)).await.unwrap(),
            EnqueueOutcome::Applied
        );

        assert_eq!(handle.pending_deposits().await.unwrap(), 2);
        assert_eq!(handle.next_expected_nonce().await.unwrap(), 5);
        let popped = handle.next_deposits(1).await.unwrap();
        assert_eq!(popped, vec![deposit(3)]);
        assert_eq!(handle.pending_deposits().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_last_nonce_rejected() {
        let mut cfg = config();
        cfg.genesis_deposit_nonce = u64::MAX;
        let (_proc, handle) = IngestBuilder::from_config(cfg)
            .unwrap()
            .build(
                Arc::new(TestExecClient::new()),
                Arc::new(TestFinality::new(FinalizedRef::Number(10))),
                Arc::new(StubIngestDb::new()),
                ThreadPool::new(1),
            )
            .await
            .unwrap();

        let res = handle.enqueue_deposit(deposit(u64::MAX)).await;
        assert!(matches!(res, Err(IngestError::NonceExhausted(_))));
        assert!(res.unwrap_err().is_fatal());
        assert_eq!(handle.pending_deposits().await.unwrap(), 0);
        assert_eq!(handle.next_expected_nonce().await.unwrap(), u64::MAX);
    }

    #[tokio::test]
    async fn test_rocksdb_restart_keeps_progress() {
        let (rdb, ops) = get_rocksdb_tmp_instance().unwrap();
        let db = Arc::new(RBIngestDb::new(rdb, ops));

        let client = Arc::new(TestExecClient::new());
        client.extend_chain(20);
        let ev = abi::Deposit {
            pubkey: vec![7; 48].into(),
            credentials: vec![1; 32].into(),
            amount: 1_000_000_000,
            signature: vec![2; 96].into(),
            index: 3,
        };
        client.add_log(make_log(&ev, Buf20::from([1; 20]), 12, 0));
        let finality = Arc::new(TestFinality::new(FinalizedRef::Number(12)));

        let (proc, _handle) = IngestBuilder::from_config(config())
            .unwrap()
            .build(client.clone(), finality.clone(), db.clone(), ThreadPool::new(2))
            .await
            .unwrap();
        let out = proc.run_cycle(&CancellationToken::new()).await.unwrap();
        assert!(matches!(out, CycleOutcome::Ingested(_)));
        drop(proc);

        // A second build over the same database picks up where we left off.
        let mut cfg = config();
        cfg.start_block = 0;
        cfg.genesis_deposit_nonce = 0;
        let (proc, handle) = IngestBuilder::from_config(cfg)
            .unwrap()
            .build(client, finality, db, ThreadPool::new(2))
            .await
            .unwrap();

        assert_eq!(proc.floor(), Some(12));
        assert_eq!(handle.next_expected_nonce().await.unwrap(), 4);
        let out = proc.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(out, CycleOutcome::NoOp { finalized: 12 });

        let deps = handle.next_deposits(10).await.unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].pubkey, vec![7; 48]);
    }
}
