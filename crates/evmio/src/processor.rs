//! The ingestion cycle: finalized range to committed queue entries.

use std::{future::Future, sync::Arc};

use kiln_db::types::{IngestBatch, NonceAdvance, QueuePush, StreamId};
use kiln_db::DbError;
use kiln_primitives::exec::{ExecHeader, RawLog};
use kiln_storage::{encode_value, IngestDataOps};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    cache::{CacheError, LogCache, StreamCache},
    errors::IngestError,
    factory::{DecodeError, DecodedLogContainer, LogFactory},
    handle::DEPOSIT_QUEUE,
    ordering::{Decision, DepositOrderingPolicy},
    registry::{EventTypeRegistry, StreamDescriptor},
    rpc::{
        error::ClientError,
        traits::{ExecReader, FinalityProvider},
        types::FinalizedRef,
        ClientResult,
    },
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleSummary {
    /// First block of the fetched range.
    pub from: u64,

    /// Last block of the fetched range, the new finalized block.
    pub to: u64,

    pub logs_fetched: usize,

    /// Unregistered logs plus logs at or below their stream's watermark.
    pub logs_skipped: usize,

    /// Entries written to per-stream queues, including admitted deposits.
    pub entries_queued: usize,

    pub deposits_applied: usize,
    pub deposits_discarded: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// Nothing new was finalized.
    NoOp { finalized: u64 },
    Ingested(CycleSummary),
}

struct StreamSlot {
    desc: StreamDescriptor,
    cache: StreamCache,
}

/// Runs ingestion cycles.  Only one cycle runs at a time, and a cycle either
/// commits all of its queue writes and watermark advances or none of them.
pub struct BatchProcessor<C: ExecReader, F: FinalityProvider> {
    client: Arc<C>,
    finality: Arc<F>,
    registry: Arc<EventTypeRegistry>,
    factory: Arc<LogFactory>,
    streams: Vec<StreamSlot>,
    ingest_ops: Arc<IngestDataOps>,
    cycle_lock: Arc<Mutex<()>>,
    max_blocks_per_query: u64,
}

impl<C: ExecReader, F: FinalityProvider> BatchProcessor<C, F> {
    /// `watermarks` are the stored watermarks of every registered stream, in
    /// the registry's order.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: Arc<C>,
        finality: Arc<F>,
        factory: Arc<LogFactory>,
        registry: Arc<EventTypeRegistry>,
        watermarks: Vec<u64>,
        ingest_ops: Arc<IngestDataOps>,
        cycle_lock: Arc<Mutex<()>>,
        max_blocks_per_query: u64,
    ) -> Self {
        let streams = registry
            .streams()
            .iter()
            .zip(watermarks)
            .map(|(desc, wm)| StreamSlot {
                desc: desc.clone(),
                cache: StreamCache::new(desc.id(), wm),
            })
            .collect();

        Self {
            client,
            finality,
            registry,
            factory,
            streams,
            ingest_ops,
            cycle_lock,
            max_blocks_per_query: max_blocks_per_query.max(1),
        }
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    /// Current watermark of every stream by name.
    pub fn watermarks(&self) -> Vec<(String, u64)> {
        self.streams
            .iter()
            .map(|s| (s.desc.name().to_owned(), s.cache.last_finalized_block()))
            .collect()
    }

    pub fn watermark(&self, stream: &StreamId) -> Option<u64> {
        self.slot(stream).map(|s| s.cache.last_finalized_block())
    }

    /// Lowest watermark across streams, where the next fetch starts from.
    pub fn floor(&self) -> Option<u64> {
        self.streams
            .iter()
            .map(|s| s.cache.last_finalized_block())
            .min()
    }

    fn slot(&self, stream: &StreamId) -> Option<&StreamSlot> {
        self.streams.iter().find(|s| s.desc.id() == *stream)
    }

    /// Runs one cycle.  Fails with `CycleInProgress` instead of waiting if
    /// another cycle holds the lock.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome, IngestError> {
        let _guard = self
            .cycle_lock
            .try_lock()
            .map_err(|_| IngestError::CycleInProgress)?;

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let res = self.run_cycle_locked(cancel).await;
        if res.is_err() {
            for s in &self.streams {
                s.cache.clear_staged();
            }
        }
        res
    }

    async fn run_cycle_locked(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, IngestError> {
        let finalized = self.resolve_finalized(cancel).await?;

        let Some(floor) = self.floor() else {
            return Ok(CycleOutcome::NoOp {
                finalized: finalized.number,
            });
        };

        if finalized.number <= floor {
            if finalized.number < floor {
                warn!(finalized = %finalized.number, %floor, "finalized block behind watermarks");
            }
            return Ok(CycleOutcome::NoOp {
                finalized: finalized.number,
            });
        }

        let from = floor + 1;
        let to = finalized.number;
        debug!(%from, %to, "fetching logs");

        let mut logs = self.fetch_logs(from, to, cancel).await?;
        logs.sort_by_key(|l| l.position());

        let mut summary = CycleSummary {
            from,
            to,
            logs_fetched: logs.len(),
            ..Default::default()
        };

        let wanted = self.filter_logs(logs, to);
        summary.logs_skipped = summary.logs_fetched - wanted.len();

        let containers = self.decode(wanted, cancel).await?;
        for c in containers {
            let slot = self
                .slot(&c.signature)
                .ok_or(CacheError::WrongStream {
                    stream: c.signature,
                    got: c.signature,
                })?;
            slot.cache.push(c)?;
        }

        let (batch, targets) = self.build_batch(to, &mut summary).await?;

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let receipt = self.ingest_ops.commit_ingest_batch_async(batch).await?;
        for (queue, evicted) in &receipt.evicted {
            warn!(%queue, evicted = evicted.len(), "circular queue evicted entries");
        }

        for (slot, target) in self.streams.iter().zip(targets) {
            slot.cache.set_last_finalized_block(target);
        }

        info!(
            %from,
            %to,
            entries = summary.entries_queued,
            deposits = summary.deposits_applied,
            "committed ingest batch"
        );
        Ok(CycleOutcome::Ingested(summary))
    }

    async fn resolve_finalized(&self, cancel: &CancellationToken) -> Result<ExecHeader, IngestError> {
        let fref = with_cancel(cancel, self.finality.finalized_block()).await??;
        let header = match fref {
            FinalizedRef::Hash(h) => with_cancel(cancel, self.client.header_by_hash(h)).await??,
            FinalizedRef::Number(n) => {
                with_cancel(cancel, self.client.header_by_number(n)).await??
            }
        };
        Ok(header)
    }

    /// Fetches `from..=to` in chunks, halving the chunk whenever the client
    /// says the range is too large.
    async fn fetch_logs(
        &self,
        from: u64,
        to: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawLog>, IngestError> {
        let addresses = self.registry.addresses();
        let mut span = self.max_blocks_per_query;
        let mut start = from;
        let mut out = Vec::new();

        loop {
            let end = to.min(start.saturating_add(span - 1));
            let res = with_cancel(
                cancel,
                self.client.get_logs_in_range(start, end, &addresses),
            )
            .await?;

            match res {
                Ok(logs) => {
                    out.extend(logs);
                    if end >= to {
                        break;
                    }
                    start = end + 1;
                }

                Err(ClientError::RangeTooLarge { .. }) if end > start => {
                    span = ((end - start + 1) / 2).max(1);
                    debug!(%start, %end, %span, "narrowing log query");
                }

                Err(e) => return Err(e.into()),
            }
        }

        Ok(out)
    }

    /// Keeps logs some stream wants.  Input is sorted and so is the output.
    fn filter_logs(&self, logs: Vec<RawLog>, to: u64) -> Vec<RawLog> {
        logs.into_iter()
            .filter(|log| {
                if log.block_number > to {
                    warn!(block = %log.block_number, %to, "client returned log past range");
                    return false;
                }

                let Some(sig) = log.signature() else {
                    return false;
                };

                match self.slot(sig) {
                    Some(s) if s.desc.accepts(&log.address) => s.cache.should_process(log),
                    _ => false,
                }
            })
            .collect()
    }

    async fn decode(
        &self,
        logs: Vec<RawLog>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DecodedLogContainer>, IngestError> {
        if logs.is_empty() {
            return Ok(Vec::new());
        }

        let factory = self.factory.clone();
        let cancel = cancel.clone();
        let res = tokio::task::spawn_blocking(move || factory.decode_many(logs, &cancel))
            .await
            .map_err(|e| IngestError::Join(e.to_string()))?;
        res.map_err(|e| match e {
            DecodeError::Cancelled => IngestError::Cancelled,
            e => e.into(),
        })
    }

    /// Drains staging into a batch.  Returns the batch and the watermark each
    /// stream moves to once it's committed.
    async fn build_batch(
        &self,
        to: u64,
        summary: &mut CycleSummary,
    ) -> Result<(IngestBatch, Vec<u64>), IngestError> {
        let mut batch = IngestBatch::default();
        let mut targets = Vec::with_capacity(self.streams.len());

        for slot in &self.streams {
            let staged = slot.cache.take_staged();

            if slot.desc.is_deposit_stream() {
                if !staged.is_empty() {
                    let expected = self
                        .ingest_ops
                        .get_next_deposit_nonce_async()
                        .await?
                        .ok_or(DbError::NotBootstrapped)?;
                    let mut policy = DepositOrderingPolicy::new(expected);
                    let entries = admit_deposits(&mut policy, staged, summary)?;

                    if policy.expected() != expected {
                        batch.deposit_nonce = Some(NonceAdvance {
                            expected,
                            next: policy.expected(),
                        });
                    }
                    if !entries.is_empty() {
                        summary.entries_queued += entries.len();
                        batch
                            .pushes
                            .push(QueuePush::new(DEPOSIT_QUEUE.to_owned(), entries, None));
                    }
                }
            } else if !staged.is_empty() {
                let entries = staged
                    .iter()
                    .map(encode_value)
                    .collect::<Result<Vec<_>, _>>()?;
                summary.entries_queued += entries.len();
                batch.pushes.push(QueuePush::new(
                    slot.desc.queue_id(),
                    entries,
                    slot.desc.queue_capacity().map(|c| c.get()),
                ));
            }

            let cur = slot.cache.last_finalized_block();
            let target = cur.max(to);
            if target > cur {
                batch.watermarks.push((slot.desc.id(), target));
            }
            targets.push(target);
        }

        Ok((batch, targets))
    }
}

/// Runs staged deposits through the nonce policy, returning encoded entries
/// for the admitted ones.
fn admit_deposits(
    policy: &mut DepositOrderingPolicy,
    staged: Vec<DecodedLogContainer>,
    summary: &mut CycleSummary,
) -> Result<Vec<Vec<u8>>, IngestError> {
    let mut entries = Vec::new();
    for c in staged {
        let Some(deposit) = c.value.as_deposit() else {
            return Err(CacheError::WrongStream {
                stream: c.signature,
                got: c.value.kind().signature(),
            }
            .into());
        };

        let nonce = deposit.nonce();
        match policy.admit(nonce)? {
            Decision::Apply => {
                entries.push(encode_value(deposit)?);
                summary.deposits_applied += 1;
            }
            Decision::DiscardDuplicate => {
                debug!(%nonce, block = %c.block_number, "discarding duplicate deposit");
                summary.deposits_discarded += 1;
            }
            Decision::RejectGap => {
                error!(%nonce, expected = %policy.expected(), block = %c.block_number, "deposit nonce gap");
                return Err(IngestError::OutOfOrderDeposit {
                    expected: policy.expected(),
                    got: nonce,
                    block: Some(c.block_number),
                });
            }
        }
    }
    Ok(entries)
}

async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = ClientResult<T>>,
) -> Result<ClientResult<T>, IngestError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IngestError::Cancelled),
        res = fut => Ok(res),
    }
}
