//! Decoding raw execution logs into typed containers.

use std::sync::{mpsc, Arc};

use borsh::{BorshDeserialize, BorshSerialize};
use kiln_primitives::{
    buf::{Buf20, Buf32},
    exec::RawLog,
};
use thiserror::Error;
use threadpool::ThreadPool;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    events::{DecodedValue, EventSignature},
    registry::EventTypeRegistry,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    /// A registered contract emitted a log that doesn't fit its schema.
    #[error("malformed {name} log at block {block} index {log_index}: {reason}")]
    Malformed {
        name: String,
        block: u64,
        log_index: u64,
        reason: String,
    },

    #[error("decode cancelled")]
    Cancelled,

    #[error("decode worker exited without reporting")]
    WorkerLost,
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// A decoded log along with where it came from.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct DecodedLogContainer {
    pub value: DecodedValue,
    pub signature: EventSignature,
    pub address: Buf20,
    pub block_number: u64,
    pub block_hash: Buf32,
    pub log_index: u64,
}

impl DecodedLogContainer {
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Decodes one log against the registry.  Logs from contracts or with
/// signatures we don't track are `Ok(None)`.
pub fn decode_log(
    registry: &EventTypeRegistry,
    log: &RawLog,
) -> DecodeResult<Option<DecodedLogContainer>> {
    let Some(signature) = log.signature() else {
        return Ok(None);
    };

    let Some(stream) = registry.stream_for(signature) else {
        return Ok(None);
    };

    if !stream.accepts(&log.address) {
        return Ok(None);
    }

    let value = stream
        .kind()
        .decode(log)
        .map_err(|e| DecodeError::Malformed {
            name: stream.name().to_owned(),
            block: log.block_number,
            log_index: log.log_index,
            reason: e.to_string(),
        })?;

    Ok(Some(DecodedLogContainer {
        value,
        signature: *signature,
        address: log.address,
        block_number: log.block_number,
        block_hash: log.block_hash,
        log_index: log.log_index,
    }))
}

type Slot = (usize, DecodeResult<Option<DecodedLogContainer>>);

pub struct LogFactory {
    registry: Arc<EventTypeRegistry>,
    pool: ThreadPool,
    parallel_threshold: usize,
}

impl LogFactory {
    /// Batches shorter than `parallel_threshold` are decoded on the calling
    /// thread.
    pub fn new(registry: Arc<EventTypeRegistry>, pool: ThreadPool, parallel_threshold: usize) -> Self {
        Self {
            registry,
            pool,
            parallel_threshold,
        }
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    pub fn decode_one(&self, log: &RawLog) -> DecodeResult<Option<DecodedLogContainer>> {
        decode_log(&self.registry, log)
    }

    /// Decodes a batch, dropping unregistered logs and keeping input order.
    /// Fails on the first malformed log and stops the remaining workers.
    ///
    /// Blocks the calling thread.
    pub fn decode_many(
        &self,
        logs: Vec<RawLog>,
        cancel: &CancellationToken,
    ) -> DecodeResult<Vec<DecodedLogContainer>> {
        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled);
        }

        let workers = self.pool.max_count();
        if logs.len() < self.parallel_threshold.max(2) || workers < 2 {
            return self.decode_sequential(&logs, cancel);
        }

        let total = logs.len();
        let chunk = total.div_ceil(workers);
        let logs = Arc::new(logs);
        let abort = cancel.child_token();
        let (tx, rx) = mpsc::channel::<Slot>();

        for start in (0..total).step_by(chunk) {
            let end = (start + chunk).min(total);
            let logs = logs.clone();
            let registry = self.registry.clone();
            let abort = abort.clone();
            let tx = tx.clone();

            self.pool.execute(move || {
                for i in start..end {
                    if abort.is_cancelled() {
                        break;
                    }

                    let res = decode_log(&registry, &logs[i]);
                    let failed = res.is_err();
                    if tx.send((i, res)).is_err() {
                        break;
                    }

                    if failed {
                        abort.cancel();
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<DecodedLogContainer>> = (0..total).map(|_| None).collect();
        let mut received = 0;
        while received < total {
            match rx.recv() {
                Ok((i, Ok(c))) => {
                    slots[i] = c;
                    received += 1;
                }
                Ok((_, Err(e))) => {
                    abort.cancel();
                    return Err(e);
                }
                Err(_) => {
                    // Every worker hung up early.
                    if cancel.is_cancelled() {
                        return Err(DecodeError::Cancelled);
                    }
                    error!(%received, %total, "decode workers exited early");
                    return Err(DecodeError::WorkerLost);
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn decode_sequential(
        &self,
        logs: &[RawLog],
        cancel: &CancellationToken,
    ) -> DecodeResult<Vec<DecodedLogContainer>> {
        let mut out = Vec::with_capacity(logs.len());
        for log in logs {
            if cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }
            if let Some(c) = self.decode_one(log)? {
                out.push(c);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use kiln_primitives::payload::Withdrawal;
    use kiln_test_utils::evm::{make_log, make_malformed_log};

    use super::*;
    use crate::events::{abi, EventKind};

    fn addr(b: u8) -> Buf20 {
        Buf20::from([b; 20])
    }

    fn withdrawal_event(index: u64) -> abi::Withdrawal {
        abi::Withdrawal {
            fromPubkey: vec![1; 48].into(),
            credentials: vec![2; 32].into(),
            withdrawalCredentials: vec![3; 32].into(),
            amount: 32_000_000_000,
            index,
        }
    }

    fn registry() -> Arc<EventTypeRegistry> {
        let mut reg = EventTypeRegistry::new();
        reg.register_stream(
            EventKind::Withdrawal.signature(),
            "withdrawals",
            EventKind::Withdrawal,
            addr(1),
            None,
        )
        .unwrap();
        Arc::new(reg)
    }

    fn factory(workers: usize, threshold: usize) -> LogFactory {
        LogFactory::new(registry(), ThreadPool::new(workers), threshold)
    }

    #[test]
    fn test_decode_one_registered() {
        let f = factory(1, 64);
        let log = make_log(&withdrawal_event(3), addr(1), 102, 0);
        let c = f.decode_one(&log).unwrap().expect("registered log decodes");

        assert_eq!(c.block_number, 102);
        assert_eq!(c.signature, EventKind::Withdrawal.signature());
        assert_eq!(
            c.value,
            DecodedValue::Withdrawal(Withdrawal {
                from_pubkey: vec![1; 48],
                credentials: vec![2; 32],
                withdrawal_credentials: vec![3; 32],
                amount: 32_000_000_000,
                index: 3,
            })
        );
    }

    #[test]
    fn test_decode_one_skips_unregistered() {
        let f = factory(1, 64);

        let foreign = make_log(&withdrawal_event(0), addr(9), 101, 0);
        assert!(f.decode_one(&foreign).unwrap().is_none());

        let redirect = abi::Redirect {
            fromPubkey: vec![1; 48].into(),
            toPubkey: vec![2; 48].into(),
            credentials: vec![3; 32].into(),
            amount: 1,
            index: 0,
        };
        let other_sig = make_log(&redirect, addr(1), 101, 1);
        assert!(f.decode_one(&other_sig).unwrap().is_none());

        let mut anonymous = make_log(&withdrawal_event(0), addr(1), 101, 2);
        anonymous.topics.clear();
        assert!(f.decode_one(&anonymous).unwrap().is_none());
    }

    #[test]
    fn test_decode_one_malformed() {
        let f = factory(1, 64);
        let log = make_malformed_log(EventKind::Withdrawal.signature(), addr(1), 105, 4);
        let err = f.decode_one(&log).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Malformed {
                block: 105,
                log_index: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_many_parallel_keeps_order() {
        let f = factory(4, 8);
        let logs: Vec<_> = (0..200u64)
            .map(|i| {
                let a = if i % 5 == 0 { addr(9) } else { addr(1) };
                make_log(&withdrawal_event(i), a, 100 + i / 4, i % 4)
            })
            .collect();

        let out = f.decode_many(logs, &CancellationToken::new()).unwrap();
        assert_eq!(out.len(), 160);

        let indices: Vec<_> = out.iter().map(|c| c.value.index()).collect();
        let expected: Vec<_> = (0..200u64).filter(|i| i % 5 != 0).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn test_decode_many_fails_fast() {
        let f = factory(4, 8);
        let mut logs: Vec<_> = (0..100u64)
            .map(|i| make_log(&withdrawal_event(i), addr(1), 100 + i, 0))
            .collect();
        logs[57] = make_malformed_log(EventKind::Withdrawal.signature(), addr(1), 157, 0);

        let err = f.decode_many(logs, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { block: 157, .. }));
    }

    #[test]
    fn test_decode_many_cancelled() {
        let f = factory(4, 8);
        let logs: Vec<_> = (0..20u64)
            .map(|i| make_log(&withdrawal_event(i), addr(1), 100 + i, 0))
            .collect();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            f.decode_many(logs, &cancel),
            Err(DecodeError::Cancelled)
        ));
    }
}
