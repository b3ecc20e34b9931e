//! Scripted execution client and finality source for tests.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use kiln_primitives::prelude::*;
use kiln_test_utils::evm::header_at;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::rpc::{
    error::ClientError,
    traits::{ExecReader, FinalityProvider},
    types::FinalizedRef,
    ClientResult,
};

#[derive(Default)]
struct ClientState {
    headers: BTreeMap<u64, ExecHeader>,
    logs: Vec<RawLog>,
    max_range: Option<u64>,
    log_failures: VecDeque<ClientError>,
    log_queries: Vec<(u64, u64)>,
    hold: Option<Arc<Notify>>,
    cancel_after_logs: Option<CancellationToken>,
}

/// In-memory chain with logs.  Log queries are recorded and can be made to
/// fail, reject wide ranges, or park until released.
#[derive(Default)]
pub struct TestExecClient {
    state: Mutex<ClientState>,
}

impl TestExecClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds headers for every height up to `tip`.
    pub fn extend_chain(&self, tip: u64) {
        let mut state = self.state.lock();
        let start = state.headers.keys().next_back().map(|h| h + 1).unwrap_or(0);
        for n in start..=tip {
            state.headers.insert(n, header_at(n));
        }
    }

    pub fn add_log(&self, log: RawLog) {
        self.state.lock().logs.push(log);
    }

    /// Widest range, in blocks, a log query may cover.
    pub fn set_max_range(&self, max: Option<u64>) {
        self.state.lock().max_range = max;
    }

    /// Queues an error for the next log query.
    pub fn fail_next_logs(&self, err: ClientError) {
        self.state.lock().log_failures.push_back(err);
    }

    /// Every log query seen so far, as `(from, to)`.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().log_queries.clone()
    }

    /// Makes log queries wait until [`Self::release_logs`].
    pub fn hold_logs(&self) {
        self.state.lock().hold = Some(Arc::new(Notify::new()));
    }

    /// Cancels `token` once the next log query has produced its result.
    pub fn cancel_after_logs(&self, token: CancellationToken) {
        self.state.lock().cancel_after_logs = Some(token);
    }

    pub fn release_logs(&self) {
        if let Some(n) = self.state.lock().hold.take() {
            n.notify_waiters();
        }
    }
}

#[async_trait]
impl ExecReader for TestExecClient {
    async fn header_by_hash(&self, hash: Buf32) -> ClientResult<ExecHeader> {
        self.state
            .lock()
            .headers
            .values()
            .find(|h| h.hash == hash)
            .copied()
            .ok_or_else(|| ClientError::NotFound(format!("block {hash}")))
    }

    async fn header_by_number(&self, number: u64) -> ClientResult<ExecHeader> {
        self.state
            .lock()
            .headers
            .get(&number)
            .copied()
            .ok_or_else(|| ClientError::NotFound(format!("height {number}")))
    }

    async fn get_logs_in_range(
        &self,
        from: u64,
        to: u64,
        addresses: &[Buf20],
    ) -> ClientResult<Vec<RawLog>> {
        let hold = {
            let mut state = self.state.lock();
            state.log_queries.push((from, to));
            state.hold.clone()
        };

        if let Some(n) = hold {
            n.notified().await;
        }

        let mut state = self.state.lock();
        if let Some(err) = state.log_failures.pop_front() {
            return Err(err);
        }

        if let Some(max) = state.max_range {
            if to - from + 1 > max {
                return Err(ClientError::RangeTooLarge { from, to });
            }
        }

        let logs = state
            .logs
            .iter()
            .filter(|l| l.block_number >= from && l.block_number <= to)
            .filter(|l| addresses.contains(&l.address))
            .cloned()
            .collect();

        if let Some(token) = state.cancel_after_logs.take() {
            token.cancel();
        }
        Ok(logs)
    }
}

pub struct TestFinality {
    cur: Mutex<FinalizedRef>,
}

impl TestFinality {
    pub fn new(cur: FinalizedRef) -> Self {
        Self {
            cur: Mutex::new(cur),
        }
    }

    pub fn set(&self, cur: FinalizedRef) {
        *self.cur.lock() = cur;
    }
}

#[async_trait]
impl FinalityProvider for TestFinality {
    async fn finalized_block(&self) -> ClientResult<FinalizedRef> {
        Ok(*self.cur.lock())
    }
}
