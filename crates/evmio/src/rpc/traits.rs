use async_trait::async_trait;
use kiln_primitives::{
    buf::{Buf20, Buf32},
    exec::{ExecHeader, RawLog},
};

use super::{types::FinalizedRef, ClientResult};

/// Read access to the execution engine.
#[async_trait]
pub trait ExecReader: Sync + Send + 'static {
    /// Fails with `NotFound` if the hash is unknown.
    async fn header_by_hash(&self, hash: Buf32) -> ClientResult<ExecHeader>;

    /// Fails with `NotFound` if there's no block at that height.
    async fn header_by_number(&self, number: u64) -> ClientResult<ExecHeader>;

    /// Logs emitted by any of `addresses` in blocks `from..=to`.  May fail
    /// with `RangeTooLarge`, in which case the caller narrows the range.
    async fn get_logs_in_range(
        &self,
        from: u64,
        to: u64,
        addresses: &[Buf20],
    ) -> ClientResult<Vec<RawLog>>;
}

/// Source of the execution block consensus considers final.
#[async_trait]
pub trait FinalityProvider: Sync + Send + 'static {
    async fn finalized_block(&self) -> ClientResult<FinalizedRef>;
}
