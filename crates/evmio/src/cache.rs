//! Per-stream finalization bookkeeping.

use kiln_db::types::StreamId;
use kiln_primitives::exec::RawLog;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::*;

use crate::factory::DecodedLogContainer;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("container with signature {got:?} pushed to stream {stream:?}")]
    WrongStream { stream: StreamId, got: StreamId },
}

/// Watermark plus staging area for one event stream.
///
/// A stream is idle while nothing is staged.  Logs above the watermark get
/// staged during a cycle, and the watermark moves once the cycle commits.
pub trait LogCache: Sync + Send {
    fn stream_id(&self) -> StreamId;

    /// True iff the log is above the watermark.
    fn should_process(&self, log: &RawLog) -> bool;

    /// Stages a container.  The caller has already checked
    /// [`Self::should_process`].
    fn push(&self, container: DecodedLogContainer) -> Result<(), CacheError>;

    fn set_last_finalized_block(&self, block: u64);

    fn last_finalized_block(&self) -> u64;

    /// Drains the staging area in push order.
    fn take_staged(&self) -> Vec<DecodedLogContainer>;

    fn clear_staged(&self);

    fn staged_len(&self) -> usize;
}

pub struct StreamCache {
    id: StreamId,
    watermark: RwLock<u64>,
    staged: Mutex<Vec<DecodedLogContainer>>,
}

impl StreamCache {
    pub fn new(id: StreamId, watermark: u64) -> Self {
        Self {
            id,
            watermark: RwLock::new(watermark),
            staged: Mutex::new(Vec::new()),
        }
    }
}

impl LogCache for StreamCache {
    fn stream_id(&self) -> StreamId {
        self.id
    }

    fn should_process(&self, log: &RawLog) -> bool {
        log.block_number > *self.watermark.read()
    }

    fn push(&self, container: DecodedLogContainer) -> Result<(), CacheError> {
        if container.signature != self.id {
            return Err(CacheError::WrongStream {
                stream: self.id,
                got: container.signature,
            });
        }
        self.staged.lock().push(container);
        Ok(())
    }

    fn set_last_finalized_block(&self, block: u64) {
        let mut wm = self.watermark.write();
        debug_assert!(block >= *wm, "cache: watermark regression");
        if block < *wm {
            warn!(stream = ?self.id, cur = *wm, %block, "ignoring watermark regression");
            return;
        }
        *wm = block;
    }

    fn last_finalized_block(&self) -> u64 {
        *self.watermark.read()
    }

    fn take_staged(&self) -> Vec<DecodedLogContainer> {
        std::mem::take(&mut *self.staged.lock())
    }

    fn clear_staged(&self) {
        self.staged.lock().clear();
    }

    fn staged_len(&self) -> usize {
        self.staged.lock().len()
    }
}
