use kiln_primitives::buf::Buf20;
use serde::{Deserialize, Serialize};

/// Configuration for the execution-event ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// How often to run an ingestion cycle without a finalization
    /// notification, in ms.
    pub poll_interval_ms: u64,

    /// Widest block range requested from the execution client at once.
    pub max_blocks_per_query: u64,

    /// Worker threads used to decode logs.
    pub decode_workers: usize,

    /// Batches smaller than this are decoded on the calling thread.
    pub parallel_decode_threshold: usize,

    /// Watermark given to streams seen for the first time.  Logs at or below
    /// it are never ingested.
    pub start_block: u64,

    /// Nonce expected of the first deposit if none is stored yet.
    pub genesis_deposit_nonce: u64,

    pub streams: Vec<StreamConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_blocks_per_query: 1_000,
            decode_workers: 4,
            parallel_decode_threshold: 64,
            start_block: 0,
            genesis_deposit_nonce: 0,
            streams: Vec::new(),
        }
    }
}

/// Which event shape a stream carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Deposit,
    Withdrawal,
    Redirect,
}

/// One event stream to follow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Unique name, also used as the stream's queue name.
    pub name: String,
    pub kind: StreamKind,
    /// Contract emitting the events.
    pub address: Buf20,
    /// Bound for the stream's queue.  Unbounded if unset.  Must be unset for
    /// the deposit stream, whose queue is never truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<u64>,
}
