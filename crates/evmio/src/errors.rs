use kiln_db::DbError;
use kiln_storage::QueueError;
use thiserror::Error;

use crate::{
    cache::CacheError, factory::DecodeError, ordering::NonceExhausted, registry::RegistryError,
    rpc::error::ClientError,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("client: {0}")]
    Client(#[from] ClientError),

    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    #[error("db: {0}")]
    Db(#[from] DbError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    /// `block` is absent for deposits enqueued outside of ingestion.
    #[error("deposit nonce {got} out of order (expected {expected}, block {block:?})")]
    OutOfOrderDeposit {
        expected: u64,
        got: u64,
        block: Option<u64>,
    },

    #[error("{0}")]
    NonceExhausted(#[from] NonceExhausted),

    #[error("another ingest cycle is in progress")]
    CycleInProgress,

    #[error("cancelled")]
    Cancelled,

    #[error("join: {0}")]
    Join(String),
}

impl IngestError {
    /// Whether retrying later can't help and the operator has to step in.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Registry(_) | Self::Cache(_) | Self::Join(_) => true,
            Self::Decode(e) => !matches!(e, DecodeError::Cancelled),
            Self::Client(_) => false,
            Self::Queue(QueueError::Empty) => false,
            Self::Queue(QueueError::Db(e)) | Self::Db(e) => is_fatal_db(e),
            Self::Queue(QueueError::Codec(_)) => true,
            Self::OutOfOrderDeposit { .. } | Self::NonceExhausted(_) => true,
            Self::CycleInProgress | Self::Cancelled => false,
        }
    }

    /// Whether a non-fatal error is expected to clear up on its own.  Ones
    /// that aren't still get retried, but are worth an operator's attention.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Client(e) => e.is_transient(),
            Self::Queue(QueueError::Empty) => true,
            Self::Queue(QueueError::Db(e)) | Self::Db(e) => !is_fatal_db(e),
            Self::Decode(DecodeError::Cancelled) => true,
            Self::CycleInProgress | Self::Cancelled => true,
            _ => false,
        }
    }
}

fn is_fatal_db(e: &DbError) -> bool {
    !matches!(e, DbError::Busy | DbError::TransactionError(_))
}
