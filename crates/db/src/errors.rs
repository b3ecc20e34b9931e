use kiln_primitives::buf::Buf32;
use rockbound::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// (stream, stored, attempted)
    #[error("watermark for stream {0:?} would regress from {1} to {2}")]
    WatermarkRegression(Buf32, u64, u64),

    #[error("deposit nonce mismatch (expected {expected}, stored {stored})")]
    NonceMismatch { expected: u64, stored: u64 },

    #[error("deposit nonce not initialized")]
    NotBootstrapped,

    #[error("queue {0} missing entry at seq {1}")]
    MissingQueueEntry(String, u64),

    #[error("invalid queue capacity {0}")]
    InvalidCapacity(u64),

    #[error("resource busy")]
    Busy,

    #[error("codec error {0}")]
    CodecError(String),

    #[error("transaction error {0}")]
    TransactionError(String),

    #[error("worker failed strangely")]
    WorkerFailedStrangely,

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for DbError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<CodecError> for DbError {
    fn from(value: CodecError) -> Self {
        Self::CodecError(value.to_string())
    }
}
