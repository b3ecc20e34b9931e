//! Error types for the execution client.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Header or block unknown to the client.
    #[error("not found: {0}")]
    NotFound(String),

    /// Client refused the log query because the block range is too wide.
    #[error("block range {from}..={to} too large")]
    RangeTooLarge { from: u64, to: u64 },

    /// Network error, retry might help
    #[error("network: {0}")]
    Network(String),

    /// Timeout error, retry might help
    #[error("timeout")]
    Timeout,

    /// Unknown error, unlikely to be recoverable
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Whether the next cycle can reasonably expect a different answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::RangeTooLarge { .. } | Self::Network(_) | Self::Timeout
        )
    }
}
