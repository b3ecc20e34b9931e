//! Execution-layer data shapes as the consensus side sees them.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::buf::{Buf20, Buf32};

/// Minimal execution block header.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct ExecHeader {
    pub number: u64,
    pub hash: Buf32,
}

impl ExecHeader {
    pub fn new(number: u64, hash: Buf32) -> Self {
        Self { number, hash }
    }
}

/// A log record as emitted by the execution engine.  Never mutated after it's
/// fetched.
#[derive(Clone, Debug, Eq, PartialEq, Arbitrary, BorshSerialize, BorshDeserialize)]
pub struct RawLog {
    pub address: Buf20,
    pub topics: Vec<Buf32>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_hash: Buf32,
    pub log_index: u64,
}

impl RawLog {
    /// The first topic, which for non-anonymous events is the event signature.
    pub fn signature(&self) -> Option<&Buf32> {
        self.topics.first()
    }

    /// Key we order logs by within a range.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}
