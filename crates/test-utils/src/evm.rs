//! Builders for execution-layer logs.

use alloy_primitives::keccak256;
use alloy_sol_types::SolEvent;
use kiln_primitives::{
    buf::{Buf20, Buf32},
    exec::{ExecHeader, RawLog},
};

/// Deterministic fake block hash for a height.
pub fn block_hash_at(number: u64) -> Buf32 {
    keccak256(number.to_be_bytes()).0.into()
}

pub fn header_at(number: u64) -> ExecHeader {
    ExecHeader::new(number, block_hash_at(number))
}

/// ABI-encodes `event` into a log as the execution client would return it.
pub fn make_log<E: SolEvent>(event: &E, address: Buf20, block_number: u64, log_index: u64) -> RawLog {
    let data = event.encode_log_data();
    RawLog {
        address,
        topics: data.topics().iter().map(|t| Buf32::from(*t)).collect(),
        data: data.data.to_vec(),
        block_number,
        block_hash: block_hash_at(block_number),
        log_index,
    }
}

/// A log whose first topic is `signature` but whose body is garbage.
pub fn make_malformed_log(
    signature: Buf32,
    address: Buf20,
    block_number: u64,
    log_index: u64,
) -> RawLog {
    RawLog {
        address,
        topics: vec![signature],
        data: vec![0xde, 0xad, 0xbe, 0xef],
        block_number,
        block_hash: block_hash_at(block_number),
        log_index,
    }
}
