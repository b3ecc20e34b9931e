//! Validator-set payloads carried by execution-layer events.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// A stake deposit.  `index` is the deposit contract's nonce for it.
#[derive(
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Deposit {
    pub pubkey: Vec<u8>,
    pub withdrawal_credentials: Vec<u8>,
    pub amount: u64,
    pub signature: Vec<u8>,
    pub index: u64,
}

impl Deposit {
    pub fn nonce(&self) -> u64 {
        self.index
    }
}

#[derive(
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Withdrawal {
    pub from_pubkey: Vec<u8>,
    pub credentials: Vec<u8>,
    pub withdrawal_credentials: Vec<u8>,
    pub amount: u64,
    pub index: u64,
}

/// Moves stake from one validator key to another.
#[derive(
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Redirect {
    pub from_pubkey: Vec<u8>,
    pub to_pubkey: Vec<u8>,
    pub credentials: Vec<u8>,
    pub amount: u64,
    pub index: u64,
}
