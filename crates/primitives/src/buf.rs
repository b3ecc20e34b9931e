use std::{fmt, io, str};

use alloy_primitives::{Address, FixedBytes, B256};
use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// 20-byte buf, used for execution-layer contract addresses.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Buf20(pub FixedBytes<20>);
impl_buf_wrapper!(Buf20, 20);

impl From<Address> for Buf20 {
    fn from(value: Address) -> Self {
        Self(value.0)
    }
}

impl From<Buf20> for Address {
    fn from(value: Buf20) -> Self {
        Address::from(value.0)
    }
}

/// 32-byte buf, useful for hashes and event signatures.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Buf32(pub FixedBytes<32>);
impl_buf_wrapper!(Buf32, 32);

impl Buf32 {
    pub fn as_b256(&self) -> B256 {
        self.0
    }
}
