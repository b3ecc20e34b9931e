//! Execution-layer event shapes we know how to decode.

use alloy_sol_types::SolEvent;
use borsh::{BorshDeserialize, BorshSerialize};
use kiln_config::StreamKind;
use kiln_primitives::{
    buf::Buf32,
    exec::RawLog,
    payload::{Deposit, Redirect, Withdrawal},
};

/// Identifier of an event shape, the keccak hash of its canonical signature.
pub type EventSignature = Buf32;

pub mod abi {
    use alloy_sol_types::sol;

    sol! {
        #[derive(Debug, PartialEq, Eq)]
        event Deposit(bytes pubkey, bytes credentials, uint64 amount, bytes signature, uint64 index);

        #[derive(Debug, PartialEq, Eq)]
        event Withdrawal(
            bytes fromPubkey,
            bytes credentials,
            bytes withdrawalCredentials,
            uint64 amount,
            uint64 index
        );

        #[derive(Debug, PartialEq, Eq)]
        event Redirect(bytes fromPubkey, bytes toPubkey, bytes credentials, uint64 amount, uint64 index);
    }
}

/// Decode target of a registered event.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize)]
pub enum EventKind {
    Deposit,
    Withdrawal,
    Redirect,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [Self::Deposit, Self::Withdrawal, Self::Redirect];

    /// Signature hash of the on-chain schema.
    pub fn signature(&self) -> EventSignature {
        match self {
            Self::Deposit => abi::Deposit::SIGNATURE_HASH.into(),
            Self::Withdrawal => abi::Withdrawal::SIGNATURE_HASH.into(),
            Self::Redirect => abi::Redirect::SIGNATURE_HASH.into(),
        }
    }

    /// Canonical signature text, like `Deposit(bytes,bytes,uint64,bytes,uint64)`.
    pub fn schema(&self) -> &'static str {
        match self {
            Self::Deposit => abi::Deposit::SIGNATURE,
            Self::Withdrawal => abi::Withdrawal::SIGNATURE,
            Self::Redirect => abi::Redirect::SIGNATURE,
        }
    }

    pub fn zero_value(&self) -> DecodedValue {
        match self {
            Self::Deposit => DecodedValue::Deposit(Deposit::default()),
            Self::Withdrawal => DecodedValue::Withdrawal(Withdrawal::default()),
            Self::Redirect => DecodedValue::Redirect(Redirect::default()),
        }
    }

    /// Decodes a log of this kind, checking topics against the schema.
    pub fn decode(&self, log: &RawLog) -> Result<DecodedValue, alloy_sol_types::Error> {
        let topics = log.topics.iter().map(|t| t.as_b256());
        let data = &log.data[..];

        Ok(match self {
            Self::Deposit => {
                let ev = abi::Deposit::decode_raw_log(topics, data, true)?;
                DecodedValue::Deposit(Deposit {
                    pubkey: ev.pubkey.to_vec(),
                    withdrawal_credentials: ev.credentials.to_vec(),
                    amount: ev.amount,
                    signature: ev.signature.to_vec(),
                    index: ev.index,
                })
            }
            Self::Withdrawal => {
                let ev = abi::Withdrawal::decode_raw_log(topics, data, true)?;
                DecodedValue::Withdrawal(Withdrawal {
                    from_pubkey: ev.fromPubkey.to_vec(),
                    credentials: ev.credentials.to_vec(),
                    withdrawal_credentials: ev.withdrawalCredentials.to_vec(),
                    amount: ev.amount,
                    index: ev.index,
                })
            }
            Self::Redirect => {
                let ev = abi::Redirect::decode_raw_log(topics, data, true)?;
                DecodedValue::Redirect(Redirect {
                    from_pubkey: ev.fromPubkey.to_vec(),
                    to_pubkey: ev.toPubkey.to_vec(),
                    credentials: ev.credentials.to_vec(),
                    amount: ev.amount,
                    index: ev.index,
                })
            }
        })
    }
}

impl From<StreamKind> for EventKind {
    fn from(value: StreamKind) -> Self {
        match value {
            StreamKind::Deposit => Self::Deposit,
            StreamKind::Withdrawal => Self::Withdrawal,
            StreamKind::Redirect => Self::Redirect,
        }
    }
}

/// A decoded event body.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum DecodedValue {
    Deposit(Deposit),
    Withdrawal(Withdrawal),
    Redirect(Redirect),
}

impl DecodedValue {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Deposit(_) => EventKind::Deposit,
            Self::Withdrawal(_) => EventKind::Withdrawal,
            Self::Redirect(_) => EventKind::Redirect,
        }
    }

    /// The emitting contract's sequence number for the event.
    pub fn index(&self) -> u64 {
        match self {
            Self::Deposit(d) => d.index,
            Self::Withdrawal(w) => w.index,
            Self::Redirect(r) => r.index,
        }
    }

    pub fn as_deposit(&self) -> Option<&Deposit> {
        match self {
            Self::Deposit(d) => Some(d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{keccak256, Bytes};
    use kiln_primitives::buf::Buf20;
    use kiln_test_utils::evm::make_log;

    use super::*;

    #[test]
    fn test_signature_is_hash_of_schema() {
        for kind in EventKind::ALL {
            let expected: Buf32 = keccak256(kind.schema().as_bytes()).into();
            assert_eq!(kind.signature(), expected, "{kind:?}");
        }
        assert_eq!(
            EventKind::Deposit.schema(),
            "Deposit(bytes,bytes,uint64,bytes,uint64)"
        );
    }

    #[test]
    fn test_signatures_distinct() {
        let sigs: std::collections::HashSet<_> =
            EventKind::ALL.iter().map(|k| k.signature()).collect();
        assert_eq!(sigs.len(), EventKind::ALL.len());
    }

    #[test]
    fn test_decode_deposit() {
        let ev = abi::Deposit {
            pubkey: Bytes::from(vec![1; 48]),
            credentials: Bytes::from(vec![2; 32]),
            amount: 32_000_000_000,
            signature: Bytes::from(vec![3; 96]),
            index: 9,
        };
        let log = make_log(&ev, Buf20::zero(), 10, 0);

        let value = EventKind::Deposit.decode(&log).unwrap();
        let dep = value.as_deposit().unwrap();
        assert_eq!(dep.pubkey, vec![1; 48]);
        assert_eq!(dep.withdrawal_credentials, vec![2; 32]);
        assert_eq!(dep.amount, 32_000_000_000);
        assert_eq!(dep.index, 9);
        assert_eq!(value.index(), 9);
    }

    #[test]
    fn test_decode_with_wrong_kind_fails() {
        let ev = abi::Redirect {
            fromPubkey: Bytes::from(vec![1; 48]),
            toPubkey: Bytes::from(vec![2; 48]),
            credentials: Bytes::from(vec![3; 32]),
            amount: 5,
            index: 1,
        };
        let log = make_log(&ev, Buf20::zero(), 10, 0);

        assert!(EventKind::Deposit.decode(&log).is_err());
        let value = EventKind::Redirect.decode(&log).unwrap();
        assert_eq!(value.kind(), EventKind::Redirect);
    }

    #[test]
    fn test_zero_value_matches_kind() {
        for kind in EventKind::ALL {
            assert_eq!(kind.zero_value().kind(), kind);
            assert_eq!(kind.zero_value().index(), 0);
        }
    }
}
