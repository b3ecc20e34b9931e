//! Nonce admission for deposits.

use thiserror::Error;

/// The nonce after this one does not fit in a `u64`.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("no deposit nonce after {0}")]
pub struct NonceExhausted(pub u64);

pub fn next_nonce(nonce: u64) -> Result<u64, NonceExhausted> {
    nonce.checked_add(1).ok_or(NonceExhausted(nonce))
}

/// Outcome of checking a deposit nonce against the next expected one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Nonce is the expected one.  The caller applies it and moves on.
    Apply,

    /// Already applied, drop quietly.
    DiscardDuplicate,

    /// Nonce skips ahead.  Must not be applied.
    RejectGap,
}

pub fn admit(nonce: u64, expected: u64) -> Decision {
    use std::cmp::Ordering::*;
    match nonce.cmp(&expected) {
        Less => Decision::DiscardDuplicate,
        Equal => Decision::Apply,
        Greater => Decision::RejectGap,
    }
}

/// Tracks the expected nonce across a run of deposits.
#[derive(Copy, Clone, Debug)]
pub struct DepositOrderingPolicy {
    expected: u64,
}

impl DepositOrderingPolicy {
    pub fn new(expected: u64) -> Self {
        Self { expected }
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Like [`admit`], but advances the expected nonce on `Apply`.
    pub fn admit(&mut self, nonce: u64) -> Result<Decision, NonceExhausted> {
        let d = admit(nonce, self.expected);
        if d == Decision::Apply {
            self.expected = next_nonce(self.expected)?;
        }
        Ok(d)
    }
}
