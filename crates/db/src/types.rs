//! Module for database local types

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use kiln_primitives::buf::Buf32;
use serde::{Deserialize, Serialize};

/// Name of a durable queue.
pub type QueueId = String;

/// Identifies a finalization stream, which is the signature of the events it
/// carries.
pub type StreamId = Buf32;

/// Durable head/tail counters of a queue.  Entries live at `[head, tail)`.
#[derive(
    Copy,
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
pub struct QueueBounds {
    head: u64,
    tail: u64,
}

impl QueueBounds {
    /// Panics if `head > tail`.
    pub fn new(head: u64, tail: u64) -> Self {
        assert!(head <= tail, "db: queue head past tail");
        Self { head, tail }
    }

    /// Next seq to pop.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Next seq to write.
    pub fn tail(&self) -> u64 {
        self.tail
    }

    pub fn len(&self) -> u64 {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn contains(&self, seq: u64) -> bool {
        seq >= self.head && seq < self.tail
    }

    /// Returns the seq the next entry is written at and moves the tail.
    pub fn advance_tail(&mut self) -> u64 {
        let seq = self.tail;
        self.tail += 1;
        seq
    }

    /// Returns the seq of the entry being removed, if there is one.
    pub fn advance_head(&mut self) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        let seq = self.head;
        self.head += 1;
        Some(seq)
    }
}

/// Result of a push.  `evicted` holds entries dropped from the head to respect
/// a capacity, oldest first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PushOutcome {
    pub bounds: QueueBounds,
    pub evicted: Vec<Vec<u8>>,
}

/// Entries to append to a queue as part of an [`IngestBatch`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueuePush {
    pub queue: QueueId,
    pub entries: Vec<Vec<u8>>,
    pub capacity: Option<u64>,
}

impl QueuePush {
    pub fn new(queue: QueueId, entries: Vec<Vec<u8>>, capacity: Option<u64>) -> Self {
        Self {
            queue,
            entries,
            capacity,
        }
    }
}

/// Compare-and-set on the deposit nonce.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NonceAdvance {
    pub expected: u64,
    pub next: u64,
}

/// Everything one ingestion cycle writes.  Applied all-or-nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IngestBatch {
    pub pushes: Vec<QueuePush>,
    pub watermarks: Vec<(StreamId, u64)>,
    pub deposit_nonce: Option<NonceAdvance>,
}

impl IngestBatch {
    pub fn is_empty(&self) -> bool {
        self.pushes.iter().all(|p| p.entries.is_empty())
            && self.watermarks.is_empty()
            && self.deposit_nonce.is_none()
    }

    pub fn num_entries(&self) -> usize {
        self.pushes.iter().map(|p| p.entries.len()).sum()
    }
}

/// What a committed [`IngestBatch`] evicted, per queue.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchReceipt {
    pub evicted: Vec<(QueueId, Vec<Vec<u8>>)>,
}
