//! Mapping of event signatures to their decode targets and the streams they
//! feed.  Built once at startup and shared immutably afterwards.

use std::{
    collections::{BTreeSet, HashMap},
    num::NonZeroU64,
};

use kiln_db::types::{QueueId, StreamId};
use kiln_primitives::buf::Buf20;
use thiserror::Error;

use crate::events::{DecodedValue, EventKind, EventSignature};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("signature {given:?} does not match {kind:?} schema {expected:?}")]
    SchemaMismatch {
        kind: EventKind,
        given: EventSignature,
        expected: EventSignature,
    },

    #[error("event {0:?} not registered")]
    NotRegistered(EventSignature),

    #[error("event {0:?} already registered as {1}")]
    ConflictingRegistration(EventSignature, String),

    #[error("stream name {0} already in use")]
    DuplicateStream(String),

    #[error("stream {0} has zero queue capacity")]
    ZeroCapacity(String),

    #[error("deposit stream {0} cannot be bounded")]
    BoundedDepositStream(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// What a signature decodes to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventTypeDescriptor {
    signature: EventSignature,
    name: String,
    kind: EventKind,
}

impl EventTypeDescriptor {
    pub fn signature(&self) -> EventSignature {
        self.signature
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// One event stream: a registered event type, the contracts it is accepted
/// from, and where its decoded logs go.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamDescriptor {
    event: EventTypeDescriptor,
    addresses: BTreeSet<Buf20>,
    queue_capacity: Option<NonZeroU64>,
}

impl StreamDescriptor {
    pub fn id(&self) -> StreamId {
        self.event.signature
    }

    pub fn name(&self) -> &str {
        &self.event.name
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind
    }

    pub fn event(&self) -> &EventTypeDescriptor {
        &self.event
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Buf20> {
        self.addresses.iter()
    }

    pub fn accepts(&self, address: &Buf20) -> bool {
        self.addresses.contains(address)
    }

    pub fn queue_capacity(&self) -> Option<NonZeroU64> {
        self.queue_capacity
    }

    /// Deposits are admitted into the shared deposit queue instead of a
    /// per-stream queue.
    pub fn is_deposit_stream(&self) -> bool {
        self.event.kind == EventKind::Deposit
    }

    /// Name of the queue holding this stream's decoded logs.
    pub fn queue_id(&self) -> QueueId {
        format!("stream/{}", self.event.name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventTypeRegistry {
    streams: Vec<StreamDescriptor>,
    by_signature: HashMap<EventSignature, usize>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event type with no contract addresses yet.  Fails with
    /// `SchemaMismatch` if `signature` isn't the schema hash of `kind`.
    pub fn register(
        &mut self,
        signature: EventSignature,
        name: &str,
        kind: EventKind,
    ) -> RegistryResult<&StreamDescriptor> {
        let expected = kind.signature();
        if signature != expected {
            return Err(RegistryError::SchemaMismatch {
                kind,
                given: signature,
                expected,
            });
        }

        if let Some(idx) = self.by_signature.get(&signature).copied() {
            let existing_name = self.streams[idx].name();
            if existing_name != name {
                return Err(RegistryError::ConflictingRegistration(
                    signature,
                    existing_name.to_owned(),
                ));
            }
            return Ok(&self.streams[idx]);
        }

        if self.streams.iter().any(|s| s.name() == name) {
            return Err(RegistryError::DuplicateStream(name.to_owned()));
        }

        self.streams.push(StreamDescriptor {
            event: EventTypeDescriptor {
                signature,
                name: name.to_owned(),
                kind,
            },
            addresses: BTreeSet::new(),
            queue_capacity: None,
        });
        self.by_signature.insert(signature, self.streams.len() - 1);
        Ok(&self.streams[self.streams.len() - 1])
    }

    /// Registers an event type and accepts it from `address`.  Registering an
    /// existing stream again adds the address.
    pub fn register_stream(
        &mut self,
        signature: EventSignature,
        name: &str,
        kind: EventKind,
        address: Buf20,
        queue_capacity: Option<u64>,
    ) -> RegistryResult<&StreamDescriptor> {
        let capacity = match queue_capacity {
            Some(c) => Some(
                NonZeroU64::new(c).ok_or_else(|| RegistryError::ZeroCapacity(name.to_owned()))?,
            ),
            None => None,
        };

        if capacity.is_some() && kind == EventKind::Deposit {
            return Err(RegistryError::BoundedDepositStream(name.to_owned()));
        }

        self.register(signature, name, kind)?;
        let idx = self.by_signature[&signature];
        let stream = &mut self.streams[idx];
        stream.addresses.insert(address);
        if capacity.is_some() {
            stream.queue_capacity = capacity;
        }
        Ok(stream)
    }

    pub fn descriptor(&self, signature: &EventSignature) -> RegistryResult<&EventTypeDescriptor> {
        self.stream_for(signature)
            .map(|s| s.event())
            .ok_or(RegistryError::NotRegistered(*signature))
    }

    pub fn resolve_name(&self, signature: &EventSignature) -> RegistryResult<&str> {
        Ok(self.descriptor(signature)?.name())
    }

    /// Decode target of a signature.
    pub fn kind_of(&self, signature: &EventSignature) -> RegistryResult<EventKind> {
        Ok(self.descriptor(signature)?.kind())
    }

    /// Returns a fresh zero-valued instance of the signature's decode target.
    pub fn allocate(&self, signature: &EventSignature) -> RegistryResult<DecodedValue> {
        Ok(self.kind_of(signature)?.zero_value())
    }

    pub fn stream_for(&self, signature: &EventSignature) -> Option<&StreamDescriptor> {
        self.by_signature.get(signature).map(|i| &self.streams[*i])
    }

    /// Whether logs with this signature are accepted from this contract.
    pub fn is_registered(&self, address: &Buf20, signature: &EventSignature) -> bool {
        self.stream_for(signature)
            .is_some_and(|s| s.accepts(address))
    }

    /// Streams in registration order.
    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn deposit_stream(&self) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.is_deposit_stream())
    }

    /// Every contract address of interest, deduplicated and sorted.
    pub fn addresses(&self) -> Vec<Buf20> {
        let set: BTreeSet<_> = self
            .streams
            .iter()
            .flat_map(|s| s.addresses().copied())
            .collect();
        set.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use kiln_primitives::buf::Buf32;

    use super::*;

    fn addr(b: u8) -> Buf20 {
        Buf20::from([b; 20])
    }

    #[test]
    fn test_register_rejects_schema_drift() {
        let mut reg = EventTypeRegistry::new();
        let res = reg.register(EventKind::Withdrawal.signature(), "deposits", EventKind::Deposit);
        assert!(matches!(
            res,
            Err(RegistryError::SchemaMismatch {
                kind: EventKind::Deposit,
                ..
            })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_unknown_signature_not_registered() {
        let reg = EventTypeRegistry::new();
        let sig = Buf32::from([9; 32]);
        assert!(matches!(
            reg.resolve_name(&sig),
            Err(RegistryError::NotRegistered(_))
        ));
        assert!(matches!(
            reg.allocate(&sig),
            Err(RegistryError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_resolve_and_allocate() {
        let mut reg = EventTypeRegistry::new();
        let sig = EventKind::Redirect.signature();
        reg.register(sig, "redirects", EventKind::Redirect).unwrap();

        assert_eq!(reg.resolve_name(&sig).unwrap(), "redirects");
        assert_eq!(reg.allocate(&sig).unwrap(), EventKind::Redirect.zero_value());
    }

    #[test]
    fn test_register_stream_accumulates_addresses() {
        let mut reg = EventTypeRegistry::new();
        let sig = EventKind::Deposit.signature();
        reg.register_stream(sig, "deposits", EventKind::Deposit, addr(2), None)
            .unwrap();
        reg.register_stream(sig, "deposits", EventKind::Deposit, addr(1), None)
            .unwrap();

        assert_eq!(reg.streams().len(), 1);
        assert!(reg.is_registered(&addr(1), &sig));
        assert!(reg.is_registered(&addr(2), &sig));
        assert!(!reg.is_registered(&addr(3), &sig));
        assert!(!reg.is_registered(&addr(1), &EventKind::Withdrawal.signature()));
        assert_eq!(reg.addresses(), vec![addr(1), addr(2)]);
        assert!(reg.deposit_stream().is_some());
    }

    #[test]
    fn test_conflicting_names() {
        let mut reg = EventTypeRegistry::new();
        let dsig = EventKind::Deposit.signature();
        let wsig = EventKind::Withdrawal.signature();
        reg.register(dsig, "a", EventKind::Deposit).unwrap();

        assert!(matches!(
            reg.register(dsig, "b", EventKind::Deposit),
            Err(RegistryError::ConflictingRegistration(..))
        ));
        assert!(matches!(
            reg.register(wsig, "a", EventKind::Withdrawal),
            Err(RegistryError::DuplicateStream(_))
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut reg = EventTypeRegistry::new();
        let res = reg.register_stream(
            EventKind::Withdrawal.signature(),
            "withdrawals",
            EventKind::Withdrawal,
            addr(1),
            Some(0),
        );
        assert!(matches!(res, Err(RegistryError::ZeroCapacity(_))));
    }

    #[test]
    fn test_deposit_stream_unbounded() {
        let mut reg = EventTypeRegistry::new();
        let res = reg.register_stream(
            EventKind::Deposit.signature(),
            "deposits",
            EventKind::Deposit,
            addr(1),
            Some(16),
        );
        assert!(matches!(res, Err(RegistryError::BoundedDepositStream(_))));
    }

    #[test]
    fn test_queue_ids_do_not_collide_with_deposit_queue() {
        let mut reg = EventTypeRegistry::new();
        let s = reg
            .register(EventKind::Withdrawal.signature(), "deposits", EventKind::Withdrawal)
            .unwrap();
        assert_ne!(s.queue_id(), crate::handle::DEPOSIT_QUEUE);
    }
}
