use rockbound::{TransactionCtx, TransactionDBMarker};

use crate::{define_table_with_default_codec, define_table_without_codec, impl_borsh_value_codec};

define_table_with_default_codec!(
    /// A table to hold named counters
    (SequenceSchema) Vec<u8> => u64
);

/// Key of the nonce the next admitted deposit must carry.
pub(crate) const DEPOSIT_NONCE_KEY: &[u8] = b"deposit_nonce";

/// Reads a counter, locking it against concurrent transactions.
pub(crate) fn get_seq_for_update<DB: TransactionDBMarker>(
    txn: &TransactionCtx<DB>,
    key: &[u8],
) -> anyhow::Result<Option<u64>> {
    Ok(txn.get_for_update::<SequenceSchema>(&key.to_vec())?)
}

/// Sets a counter.  Should NEVER be called without reading it through
/// [`get_seq_for_update`] in the same transaction first.
pub(crate) fn put_seq<DB: TransactionDBMarker>(
    txn: &TransactionCtx<DB>,
    key: &[u8],
    value: u64,
) -> anyhow::Result<()> {
    txn.put::<SequenceSchema>(&key.to_vec(), &value)?;
    Ok(())
}
