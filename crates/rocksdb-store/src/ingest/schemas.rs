use kiln_db::types::StreamId;

use crate::{define_table_with_default_codec, define_table_without_codec, impl_borsh_value_codec};

define_table_with_default_codec!(
    /// A table to store the last finalized block processed per stream
    (WatermarkSchema) StreamId => u64
);
