use kiln_db::types::{QueueBounds, QueueId};

use crate::{
    define_table_with_default_codec, define_table_with_seek_key_codec, define_table_without_codec,
    impl_borsh_value_codec,
};

define_table_with_default_codec!(
    /// A table to store head/tail counters per queue
    (QueueBoundsSchema) QueueId => QueueBounds
);

define_table_with_seek_key_codec!(
    /// A table to store queue entries by queue and seq
    (QueueEntrySchema) (QueueId, u64) => Vec<u8>
);
