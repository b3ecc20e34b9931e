mod exec;
pub mod managers;
pub mod ops;

pub use managers::queue::{
    decode_value, encode_value, CircularQueue, PersistentQueue, QueueError, QueueResult,
};
pub use ops::{ingest::IngestDataOps, queue::QueueDataOps};
