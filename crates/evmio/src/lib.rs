//! Input-output with the execution layer: turning finalized execution logs
//! into ordered queue entries.

pub mod builder;
pub mod cache;
pub mod errors;
pub mod events;
pub mod factory;
pub mod handle;
pub mod ordering;
pub mod processor;
pub mod registry;
pub mod rpc;
pub mod status;
pub mod task;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use builder::IngestBuilder;
pub use errors::IngestError;
pub use handle::DepositHandle;
pub use processor::BatchProcessor;
