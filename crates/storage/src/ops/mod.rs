pub mod ingest;
pub mod queue;
