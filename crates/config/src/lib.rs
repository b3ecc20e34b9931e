pub mod config;
pub mod ingest;

pub use config::*;
pub use ingest::*;
