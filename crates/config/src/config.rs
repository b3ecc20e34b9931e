use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ingest::IngestConfig;

/// Default value for `datadir` in [`ClientConfig`].
const DEFAULT_DATADIR: &str = "kiln-data";

/// Default value for `db_retry_count` in [`ClientConfig`].
const DEFAULT_DB_RETRY_COUNT: u16 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The data directory where database contents reside.
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,

    /// For optimistic transactions, how many times to retry if a write fails.
    #[serde(default = "default_db_retry_count")]
    pub db_retry_count: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            datadir: default_datadir(),
            db_retry_count: default_db_retry_count(),
        }
    }
}

fn default_datadir() -> PathBuf {
    DEFAULT_DATADIR.into()
}

fn default_db_retry_count() -> u16 {
    DEFAULT_DB_RETRY_COUNT
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}
