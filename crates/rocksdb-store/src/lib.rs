pub mod ingest;
pub mod queue;

pub mod macros;
mod sequence;

#[cfg(feature = "test_utils")]
pub mod test_utils;

use std::{path::Path, sync::Arc};

use rockbound::{rocksdb, schema::ColumnFamilyName, OptimisticTransactionDB, Schema};

pub const ROCKSDB_NAME: &str = "kiln";

pub const STORE_COLUMN_FAMILIES: &[ColumnFamilyName] = &[
    SequenceSchema::COLUMN_FAMILY_NAME,
    // Queue schemas
    QueueBoundsSchema::COLUMN_FAMILY_NAME,
    QueueEntrySchema::COLUMN_FAMILY_NAME,
    // Ingest schemas
    WatermarkSchema::COLUMN_FAMILY_NAME,
];

// Re-exports
pub use ingest::db::RBIngestDb;

use crate::{
    ingest::schemas::WatermarkSchema,
    queue::schemas::{QueueBoundsSchema, QueueEntrySchema},
    sequence::SequenceSchema,
};

/// database operations configuration
#[derive(Clone, Copy, Debug)]
pub struct DbOpsConfig {
    pub retry_count: u16,
}

impl DbOpsConfig {
    pub fn new(retry_count: u16) -> Self {
        Self { retry_count }
    }
}

/// Opens (creating if needed) the store under `datadir` with every column
/// family we use.
pub fn open_rocksdb_database(datadir: &Path) -> anyhow::Result<Arc<OptimisticTransactionDB>> {
    let mut database_dir = datadir.to_path_buf();
    database_dir.push("rocksdb");

    if !database_dir.exists() {
        std::fs::create_dir_all(&database_dir)?;
    }

    let mut opts = rocksdb::Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    let rbdb = OptimisticTransactionDB::open(
        &database_dir,
        ROCKSDB_NAME,
        STORE_COLUMN_FAMILIES.iter().map(|s| s.to_string()),
        &opts,
    )?;

    Ok(Arc::new(rbdb))
}

#[cfg(feature = "test_utils")]
#[cfg(test)]
mod tests {
    use kiln_db::traits::IngestDatabase;
    use kiln_primitives::buf::Buf32;

    use super::*;

    #[test]
    fn test_reopen_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let stream = Buf32::from([4; 32]);

        {
            let rbdb = open_rocksdb_database(dir.path()).unwrap();
            let db = RBIngestDb::new(rbdb, DbOpsConfig::new(3));
            db.init_watermark(stream, 42).unwrap();
            db.init_deposit_nonce(9).unwrap();
        }

        let rbdb = open_rocksdb_database(dir.path()).unwrap();
        let db = RBIngestDb::new(rbdb, DbOpsConfig::new(3));
        assert_eq!(db.get_watermark(stream).unwrap(), Some(42));
        assert_eq!(db.get_next_deposit_nonce().unwrap(), Some(9));
    }
}
