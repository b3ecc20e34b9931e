use std::sync::Arc;

use rockbound::{rocksdb, OptimisticTransactionDB};
use tempfile::TempDir;

use crate::{DbOpsConfig, ROCKSDB_NAME, STORE_COLUMN_FAMILIES};

/// Opens a fresh store in a temporary directory.  The directory is leaked so
/// it outlives the handle.
pub fn get_rocksdb_tmp_instance() -> anyhow::Result<(Arc<OptimisticTransactionDB>, DbOpsConfig)> {
    let mut opts = rocksdb::Options::default();
    opts.create_missing_column_families(true);
    opts.create_if_missing(true);

    let temp_dir = TempDir::new()?;

    let rbdb = OptimisticTransactionDB::open(
        temp_dir.into_path(),
        ROCKSDB_NAME,
        STORE_COLUMN_FAMILIES.iter().map(|s| s.to_string()),
        &opts,
    )?;

    let db_ops = DbOpsConfig { retry_count: 5 };

    Ok((Arc::new(rbdb), db_ops))
}
