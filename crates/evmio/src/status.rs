use tokio::sync::watch;

/// Snapshot of the ingest task for status reporting.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IngestStatus {
    /// Last finalized execution block we saw.
    pub finalized_block: Option<u64>,

    /// Per stream name.
    pub watermarks: Vec<(String, u64)>,

    pub last_error: Option<String>,

    /// UNIX millis.
    pub last_update_ms: u64,

    pub cycles: u64,
}

#[derive(Clone, Debug)]
pub enum StatusUpdate {
    FinalizedBlock(u64),
    Watermarks(Vec<(String, u64)>),
    LastError(Option<String>),
    LastUpdate(u64),
    CycleCompleted,
}

pub fn apply_status_updates(updates: &[StatusUpdate], status_tx: &watch::Sender<IngestStatus>) {
    status_tx.send_modify(|status| {
        for update in updates {
            match update {
                StatusUpdate::FinalizedBlock(n) => status.finalized_block = Some(*n),
                StatusUpdate::Watermarks(wms) => status.watermarks = wms.clone(),
                StatusUpdate::LastError(err) => status.last_error = err.clone(),
                StatusUpdate::LastUpdate(ms) => status.last_update_ms = *ms,
                StatusUpdate::CycleCompleted => status.cycles += 1,
            }
        }
    });
}
