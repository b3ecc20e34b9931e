//! Long-running task driving ingestion cycles.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use kiln_config::IngestConfig;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    errors::IngestError,
    processor::{BatchProcessor, CycleOutcome},
    rpc::traits::{ExecReader, FinalityProvider},
    status::{apply_status_updates, IngestStatus, StatusUpdate},
};

/// Runs a cycle every poll interval or whenever `trigger` fires, until
/// cancelled.  Returns the error that stopped it if it was fatal.
pub async fn ingest_task<C: ExecReader, F: FinalityProvider>(
    processor: Arc<BatchProcessor<C, F>>,
    config: Arc<IngestConfig>,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    status_tx: watch::Sender<IngestStatus>,
) -> Result<(), IngestError> {
    let res = do_ingest_task(&processor, &config, &trigger, &cancel, &status_tx).await;
    if let Err(e) = &res {
        error!(err = %e, "ingest task exited");
    }
    res
}

async fn do_ingest_task<C: ExecReader, F: FinalityProvider>(
    processor: &BatchProcessor<C, F>,
    config: &IngestConfig,
    trigger: &Notify,
    cancel: &CancellationToken,
    status_tx: &watch::Sender<IngestStatus>,
) -> Result<(), IngestError> {
    let poll_dur = Duration::from_millis(config.poll_interval_ms);
    info!(floor = ?processor.floor(), "started ingest task");

    loop {
        let mut status_updates = Vec::new();
        let floor = processor.floor();
        let cycle_span = debug_span!("ingestcycle", ?floor);

        match processor.run_cycle(cancel).instrument(cycle_span).await {
            Ok(CycleOutcome::NoOp { finalized }) => {
                trace!(%finalized, "nothing new finalized");
                status_updates.push(StatusUpdate::FinalizedBlock(finalized));
                status_updates.push(StatusUpdate::LastError(None));
            }

            Ok(CycleOutcome::Ingested(summary)) => {
                debug!(?summary, "finished ingest cycle");
                status_updates.push(StatusUpdate::FinalizedBlock(summary.to));
                status_updates.push(StatusUpdate::Watermarks(processor.watermarks()));
                status_updates.push(StatusUpdate::LastError(None));
            }

            Err(IngestError::Cancelled) => break,

            Err(e) if e.is_fatal() => {
                status_updates.push(StatusUpdate::LastError(Some(e.to_string())));
                status_updates.push(StatusUpdate::LastUpdate(now_millis()));
                apply_status_updates(&status_updates, status_tx);
                return Err(e);
            }

            Err(e) => {
                if e.is_transient() {
                    warn!(?floor, err = %e, "ingest cycle failed, retrying later");
                } else {
                    error!(?floor, err = %e, "ingest cycle failed unexpectedly, retrying later");
                }
                status_updates.push(StatusUpdate::LastError(Some(e.to_string())));
            }
        }

        status_updates.push(StatusUpdate::LastUpdate(now_millis()));
        status_updates.push(StatusUpdate::CycleCompleted);
        apply_status_updates(&status_updates, status_tx);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = trigger.notified() => {}
            _ = tokio::time::sleep(poll_dur) => {}
        }
    }

    info!("ingest task stopping");
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
