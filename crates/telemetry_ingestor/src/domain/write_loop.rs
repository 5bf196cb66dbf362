use crate::domain::IngestionService;
use common::domain::{DomainError, IngestionBatch};
use common::retry::RetryPolicy;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Drain queued batches into the store, up to `write_batch_size` batches per
/// write. Transient store failures are retried under `retry`; a chunk is
/// only dropped once attempts run out. Returns once every sender is dropped
/// and the queue is empty.
pub async fn run_write_loop(
    mut receiver: mpsc::Receiver<IngestionBatch>,
    service: Arc<IngestionService>,
    write_batch_size: usize,
    retry: RetryPolicy,
) {
    let limit = write_batch_size.max(1);
    let mut buffer = Vec::with_capacity(limit);
    info!(write_batch_size = limit, "ingestion write loop started");

    loop {
        if receiver.recv_many(&mut buffer, limit).await == 0 {
            break;
        }

        let batches = std::mem::take(&mut buffer);
        let batch_count = batches.len();
        let result = retry
            .retry(
                "write_sensor_readings",
                || service.write_batches(batches.clone()),
                DomainError::is_transient,
            )
            .await;

        match result {
            Ok(written) => debug!(
                batches = batch_count,
                readings = written,
                "flushed ingestion batches"
            ),
            Err(e) => error!(
                batches = batch_count,
                error = %e,
                "failed to write ingestion batches, dropping them"
            ),
        }
    }

    info!("ingestion write loop stopped");
}
