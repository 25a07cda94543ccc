//! Background retry of blob deletes that failed inline: a periodic
//! `tokio::time::interval` tick that drains the `pending_deletes` queue,
//! retrying each `(bucket, key)` object blob or `(bucket, upload_id)` part
//! directory, and dropping entries that exhaust their retry budget.

use crate::app_state::AppState;
use crate::metadata::PendingDeleteKind;
use log::{error, info, warn};
use std::time::Duration;
use tokio::time;

pub struct DeletionWorker {
    state: AppState,
    interval: Duration,
    batch_size: u32,
    max_attempts: u32,
}

impl DeletionWorker {
    pub fn new(state: AppState) -> Self {
        let interval = Duration::from_secs(state.config.deletion.interval_secs);
        let batch_size = state.config.deletion.batch_size;
        let max_attempts = state.config.deletion.max_attempts;
        Self { state, interval, batch_size, max_attempts }
    }

    /// Start the worker as a background task (non-blocking).
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        info!(
            "starting deletion worker with {}s interval, batch size {}",
            self.interval.as_secs(),
            self.batch_size
        );
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.process_once().await {
                    error!("deletion worker pass failed: {e}");
                }
            }
        })
    }

    async fn process_once(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let pending = self.state.metadata.list_pending_deletes(self.batch_size)?;
        if pending.is_empty() {
            return Ok(());
        }
        info!("retrying {} queued blob delete(s)", pending.len());
        for row in pending {
            let result = match row.kind {
                PendingDeleteKind::Object => self.state.storage.delete(&row.bucket, &row.key),
                PendingDeleteKind::Parts => {
                    let upload_id = row.upload_id.as_deref().unwrap_or_default();
                    self.state.storage.delete_parts(&row.bucket, upload_id)
                }
            };
            match result {
                Ok(()) => {
                    self.state.metadata.remove_pending_delete(row.id)?;
                }
                Err(e) => {
                    let attempts = self.state.metadata.increment_pending_delete_attempts(row.id)?;
                    if attempts >= self.max_attempts {
                        error!(
                            "giving up on queued delete for {}/{} after {attempts} attempts: {e}",
                            row.bucket, row.key
                        );
                        self.state.metadata.remove_pending_delete(row.id)?;
                    } else {
                        warn!(
                            "retry {attempts}/{} failed for queued delete {}/{}: {e}",
                            self.max_attempts, row.bucket, row.key
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn start(state: AppState) -> tokio::task::JoinHandle<()> {
    DeletionWorker::new(state).start_background()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn process_once_is_noop_when_queue_empty() {
        let state = AppState::new_for_testing();
        let worker = DeletionWorker::new(state);
        worker.process_once().await.unwrap();
    }

    #[tokio::test]
    async fn process_once_drains_queue_on_successful_delete() {
        let state = AppState::new_for_testing();
        // `Storage::delete` is idempotent (matches the local filesystem
        // backend's semantics), so even a queued delete for a blob that was
        // never written succeeds and is dequeued on the first pass.
        state
            .metadata
            .enqueue_pending_delete(PendingDeleteKind::Object, "some-bucket", "some-key", None)
            .unwrap();
        let worker = DeletionWorker::new(state.clone());
        worker.process_once().await.unwrap();
        assert!(state.metadata.list_pending_deletes(10).unwrap().is_empty());
    }
}
