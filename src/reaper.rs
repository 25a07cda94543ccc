//! Background reaper for abandoned multipart uploads: a periodic
//! `tokio::time::interval` tick that does best-effort per-item cleanup of
//! `(bucket, key, upload_id)` part blobs, logging and continuing past the
//! first failure.

use crate::app_state::AppState;
use log::{error, info, warn};
use std::time::Duration;
use tokio::time;

pub struct Reaper {
    state: AppState,
    interval: Duration,
    ttl_secs: i64,
}

impl Reaper {
    pub fn new(state: AppState) -> Self {
        let interval = Duration::from_secs(state.config.metadata.reap_interval_secs);
        let ttl_secs = state.config.metadata.reap_ttl_secs;
        Self { state, interval, ttl_secs }
    }

    /// Start the reaper as a background task (non-blocking).
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        info!("starting multipart-upload reaper with {}s interval, {}s ttl", self.interval.as_secs(), self.ttl_secs);
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.reap_once().await {
                    error!("multipart reaper pass failed: {e}");
                }
            }
        })
    }

    async fn reap_once(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let expired = self.state.metadata.reap_expired_uploads(self.ttl_secs)?;
        if expired.is_empty() {
            return Ok(());
        }
        info!("reaping {} abandoned multipart upload(s)", expired.len());
        for (bucket, key, upload_id) in expired {
            if let Err(e) = self.state.storage.delete_parts(&bucket, &upload_id) {
                warn!("failed to delete part blobs for abandoned upload {bucket}/{key}/{upload_id}: {e}");
            }
        }
        Ok(())
    }
}

pub fn start(state: AppState) -> tokio::task::JoinHandle<()> {
    Reaper::new(state).start_background()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reap_once_is_noop_when_nothing_expired() {
        let state = AppState::new_for_testing();
        let reaper = Reaper::new(state);
        reaper.reap_once().await.unwrap();
    }
}
