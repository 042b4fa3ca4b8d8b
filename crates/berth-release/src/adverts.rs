//! Capability-advertisement refresh.
//!
//! Successful rollouts enqueue the project id; a daemon worker drains
//! the queue and pushes the refreshed advertisement through an
//! [`AdvertisementSink`] with retry and backoff. Refresh is never on
//! the deploy critical path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const MAX_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[async_trait]
pub trait AdvertisementSink: Send + Sync {
    /// Publish a refreshed capability advertisement for the project.
    async fn refresh(&self, project_id: &str) -> anyhow::Result<()>;
}

/// Drain the refresh queue until all senders drop. Failed refreshes
/// retry with doubling backoff, then give up with an error log.
pub fn spawn_advert_worker(
    mut rx: mpsc::Receiver<String>,
    sink: Arc<dyn AdvertisementSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(project_id) = rx.recv().await {
            let mut backoff = INITIAL_BACKOFF;
            for attempt in 1..=MAX_ATTEMPTS {
                match sink.refresh(&project_id).await {
                    Ok(()) => {
                        debug!(project = %project_id, "advertisement refreshed");
                        break;
                    }
                    Err(e) if attempt < MAX_ATTEMPTS => {
                        warn!(
                            project = %project_id,
                            attempt,
                            error = %e,
                            "advertisement refresh failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                    Err(e) => {
                        error!(
                            project = %project_id,
                            error = %e,
                            "advertisement refresh abandoned"
                        );
                    }
                }
            }
        }
    })
}

/// Test sink: records refreshed project ids and optionally fails the
/// first `fail_first` attempts.
#[derive(Default)]
pub struct RecordingSink {
    refreshed: Mutex<Vec<String>>,
    fail_first: Mutex<u32>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(attempts: u32) -> Self {
        Self {
            refreshed: Mutex::new(Vec::new()),
            fail_first: Mutex::new(attempts),
        }
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdvertisementSink for RecordingSink {
    async fn refresh(&self, project_id: &str) -> anyhow::Result<()> {
        let mut remaining = self.fail_first.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            anyhow::bail!("relay unreachable");
        }
        drop(remaining);
        self.refreshed.lock().unwrap().push(project_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn worker_retries_until_the_sink_accepts() {
        let sink = Arc::new(RecordingSink::failing_first(2));
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_advert_worker(rx, sink.clone());

        tx.send("proj-1".to_string()).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(sink.refreshed(), vec!["proj-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_gives_up_after_max_attempts() {
        let sink = Arc::new(RecordingSink::failing_first(10));
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_advert_worker(rx, sink.clone());

        tx.send("proj-1".to_string()).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(sink.refreshed().is_empty());
    }
}
