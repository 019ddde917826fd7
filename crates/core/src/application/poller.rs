// Status Poller
//
// Polls one job until COMPLETED. Reads are strictly sequential; the inter-poll
// delay is fixed for the whole subscription. An optional overall deadline
// races the loop: on expiry the loop is dropped (no further polls or
// callbacks), one best-effort cancel is spawned in the background, and the
// caller gets `ClientTimeout` without waiting for it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use super::constants::{DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL};
use super::queue::QueueClient;
use crate::domain::{CompletedStatus, JobStatus, StatusTracker};
use crate::error::{Result, SunraError};

/// Invoked with every status observed, in order
pub type QueueUpdateCallback = Arc<dyn Fn(&JobStatus) + Send + Sync>;

/// Poller options
#[derive(Clone)]
pub struct PollOptions {
    /// Read once at start; no backoff
    pub poll_interval: Duration,
    /// Overall deadline for the whole subscription
    pub timeout: Option<Duration>,
    /// Ask the server to include logs
    pub logs: bool,
    /// Consecutive failed status calls before giving up
    pub max_retries: u32,
    pub on_queue_update: Option<QueueUpdateCallback>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            logs: false,
            max_retries: DEFAULT_MAX_RETRIES,
            on_queue_update: None,
        }
    }
}

impl PollOptions {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_logs(mut self, logs: bool) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn on_queue_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&JobStatus) + Send + Sync + 'static,
    {
        self.on_queue_update = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for PollOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollOptions")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .field("logs", &self.logs)
            .field("max_retries", &self.max_retries)
            .field("on_queue_update", &self.on_queue_update.is_some())
            .finish()
    }
}

/// Polling subscriber for one job's status
#[derive(Debug, Clone)]
pub struct StatusPoller {
    queue: QueueClient,
}

impl StatusPoller {
    pub fn new(queue: QueueClient) -> Self {
        Self { queue }
    }

    /// Poll until COMPLETED, the deadline passes, or retries run out
    pub async fn subscribe_to_status(
        &self,
        request_id: &str,
        options: PollOptions,
    ) -> Result<CompletedStatus> {
        let Some(timeout) = options.timeout else {
            return self.poll_until_completed(request_id, &options).await;
        };

        let deadline = Instant::now() + timeout;
        tokio::select! {
            biased;
            result = self.poll_until_completed(request_id, &options) => result,
            _ = sleep_until(deadline) => {
                warn!(
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Client timeout reached, cancelling job"
                );
                spawn_cancel(&self.queue, request_id);
                Err(SunraError::client_timeout(timeout.as_millis()).with_request_id(request_id))
            }
        }
    }

    async fn poll_until_completed(
        &self,
        request_id: &str,
        options: &PollOptions,
    ) -> Result<CompletedStatus> {
        let max_failures = options.max_retries.max(1);
        let mut tracker = StatusTracker::new();
        let mut failures = 0u32;

        debug!(
            request_id = %request_id,
            poll_interval_ms = options.poll_interval.as_millis() as u64,
            "Polling job status"
        );

        loop {
            match self.queue.status(request_id, options.logs).await {
                Ok(status) => {
                    tracker.observe(&status)?;
                    failures = 0;
                    if let Some(callback) = &options.on_queue_update {
                        callback(&status);
                    }
                    if let JobStatus::Completed(done) = status {
                        info!(request_id = %request_id, success = done.success, "Job completed");
                        return Ok(done);
                    }
                }
                Err(err) => {
                    failures += 1;
                    if failures >= max_failures {
                        return Err(err);
                    }
                    warn!(
                        request_id = %request_id,
                        attempt = failures,
                        max_retries = max_failures,
                        error = %err,
                        "Status poll failed, retrying"
                    );
                }
            }
            sleep(options.poll_interval).await;
        }
    }
}

/// Fire one cancel in the background; failures are logged and swallowed
pub(crate) fn spawn_cancel(queue: &QueueClient, request_id: &str) {
    let queue = queue.clone();
    let request_id = request_id.to_string();
    tokio::spawn(async move {
        if let Err(err) = queue.cancel(&request_id).await {
            warn!(request_id = %request_id, error = %err, "Best-effort cancel failed");
        }
    });
}
