// Subscription Orchestrator
//
// submit -> on_enqueue -> (poller | status stream) -> result
//
// The whole sequence is one `run() -> Result<JobResult>`. `subscribe` only
// decides how a failure is delivered: returned as `Err`, or handed to
// `on_error` with `Ok(None)` returned. An abort signal settles it with
// `Ok(None)` at any point.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::sleep;
use tracing::{info, warn};

use super::abort::AbortSignal;
use super::constants::{DEFAULT_MAX_RETRIES, DEFAULT_POLL_INTERVAL, DEFAULT_STREAM_IDLE_TIMEOUT};
use super::poller::{spawn_cancel, PollOptions, QueueUpdateCallback, StatusPoller};
use super::queue::{QueueClient, SubmitOptions};
use super::stream::{StreamOptions, StreamPayload, StreamingClient};
use crate::domain::{CompletedStatus, InputValue, JobResult, JobStatus, QueuePriority, StatusTracker};
use crate::error::{code, Result, SunraError};
use crate::port::Method;

pub type EnqueueCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SunraError) + Send + Sync>;

/// How status updates are received after submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeMode {
    #[default]
    Polling,
    /// Server-sent status stream
    Streaming,
}

/// Options for `subscribe`
#[derive(Clone)]
pub struct SubscribeOptions {
    pub input: Option<InputValue>,
    pub webhook_url: Option<String>,
    pub priority: Option<QueuePriority>,
    pub mode: SubscribeMode,
    /// Polling mode only
    pub poll_interval: Duration,
    /// Polling mode only
    pub max_retries: u32,
    /// Streaming mode only
    pub stream_idle_timeout: Duration,
    /// Overall deadline once the job is enqueued
    pub timeout: Option<Duration>,
    pub logs: bool,
    pub on_enqueue: Option<EnqueueCallback>,
    pub on_queue_update: Option<QueueUpdateCallback>,
    pub on_error: Option<ErrorCallback>,
    pub abort: Option<AbortSignal>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            input: None,
            webhook_url: None,
            priority: None,
            mode: SubscribeMode::Polling,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            timeout: None,
            logs: false,
            on_enqueue: None,
            on_queue_update: None,
            on_error: None,
            abort: None,
        }
    }
}

impl SubscribeOptions {
    pub fn with_input(mut self, input: impl Into<InputValue>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_mode(mut self, mode: SubscribeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_webhook_url(mut self, webhook_url: impl Into<String>) -> Self {
        self.webhook_url = Some(webhook_url.into());
        self
    }

    pub fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = Some(priority);
        self
    }

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

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    pub fn on_enqueue<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_enqueue = Some(Arc::new(callback));
        self
    }

    pub fn on_queue_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&JobStatus) + Send + Sync + 'static,
    {
        self.on_queue_update = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SunraError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("mode", &self.mode)
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .field("logs", &self.logs)
            .field("has_input", &self.input.is_some())
            .finish_non_exhaustive()
    }
}

/// "Submit and wait" orchestrator
#[derive(Debug, Clone)]
pub struct Subscriber {
    queue: QueueClient,
    poller: StatusPoller,
    streaming: StreamingClient,
}

impl Subscriber {
    pub fn new(queue: QueueClient, streaming: StreamingClient) -> Self {
        Self {
            poller: StatusPoller::new(queue.clone()),
            queue,
            streaming,
        }
    }

    /// Submit a job and wait for its result
    ///
    /// Returns `Ok(None)` when aborted, or when a failure was delivered to
    /// `on_error` instead of being returned.
    pub async fn subscribe(
        &self,
        endpoint_id: &str,
        mut options: SubscribeOptions,
    ) -> Result<Option<JobResult>> {
        let on_error = options.on_error.take();
        let abort = options.abort.take();

        let outcome = match &abort {
            Some(signal) => {
                options.on_queue_update = options
                    .on_queue_update
                    .take()
                    .map(|callback| silenced_after_abort(callback, signal.clone()));
                tokio::select! {
                    biased;
                    _ = signal.aborted() => None,
                    result = self.run(endpoint_id, options) => Some(result),
                }
            }
            None => Some(self.run(endpoint_id, options).await),
        };

        match outcome {
            None => {
                info!(endpoint_id = %endpoint_id, "Subscription aborted");
                Ok(None)
            }
            Some(Ok(result)) => Ok(Some(result)),
            Some(Err(err)) => match on_error {
                Some(callback) => {
                    callback(&err);
                    Ok(None)
                }
                None => Err(err),
            },
        }
    }

    async fn run(&self, endpoint_id: &str, options: SubscribeOptions) -> Result<JobResult> {
        let submit = SubmitOptions {
            input: options.input.clone(),
            webhook_url: options.webhook_url.clone(),
            priority: options.priority,
        };
        let request_id = self.queue.submit(endpoint_id, submit).await?.request_id;
        if let Some(callback) = &options.on_enqueue {
            callback(&request_id);
        }

        let completed = match options.mode {
            SubscribeMode::Polling => {
                let poll = PollOptions {
                    poll_interval: options.poll_interval,
                    timeout: options.timeout,
                    logs: options.logs,
                    max_retries: options.max_retries,
                    on_queue_update: options.on_queue_update.clone(),
                };
                self.poller.subscribe_to_status(&request_id, poll).await?
            }
            SubscribeMode::Streaming => self.watch_status_stream(&request_id, &options).await?,
        };

        if let Some(err) = completed.failure() {
            return Err(err);
        }
        self.queue.result(&request_id).await
    }

    /// Streaming mode: follow the status stream, with the same deadline rules as polling
    async fn watch_status_stream(
        &self,
        request_id: &str,
        options: &SubscribeOptions,
    ) -> Result<CompletedStatus> {
        let Some(timeout) = options.timeout else {
            return self.follow_status_stream(request_id, options).await;
        };
        tokio::select! {
            biased;
            result = self.follow_status_stream(request_id, options) => result,
            _ = sleep(timeout) => {
                warn!(request_id = %request_id, "Client timeout reached, cancelling job");
                spawn_cancel(&self.queue, request_id);
                Err(SunraError::client_timeout(timeout.as_millis()).with_request_id(request_id))
            }
        }
    }

    async fn follow_status_stream(
        &self,
        request_id: &str,
        options: &SubscribeOptions,
    ) -> Result<CompletedStatus> {
        let url = self
            .queue
            .dispatcher()
            .urls()
            .status_stream(request_id, options.logs)?;
        let mut stream = self
            .streaming
            .stream(
                StreamOptions::for_url(url)
                    .with_method(Method::Get)
                    .with_idle_timeout(options.stream_idle_timeout),
            )
            .await?;

        let mut tracker = StatusTracker::new();
        while let Some(payload) = stream.next().await {
            let StreamPayload::Json(value) = payload else {
                return Err(SunraError::protocol(
                    code::INVALID_PAYLOAD,
                    "Status stream sent a non-JSON chunk",
                )
                .with_request_id(request_id));
            };
            let status: JobStatus = serde_json::from_value(value)
                .map_err(|e| SunraError::from(e).with_request_id(request_id))?;
            tracker.observe(&status)?;
            if let Some(callback) = &options.on_queue_update {
                callback(&status);
            }
            if let JobStatus::Completed(done) = status {
                info!(request_id = %request_id, success = done.success, "Job completed");
                return Ok(done);
            }
        }

        // the stream's own error takes precedence over "ended early"
        stream.done().await?;
        Err(SunraError::protocol(
            code::STREAM_INCOMPLETE,
            "Status stream ended before the job completed",
        )
        .with_request_id(request_id))
    }
}

fn silenced_after_abort(callback: QueueUpdateCallback, signal: AbortSignal) -> QueueUpdateCallback {
    Arc::new(move |status: &JobStatus| {
        if !signal.is_aborted() {
            callback(status);
        }
    })
}
