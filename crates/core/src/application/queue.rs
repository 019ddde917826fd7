// Queue Operations
//
// submit / status / result / cancel. No retry at this layer: submission is
// at-most-once from the client's point of view.

use serde_json::Value;
use tracing::{debug, info};

use super::constants::header;
use super::dispatch::RequestDispatcher;
use super::storage::StorageClient;
use crate::domain::{InQueueStatus, InputValue, JobRequest, JobResult, JobStatus, QueuePriority};
use crate::error::Result;
use crate::port::Method;

/// Submission parameters
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub input: Option<InputValue>,
    /// Sent as the `webhook` query parameter
    pub webhook_url: Option<String>,
    /// Defaults to `normal`
    pub priority: Option<QueuePriority>,
}

impl SubmitOptions {
    pub fn with_input(mut self, input: impl Into<InputValue>) -> Self {
        self.input = Some(input.into());
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
}

/// Queue client
#[derive(Debug, Clone)]
pub struct QueueClient {
    dispatcher: RequestDispatcher,
    storage: StorageClient,
}

impl QueueClient {
    pub fn new(dispatcher: RequestDispatcher, storage: StorageClient) -> Self {
        Self {
            dispatcher,
            storage,
        }
    }

    /// Submit a job; uploads file inputs first
    pub async fn submit(&self, endpoint_id: &str, options: SubmitOptions) -> Result<InQueueStatus> {
        let url = self
            .dispatcher
            .urls()
            .submit(endpoint_id, options.webhook_url.as_deref())?;
        let body = match options.input {
            Some(input) => Some(self.storage.transform_input(input).await?),
            None => None,
        };
        let priority = options.priority.unwrap_or_default();

        let request = self
            .dispatcher
            .request(Method::Post, &url, body.as_ref())?
            .header(header::QUEUE_PRIORITY, priority.as_str());
        let status: InQueueStatus = self.dispatcher.send_json(request).await?;

        info!(
            endpoint_id = %endpoint_id,
            request_id = %status.request_id,
            queue_position = status.queue_position,
            "Job submitted"
        );
        Ok(status)
    }

    /// Submit a prepared job request
    pub async fn submit_job(&self, job: JobRequest) -> Result<InQueueStatus> {
        let options = SubmitOptions {
            input: job.input,
            webhook_url: job.webhook_url,
            priority: job.priority,
        };
        self.submit(&job.endpoint_id, options).await
    }

    /// Current status of a job (read-only)
    pub async fn status(&self, request_id: &str, logs: bool) -> Result<JobStatus> {
        let url = self.dispatcher.urls().status(request_id, logs)?;
        let request = self.dispatcher.request(Method::Get, &url, None)?;
        let status: JobStatus = self.dispatcher.send_json(request).await?;
        debug!(request_id = %request_id, status = %status, "Status fetched");
        Ok(status)
    }

    /// Output of a completed job
    pub async fn result(&self, request_id: &str) -> Result<JobResult> {
        let url = self.dispatcher.urls().result(request_id)?;
        let request = self.dispatcher.request(Method::Get, &url, None)?;
        let data: Value = self.dispatcher.send_json(request).await?;
        Ok(JobResult {
            data,
            request_id: request_id.to_string(),
        })
    }

    /// Ask the server to cancel a job
    pub async fn cancel(&self, request_id: &str) -> Result<()> {
        let url = self.dispatcher.urls().cancel(request_id)?;
        let request = self.dispatcher.request(Method::Put, &url, None)?;
        self.dispatcher.send(request).await?;
        info!(request_id = %request_id, "Cancel requested");
        Ok(())
    }

    pub fn storage(&self) -> &StorageClient {
        &self.storage
    }

    pub(crate) fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, Credentials};
    use crate::domain::FileInput;
    use crate::error::ErrorKind;
    use crate::port::mocks::{MockReply, MockTransport};
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use serde_json::json;
    use std::sync::Arc;

    fn queue_with(transport: MockTransport) -> QueueClient {
        let config = ClientConfig::default().with_credentials(Credentials::from_static("k"));
        let dispatcher = RequestDispatcher::new(Arc::new(config), Arc::new(transport));
        let storage = StorageClient::new(dispatcher.clone(), Arc::new(FixedTimeProvider::new(0)));
        QueueClient::new(dispatcher, storage)
    }

    fn in_queue_body(id: &str) -> Value {
        json!({
            "status": "IN_QUEUE",
            "request_id": id,
            "queue_position": 4,
            "response_url": format!("https://api.sunra.ai/v1/queue/requests/{}", id)
        })
    }

    #[tokio::test]
    async fn test_submit_sends_priority_and_webhook() {
        let transport = MockTransport::new(|_| MockReply::json(200, in_queue_body("req-1")));
        let queue = queue_with(transport.clone());

        let status = queue
            .submit(
                "sunra/lcm",
                SubmitOptions::default()
                    .with_input(json!({"prompt": "a cat"}))
                    .with_webhook_url("https://hooks.example.com/x")
                    .with_priority(QueuePriority::Low),
            )
            .await
            .unwrap();
        assert_eq!(status.request_id, "req-1");
        assert_eq!(status.queue_position, 4);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0].request;
        assert_eq!(req.method, Method::Post);
        assert!(req
            .url
            .starts_with("https://api.sunra.ai/v1/queue/sunra/lcm?webhook="));
        assert_eq!(req.header_value(header::QUEUE_PRIORITY), Some("low"));
        assert_eq!(requests[0].json_body().unwrap(), json!({"prompt": "a cat"}));
    }

    #[tokio::test]
    async fn test_submit_defaults_to_normal_priority_without_body() {
        let transport = MockTransport::new(|_| MockReply::json(200, in_queue_body("req-2")));
        let queue = queue_with(transport.clone());

        queue.submit("sunra/lcm", SubmitOptions::default()).await.unwrap();

        let requests = transport.requests();
        let req = &requests[0].request;
        assert_eq!(req.header_value(header::QUEUE_PRIORITY), Some("normal"));
        assert!(req.body.is_none());
    }

    #[tokio::test]
    async fn test_submit_uploads_files_before_posting() {
        let transport = MockTransport::new(|req| {
            if req.url.ends_with("/storage/upload/initiate") {
                MockReply::json(
                    200,
                    json!({"upload_url": "https://upload.example.com/1", "file_url": "https://cdn.sunra.ai/1"}),
                )
            } else if req.method == Method::Put {
                MockReply::empty(200)
            } else {
                MockReply::json(200, in_queue_body("req-3"))
            }
        });
        let queue = queue_with(transport.clone());

        queue
            .submit_job(
                JobRequest::new("sunra/upscale")
                    .with_input(InputValue::object([("image", FileInput::new(vec![9u8]))])),
            )
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[2].json_body().unwrap(),
            json!({"image": "https://cdn.sunra.ai/1"})
        );
    }

    #[tokio::test]
    async fn test_submit_failure_is_not_retried() {
        let transport = MockTransport::new(|_| MockReply::text(503, "unavailable"));
        let queue = queue_with(transport.clone());

        let err = queue.submit("sunra/lcm", SubmitOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Http);
        assert_eq!(err.code, "HTTP_503");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_fails_before_any_request() {
        let transport = MockTransport::new(|_| MockReply::empty(200));
        let queue = queue_with(transport.clone());

        let err = queue.submit("lcm", SubmitOptions::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_status_result_cancel() {
        let transport = MockTransport::new(|req| match (req.method, req.url.as_str()) {
            (Method::Get, url) if url.contains("/status") => MockReply::json(
                200,
                json!({"status": "IN_PROGRESS", "request_id": "r", "response_url": "u", "logs": []}),
            ),
            (Method::Get, _) => MockReply::json(200, json!({"images": [{"url": "https://cdn/x.png"}]})),
            (Method::Put, _) => MockReply::empty(204),
            _ => MockReply::empty(405),
        });
        let queue = queue_with(transport.clone());

        let status = queue.status("r", true).await.unwrap();
        assert!(matches!(status, JobStatus::InProgress(_)));
        assert!(transport.requests()[0].request.url.ends_with("/requests/r/status?logs=1"));

        let result = queue.result("r").await.unwrap();
        assert_eq!(result.request_id, "r");
        assert_eq!(result.data["images"][0]["url"], "https://cdn/x.png");

        queue.cancel("r").await.unwrap();
        assert_eq!(transport.count(Method::Put, "/requests/r/cancel"), 1);
    }
}
