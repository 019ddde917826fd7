//! Sunra Client Implementation

use std::sync::Arc;

use serde_json::Value;
use sunra_core::application::{
    JobStream, QueueClient, RequestDispatcher, StatusPoller, StorageClient, StreamOptions,
    StreamingClient, SubmitOptions, SubscribeOptions, Subscriber,
};
use sunra_core::domain::{FileInput, InQueueStatus, InputValue, JobResult, JobStatus};
use sunra_core::port::{HttpTransport, SystemTimeProvider, TimeProvider};
use sunra_core::{ClientConfig, Result};
use sunra_infra_http::ReqwestTransport;

use crate::error::SdkResult;
use crate::settings::ClientSettings;

/// Sunra queue client
///
/// Cheap to clone; every clone shares one configuration snapshot and one
/// HTTP connection pool.
///
/// # Example
///
/// ```no_run
/// use sunra_client::{SunraClient, SubscribeOptions};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SunraClient::from_env()?;
/// let result = client
///     .subscribe(
///         "sunra/lcm/text-to-image",
///         SubscribeOptions::default().with_input(json!({"prompt": "a red fox"})),
///     )
///     .await?;
/// if let Some(result) = result {
///     println!("{}", result.data);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SunraClient {
    config: Arc<ClientConfig>,
    queue: QueueClient,
    streaming: StreamingClient,
    poller: StatusPoller,
    subscriber: Subscriber,
}

impl SunraClient {
    /// Build a client over the default reqwest transport
    pub fn new(config: ClientConfig) -> SdkResult<Self> {
        let transport = ReqwestTransport::with_timeout(config.request_timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build from `client.toml` and `SUNRA_*` environment variables
    pub fn from_env() -> SdkResult<Self> {
        Self::new(ClientSettings::load()?.into_config())
    }

    /// Build over any transport (fakes, custom middleware)
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_transport_and_clock(config, transport, Arc::new(SystemTimeProvider))
    }

    pub fn with_transport_and_clock(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let dispatcher = RequestDispatcher::new(Arc::clone(&config), transport);
        let storage = StorageClient::new(dispatcher.clone(), clock);
        let queue = QueueClient::new(dispatcher.clone(), storage.clone());
        let streaming = StreamingClient::new(dispatcher, storage);

        Self {
            config,
            poller: StatusPoller::new(queue.clone()),
            subscriber: Subscriber::new(queue.clone(), streaming.clone()),
            queue,
            streaming,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn queue(&self) -> &QueueClient {
        &self.queue
    }

    pub fn storage(&self) -> &StorageClient {
        self.queue.storage()
    }

    pub fn streaming(&self) -> &StreamingClient {
        &self.streaming
    }

    pub fn poller(&self) -> &StatusPoller {
        &self.poller
    }

    /// Submit a job and wait for its result
    ///
    /// See [`Subscriber::subscribe`] for how errors and aborts are delivered.
    pub async fn subscribe(
        &self,
        endpoint_id: &str,
        options: SubscribeOptions,
    ) -> Result<Option<JobResult>> {
        self.subscriber.subscribe(endpoint_id, options).await
    }

    /// Open a server-sent event stream for a job
    pub async fn stream(&self, options: StreamOptions) -> Result<JobStream> {
        self.streaming.stream(options).await
    }

    pub async fn submit(&self, endpoint_id: &str, options: SubmitOptions) -> Result<InQueueStatus> {
        self.queue.submit(endpoint_id, options).await
    }

    pub async fn status(&self, request_id: &str, logs: bool) -> Result<JobStatus> {
        self.queue.status(request_id, logs).await
    }

    pub async fn result(&self, request_id: &str) -> Result<JobResult> {
        self.queue.result(request_id).await
    }

    pub async fn cancel(&self, request_id: &str) -> Result<()> {
        self.queue.cancel(request_id).await
    }

    /// Upload one file, returning its public URL
    pub async fn upload(&self, file: FileInput) -> Result<String> {
        self.storage().upload(file).await
    }

    /// Upload every blob in `input` and return the rewritten JSON
    pub async fn transform_input(&self, input: impl Into<InputValue>) -> Result<Value> {
        self.storage().transform_input(input.into()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sunra_core::config::Credentials;
    use sunra_core::port::mocks::{MockReply, MockTransport};
    use sunra_core::port::Method;

    fn client(transport: &MockTransport) -> SunraClient {
        SunraClient::with_transport(
            ClientConfig::default().with_credentials(Credentials::from_static("k")),
            Arc::new(transport.clone()),
        )
    }

    #[tokio::test]
    async fn test_clones_share_config() {
        let transport = MockTransport::new(|_| MockReply::empty(200));
        let a = client(&transport);
        let b = a.clone();
        assert!(std::ptr::eq(a.config(), b.config()));
    }

    #[tokio::test]
    async fn test_submit_goes_through_transport() {
        let transport = MockTransport::new(|_| {
            MockReply::json(
                200,
                json!({
                    "status": "IN_QUEUE",
                    "request_id": "abc",
                    "queue_position": 0,
                    "response_url": "https://api.sunra.ai/v1/queue/requests/abc",
                }),
            )
        });

        let status = client(&transport)
            .submit("sunra/llm", SubmitOptions::default().with_input(json!({"prompt": "hi"})))
            .await
            .unwrap();

        assert_eq!(status.request_id, "abc");
        assert_eq!(transport.count(Method::Post, "/queue/sunra/llm"), 1);
        assert_eq!(
            transport.requests()[0].request.header_value("authorization"),
            Some("Key k")
        );
    }
}
