// reqwest implementation of the HttpTransport port
//
// Buffered requests carry the configured total timeout. Streaming requests
// only get a connect timeout; idle detection belongs to the stream reader.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::{debug, trace};

use sunra_core::config::DEFAULT_REQUEST_TIMEOUT;
use sunra_core::port::{
    ByteStream, HttpRequest, HttpResponse, HttpTransport, Method, StreamingResponse,
    TransportError,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HttpTransport backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build with a per-request timeout for buffered calls
    pub fn with_timeout(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// Wrap an already configured client
    pub fn from_client(client: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    fn builder(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(method = request.method.as_str(), url = %request.url, "HTTP request");
        let response = self
            .builder(request)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await.map_err(map_error)?.to_vec();
        trace!(status, bytes = body.len(), "HTTP response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        debug!(method = request.method.as_str(), url = %request.url, "HTTP streaming request");
        let response = self.builder(request).send().await.map_err(map_error)?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body: ByteStream = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(map_error)
            .boxed();

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_body() || err.is_decode() {
        TransportError::Body(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
