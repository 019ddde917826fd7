// HTTP Transport Port
// Single-request abstraction over the HTTP client (origin or user proxy)

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Set a header, replacing any previous value (case-insensitive)
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Buffered response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Chunked response body
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Response whose body is consumed incrementally
pub struct StreamingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl StreamingResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into a buffered response
    pub async fn collect(mut self) -> Result<HttpResponse, TransportError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.body.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(HttpResponse {
            status: self.status,
            headers: self.headers,
            body,
        })
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Transport-level failures (no HTTP response was obtained)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to read body: {0}")]
    Body(String),

    #[error("Request aborted")]
    Aborted,

    #[error("Transport error: {0}")]
    Other(String),
}

/// HTTP transport port
///
/// Implementations:
/// - ReqwestTransport (sunra-infra-http)
/// - MockTransport (tests)
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one request and buffer the whole response
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Perform one request and hand back the body as a chunk stream
    ///
    /// The default buffers through `send` and yields a single chunk.
    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.send(request).await?;
        let body: ByteStream = stream::iter(vec![Ok(response.body)]).boxed();
        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            body,
        })
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    /// One step of a scripted streaming body
    #[derive(Debug, Clone)]
    pub enum StreamStep {
        Chunk(Vec<u8>),
        Delay(Duration),
        Fail(TransportError),
        /// Never yield again
        Hang,
    }

    /// Scripted reply for one request
    #[derive(Debug, Clone)]
    pub enum MockReply {
        Response(HttpResponse),
        Stream {
            status: u16,
            headers: Vec<(String, String)>,
            steps: Vec<StreamStep>,
        },
        Error(TransportError),
        /// Wait before replying
        Delayed(Duration, Box<MockReply>),
        /// Never reply
        Hang,
    }

    impl MockReply {
        pub fn json(status: u16, body: Value) -> Self {
            Self::json_with_headers(status, body, vec![])
        }

        pub fn json_with_headers(status: u16, body: Value, headers: Vec<(&str, &str)>) -> Self {
            let mut all_headers = vec![("content-type".to_string(), "application/json".to_string())];
            all_headers.extend(headers.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
            MockReply::Response(HttpResponse {
                status,
                headers: all_headers,
                body: body.to_string().into_bytes(),
            })
        }

        pub fn text(status: u16, body: &str) -> Self {
            MockReply::Response(HttpResponse {
                status,
                headers: vec![("content-type".to_string(), "text/plain".to_string())],
                body: body.as_bytes().to_vec(),
            })
        }

        pub fn empty(status: u16) -> Self {
            MockReply::Response(HttpResponse {
                status,
                headers: vec![],
                body: vec![],
            })
        }

        /// `text/event-stream` body with one `data:` frame per payload
        pub fn sse(payloads: Vec<Value>) -> Self {
            let steps = payloads
                .into_iter()
                .map(|p| StreamStep::Chunk(format!("data: {}\n\n", p).into_bytes()))
                .collect();
            Self::sse_steps(steps)
        }

        pub fn sse_steps(steps: Vec<StreamStep>) -> Self {
            MockReply::Stream {
                status: 200,
                headers: vec![(
                    "content-type".to_string(),
                    "text/event-stream; charset=utf-8".to_string(),
                )],
                steps,
            }
        }

        pub fn delayed(self, delay: Duration) -> Self {
            MockReply::Delayed(delay, Box::new(self))
        }
    }

    /// A request as seen by the mock, with its (virtual) arrival time
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub request: HttpRequest,
        pub at: Instant,
    }

    impl RecordedRequest {
        pub fn json_body(&self) -> Option<Value> {
            self.request
                .body
                .as_ref()
                .and_then(|b| serde_json::from_slice(b).ok())
        }
    }

    type Handler = Arc<dyn Fn(&HttpRequest) -> MockReply + Send + Sync>;

    /// Mock transport driven by a routing closure
    #[derive(Clone)]
    pub struct MockTransport {
        handler: Handler,
        recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl MockTransport {
        pub fn new<F>(handler: F) -> Self
        where
            F: Fn(&HttpRequest) -> MockReply + Send + Sync + 'static,
        {
            Self {
                handler: Arc::new(handler),
                recorded: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.recorded.lock().unwrap().clone()
        }

        /// Count requests with the given method whose URL contains `fragment`
        pub fn count(&self, method: Method, fragment: &str) -> usize {
            self.recorded
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.request.method == method && r.request.url.contains(fragment))
                .count()
        }

        fn record(&self, request: &HttpRequest) -> MockReply {
            self.recorded.lock().unwrap().push(RecordedRequest {
                request: request.clone(),
                at: Instant::now(),
            });
            (self.handler)(request)
        }

        async fn resolve(mut reply: MockReply) -> Result<MockReply, TransportError> {
            loop {
                match reply {
                    MockReply::Delayed(delay, inner) => {
                        tokio::time::sleep(delay).await;
                        reply = *inner;
                    }
                    MockReply::Hang => futures::future::pending::<()>().await,
                    MockReply::Error(e) => return Err(e),
                    other => return Ok(other),
                }
            }
        }
    }

    fn step_stream(steps: Vec<StreamStep>) -> ByteStream {
        stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                match steps.next()? {
                    StreamStep::Chunk(bytes) => return Some((Ok(bytes), steps)),
                    StreamStep::Fail(e) => return Some((Err(e), steps)),
                    StreamStep::Delay(d) => tokio::time::sleep(d).await,
                    StreamStep::Hang => futures::future::pending::<()>().await,
                }
            }
        })
        .boxed()
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let reply = self.record(&request);
            match Self::resolve(reply).await? {
                MockReply::Response(response) => Ok(response),
                MockReply::Stream {
                    status,
                    headers,
                    steps,
                } => {
                    StreamingResponse {
                        status,
                        headers,
                        body: step_stream(steps),
                    }
                    .collect()
                    .await
                }
                other => Err(TransportError::Other(format!("unexpected reply {:?}", other))),
            }
        }

        async fn send_streaming(
            &self,
            request: HttpRequest,
        ) -> Result<StreamingResponse, TransportError> {
            let reply = self.record(&request);
            match Self::resolve(reply).await? {
                MockReply::Response(response) => Ok(StreamingResponse {
                    status: response.status,
                    headers: response.headers,
                    body: stream::iter(vec![Ok(response.body)]).boxed(),
                }),
                MockReply::Stream {
                    status,
                    headers,
                    steps,
                } => Ok(StreamingResponse {
                    status,
                    headers,
                    body: step_stream(steps),
                }),
                other => Err(TransportError::Other(format!("unexpected reply {:?}", other))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::{MockReply, MockTransport, StreamStep};
    use super::*;

    #[test]
    fn test_header_replaces_case_insensitive() {
        let req = HttpRequest::new(Method::Get, "https://x")
            .header("Accept", "application/json")
            .header("accept", "text/event-stream");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header_value("ACCEPT"), Some("text/event-stream"));
    }

    #[tokio::test]
    async fn test_mock_stream_collects_chunks() {
        let transport = MockTransport::new(|_| {
            MockReply::sse_steps(vec![
                StreamStep::Chunk(b"data: 1\n".to_vec()),
                StreamStep::Chunk(b"\n".to_vec()),
            ])
        });

        let response = transport
            .send(HttpRequest::new(Method::Get, "https://x/stream"))
            .await
            .unwrap();
        assert_eq!(response.text(), "data: 1\n\n");
        assert_eq!(transport.count(Method::Get, "/stream"), 1);
    }
}
