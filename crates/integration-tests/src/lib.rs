//! In-memory fake of the Sunra queue API
//!
//! `FakeQueueServer` implements the transport port, so a real `SunraClient`
//! can run full job lifecycles without a network. Jobs advance one state per
//! status poll according to the active [`Scenario`].

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sunra_client::{ClientConfig, Credentials, SunraClient};
use sunra_core::port::{
    ByteStream, HttpRequest, HttpResponse, HttpTransport, Method, StreamingResponse,
    TransportError,
};
use url::Url;
use uuid::Uuid;

pub const TEST_KEY: &str = "integration-key";
pub const API_BASE: &str = "https://api.sunra.ai/v1";
pub const UPLOAD_BASE: &str = "https://uploads.sunra.test/put";
pub const CDN_BASE: &str = "https://cdn.sunra.test/files";

/// How the fake finishes a job
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// Result is `{"echo": <input>}`
    Echo,
    Success(Value),
    Failure { code: String, message: String },
}

/// Per-server job behaviour
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Status polls answered with IN_QUEUE
    pub polls_in_queue: u32,
    /// Status polls answered with IN_PROGRESS after that
    pub polls_in_progress: u32,
    pub outcome: JobOutcome,
    pub logs: Vec<String>,
    /// Intermediate payloads of a streaming endpoint, before the final one
    pub stream_events: Vec<Value>,
    /// Pause between streamed frames
    pub stream_delay: Duration,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            polls_in_queue: 1,
            polls_in_progress: 1,
            outcome: JobOutcome::Echo,
            logs: vec!["loading model".to_string(), "generating".to_string()],
            stream_events: vec![json!({"progress": 0.5})],
            stream_delay: Duration::from_millis(10),
        }
    }
}

/// What the fake knows about one job
#[derive(Debug, Clone)]
pub struct FakeJob {
    pub endpoint_id: String,
    pub input: Value,
    pub priority: Option<String>,
    pub webhook_url: Option<String>,
    pub polls: u32,
    pub cancelled: bool,
}

/// A completed upload
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct ServerState {
    scenario: Scenario,
    jobs: HashMap<String, FakeJob>,
    pending_uploads: HashMap<String, String>,
    files: HashMap<String, StoredFile>,
    requests: Vec<HttpRequest>,
    failing_status_polls: u32,
}

enum Reply {
    Buffered(HttpResponse),
    Events(Vec<Value>, Duration),
}

/// In-memory queue server speaking the HTTP protocol of the real API
#[derive(Debug, Clone, Default)]
pub struct FakeQueueServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeQueueServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scenario(scenario: Scenario) -> Self {
        let server = Self::new();
        server.lock().scenario = scenario;
        server
    }

    /// Client authenticated with [`TEST_KEY`]
    pub fn client(&self) -> SunraClient {
        self.client_with_key(TEST_KEY)
    }

    pub fn client_with_key(&self, key: &str) -> SunraClient {
        let config = ClientConfig::default().with_credentials(Credentials::from_static(key));
        SunraClient::with_transport(config, Arc::new(self.clone()))
    }

    pub fn job(&self, request_id: &str) -> Option<FakeJob> {
        self.lock().jobs.get(request_id).cloned()
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.lock().jobs.keys().cloned().collect()
    }

    pub fn file(&self, file_url: &str) -> Option<StoredFile> {
        self.lock().files.get(file_url).cloned()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    /// Requests with `method` whose URL contains `fragment`
    pub fn count(&self, method: Method, fragment: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.url.contains(fragment))
            .count()
    }

    /// Answer the next `n` status polls with 503
    pub fn fail_next_status_polls(&self, n: u32) {
        self.lock().failing_status_polls = n;
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, request: &HttpRequest) -> Reply {
        let mut state = self.lock();
        state.requests.push(request.clone());

        let Ok(url) = Url::parse(&request.url) else {
            return Reply::Buffered(error_response(400, "INVALID_URL", "Malformed URL"));
        };

        if request.url.starts_with(UPLOAD_BASE) {
            return Reply::Buffered(state.store_upload(request));
        }
        if !request.url.starts_with(API_BASE) {
            return Reply::Buffered(text_response(404, "Not Found"));
        }
        let expected_auth = format!("Key {}", TEST_KEY);
        if request.header_value("authorization") != Some(expected_auth.as_str()) {
            return Reply::Buffered(error_response(401, "UNAUTHORIZED", "Invalid API key"));
        }

        let path = url.path().trim_start_matches("/v1/").to_string();
        let segments: Vec<&str> = path.split('/').collect();
        let logs = url.query_pairs().any(|(k, v)| k == "logs" && v == "1");
        let webhook_url = url
            .query_pairs()
            .find(|(k, _)| k == "webhook")
            .map(|(_, v)| v.into_owned());

        match (request.method, segments.as_slice()) {
            (Method::Post, ["storage", "upload", "initiate"]) => {
                Reply::Buffered(state.initiate_upload(request))
            }
            (Method::Get, ["queue", "requests", id, "status", "stream"]) => {
                state.status_stream(id, logs)
            }
            (Method::Get, ["queue", "requests", id, "status"]) => {
                Reply::Buffered(state.poll_status(id, logs))
            }
            (Method::Put, ["queue", "requests", id, "cancel"]) => Reply::Buffered(state.cancel(id)),
            (Method::Get, ["queue", "requests", id]) => Reply::Buffered(state.result(id)),
            (Method::Post, ["queue", endpoint @ ..]) if !endpoint.is_empty() => {
                let endpoint_id = endpoint.join("/");
                let streaming = request
                    .header_value("accept")
                    .is_some_and(|a| a.contains("text/event-stream"));
                state.submit(&endpoint_id, request, webhook_url, streaming)
            }
            _ => Reply::Buffered(text_response(404, "Not Found")),
        }
    }
}

impl ServerState {
    fn submit(
        &mut self,
        endpoint_id: &str,
        request: &HttpRequest,
        webhook_url: Option<String>,
        streaming: bool,
    ) -> Reply {
        let input: Value = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or(Value::Null);

        if input.get("prompt").and_then(Value::as_str) == Some("") {
            let mut response = json_response(
                422,
                json!({
                    "error": {
                        "type": "validation_error",
                        "code": "INVALID_INPUT",
                        "message": "Request validation failed",
                        "details": [
                            {"loc": ["body", "prompt"], "msg": "must not be empty", "type": "value_error"}
                        ]
                    },
                    "timestamp": "2026-01-01T00:00:00Z"
                }),
            );
            response.headers.extend([
                ("x-request-id".to_string(), "srv-validation".to_string()),
                ("x-ratelimit-limit".to_string(), "100".to_string()),
                ("x-ratelimit-remaining".to_string(), "99".to_string()),
                ("x-ratelimit-reset".to_string(), "60".to_string()),
            ]);
            return Reply::Buffered(response);
        }

        if streaming {
            let mut events = self.scenario.stream_events.clone();
            events.push(self.final_stream_payload(&input));
            return Reply::Events(events, self.scenario.stream_delay);
        }

        let id = Uuid::new_v4().to_string();
        self.jobs.insert(
            id.clone(),
            FakeJob {
                endpoint_id: endpoint_id.to_string(),
                input,
                priority: request.header_value("x-sunra-queue-priority").map(str::to_string),
                webhook_url,
                polls: 0,
                cancelled: false,
            },
        );
        Reply::Buffered(json_response(
            200,
            json!({
                "status": "IN_QUEUE",
                "request_id": id,
                "queue_position": self.scenario.polls_in_queue,
                "response_url": response_url(&id),
            }),
        ))
    }

    fn poll_status(&mut self, id: &str, logs: bool) -> HttpResponse {
        if self.failing_status_polls > 0 {
            self.failing_status_polls -= 1;
            return text_response(503, "Service Unavailable");
        }
        let Some(job) = self.jobs.get_mut(id) else {
            return error_response(404, "NOT_FOUND", "Request not found");
        };
        job.polls += 1;
        let polls = job.polls;
        let job = job.clone();
        json_response(200, self.status_at(id, &job, polls, logs))
    }

    fn status_stream(&mut self, id: &str, logs: bool) -> Reply {
        let Some(job) = self.jobs.get(id).cloned() else {
            return Reply::Buffered(error_response(404, "NOT_FOUND", "Request not found"));
        };
        let last = self.scenario.polls_in_queue + self.scenario.polls_in_progress + 1;
        let events: Vec<Value> = (1..=last)
            .map(|poll| self.status_at(id, &job, poll, logs))
            .collect();
        if let Some(job) = self.jobs.get_mut(id) {
            job.polls = last;
        }
        Reply::Events(events, self.scenario.stream_delay)
    }

    fn status_at(&self, id: &str, job: &FakeJob, polls: u32, logs: bool) -> Value {
        let in_queue = self.scenario.polls_in_queue;
        let in_progress = in_queue + self.scenario.polls_in_progress;
        let log_lines = if logs { self.log_lines() } else { json!([]) };

        if job.cancelled {
            return json!({
                "status": "COMPLETED",
                "request_id": id,
                "response_url": response_url(id),
                "logs": log_lines,
                "success": false,
                "error": {"code": "CANCELLED", "message": "Request was cancelled"},
            });
        }
        if polls <= in_queue {
            return json!({
                "status": "IN_QUEUE",
                "request_id": id,
                "queue_position": in_queue - polls,
                "response_url": response_url(id),
            });
        }
        if polls <= in_progress {
            return json!({
                "status": "IN_PROGRESS",
                "request_id": id,
                "response_url": response_url(id),
                "logs": log_lines,
            });
        }

        let mut completed = json!({
            "status": "COMPLETED",
            "request_id": id,
            "response_url": response_url(id),
            "logs": log_lines,
            "metrics": {"inference_time": 1.25},
        });
        if let JobOutcome::Failure { code, message } = &self.scenario.outcome {
            completed["success"] = json!(false);
            completed["error"] = json!({
                "code": code,
                "message": message,
                "timestamp": "2026-01-01T00:00:00Z",
            });
        }
        completed
    }

    fn is_completed(&self, job: &FakeJob) -> bool {
        job.cancelled || job.polls > self.scenario.polls_in_queue + self.scenario.polls_in_progress
    }

    fn result(&self, id: &str) -> HttpResponse {
        let Some(job) = self.jobs.get(id) else {
            return error_response(404, "NOT_FOUND", "Request not found");
        };
        if !self.is_completed(job) {
            return error_response(400, "NOT_READY", "Request is still in progress");
        }
        match &self.scenario.outcome {
            JobOutcome::Echo => json_response(200, json!({"echo": job.input})),
            JobOutcome::Success(data) => json_response(200, data.clone()),
            JobOutcome::Failure { code, message } => error_response(400, code, message),
        }
    }

    fn cancel(&mut self, id: &str) -> HttpResponse {
        let completed = match self.jobs.get(id) {
            Some(job) => self.is_completed(job),
            None => return error_response(404, "NOT_FOUND", "Request not found"),
        };
        if completed {
            return error_response(400, "ALREADY_COMPLETED", "Request already completed");
        }
        if let Some(job) = self.jobs.get_mut(id) {
            job.cancelled = true;
        }
        json_response(200, json!({"status": "CANCELLATION_REQUESTED"}))
    }

    fn initiate_upload(&mut self, request: &HttpRequest) -> HttpResponse {
        let body: Value = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or(Value::Null);
        let Some(file_name) = body.get("file_name").and_then(Value::as_str) else {
            return error_response(422, "INVALID_INPUT", "file_name is required");
        };

        let id = Uuid::new_v4();
        let upload_url = format!("{}/{}", UPLOAD_BASE, id);
        let file_url = format!("{}/{}/{}", CDN_BASE, id, file_name);
        self.pending_uploads.insert(upload_url.clone(), file_url.clone());
        json_response(200, json!({"upload_url": upload_url, "file_url": file_url}))
    }

    fn store_upload(&mut self, request: &HttpRequest) -> HttpResponse {
        if request.method != Method::Put {
            return text_response(405, "Method Not Allowed");
        }
        let Some(file_url) = self.pending_uploads.remove(&request.url) else {
            return text_response(403, "Upload URL expired");
        };
        self.files.insert(
            file_url,
            StoredFile {
                content_type: request
                    .header_value("content-type")
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                bytes: request.body.clone().unwrap_or_default(),
            },
        );
        HttpResponse {
            status: 200,
            headers: vec![],
            body: vec![],
        }
    }

    fn final_stream_payload(&self, input: &Value) -> Value {
        match &self.scenario.outcome {
            JobOutcome::Echo => json!({"status": "COMPLETED", "success": true, "output": {"echo": input}}),
            JobOutcome::Success(data) => json!({"status": "COMPLETED", "success": true, "output": data}),
            JobOutcome::Failure { code, message } => json!({
                "status": "FAILED",
                "success": false,
                "error": {"code": code, "message": message},
            }),
        }
    }

    fn log_lines(&self) -> Value {
        Value::Array(
            self.scenario
                .logs
                .iter()
                .map(|message| {
                    json!({
                        "message": message,
                        "level": "INFO",
                        "source": "USER",
                        "timestamp": "2026-01-01T00:00:00Z",
                    })
                })
                .collect(),
        )
    }
}

fn response_url(id: &str) -> String {
    format!("{}/queue/requests/{}", API_BASE, id)
}

fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: body.to_string().into_bytes(),
    }
}

fn text_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: vec![("content-type".to_string(), "text/plain".to_string())],
        body: body.as_bytes().to_vec(),
    }
}

fn error_response(status: u16, code: &str, message: &str) -> HttpResponse {
    json_response(status, json!({"error": {"code": code, "message": message}}))
}

fn sse_frame(payload: &Value) -> Vec<u8> {
    format!("data: {}\n\n", payload).into_bytes()
}

#[async_trait]
impl HttpTransport for FakeQueueServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        match self.handle(&request) {
            Reply::Buffered(response) => Ok(response),
            Reply::Events(events, _) => Ok(HttpResponse {
                status: 200,
                headers: vec![("content-type".to_string(), "text/event-stream".to_string())],
                body: events.iter().flat_map(sse_frame).collect(),
            }),
        }
    }

    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        match self.handle(&request) {
            Reply::Buffered(response) => {
                let body: ByteStream = stream::iter(vec![Ok(response.body)]).boxed();
                Ok(StreamingResponse {
                    status: response.status,
                    headers: response.headers,
                    body,
                })
            }
            Reply::Events(events, delay) => {
                let body: ByteStream = stream::iter(events)
                    .then(move |event| async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, TransportError>(sse_frame(&event))
                    })
                    .boxed();
                Ok(StreamingResponse {
                    status: 200,
                    headers: vec![("content-type".to_string(), "text/event-stream".to_string())],
                    body,
                })
            }
        }
    }
}
