//! Event-Stream Subscriber
//!
//! Opens one streaming request and turns its body into payloads:
//! - `text/event-stream` bodies are decoded incrementally, one JSON payload per event
//! - any other body is an opaque chunk stream, each chunk one payload
//!
//! A single pump task reads the body. It feeds the `on(kind, ..)` listeners
//! and, once the `futures::Stream` view has been polled, an internal channel
//! behind it, in arrival order. Callers that only use listeners or `done()`
//! buffer nothing. The pump starts lazily, so listeners attached before the
//! first `start()`/`done()`/poll see every event. Dropping the [`JobStream`]
//! aborts it.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{self, BoxStream};
use futures::{future, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::abort::{abort_pair, AbortHandle, AbortSignal};
use super::constants::{header, CONTENT_TYPE_EVENT_STREAM, DEFAULT_STREAM_IDLE_TIMEOUT};
use super::dispatch::RequestDispatcher;
use super::error_mapping::{from_response, from_transport};
use super::storage::StorageClient;
use crate::domain::status::job_failure_error;
use crate::domain::{InputValue, JobFailure};
use crate::error::{code, Result, SunraError};
use crate::port::{ByteStream, HttpRequest, Method, StreamingResponse, TransportError};

/// Named stream events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    Data,
    Error,
    Done,
}

/// One decoded payload
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    /// Parsed `data:` frame of an event stream
    Json(Value),
    /// Raw chunk of a non-event-stream body
    Bytes(Vec<u8>),
}

impl StreamPayload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            StreamPayload::Json(value) => Some(value),
            StreamPayload::Bytes(_) => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            StreamPayload::Json(value) => Some(value),
            StreamPayload::Bytes(_) => None,
        }
    }
}

/// Event passed to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Data(StreamPayload),
    Error(SunraError),
    /// Last payload seen, if any
    Done(Option<StreamPayload>),
}

impl StreamEvent {
    pub fn kind(&self) -> StreamEventKind {
        match self {
            StreamEvent::Data(_) => StreamEventKind::Data,
            StreamEvent::Error(_) => StreamEventKind::Error,
            StreamEvent::Done(_) => StreamEventKind::Done,
        }
    }
}

pub type StreamListener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Stream request options
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Full target URL (takes precedence over `endpoint_id`)
    pub url: Option<String>,
    pub endpoint_id: Option<String>,
    pub input: Option<InputValue>,
    /// Longest allowed gap between two reads
    pub idle_timeout: Duration,
    pub method: Method,
    /// Aborting this also aborts the stream
    pub abort: Option<AbortSignal>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            url: None,
            endpoint_id: None,
            input: None,
            idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
            method: Method::Post,
            abort: None,
        }
    }
}

impl StreamOptions {
    pub fn for_endpoint(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: Some(endpoint_id.into()),
            ..Default::default()
        }
    }

    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: impl Into<InputValue>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }
}

/// Creates [`JobStream`]s
#[derive(Debug, Clone)]
pub struct StreamingClient {
    dispatcher: RequestDispatcher,
    storage: StorageClient,
}

impl StreamingClient {
    pub fn new(dispatcher: RequestDispatcher, storage: StorageClient) -> Self {
        Self {
            dispatcher,
            storage,
        }
    }

    /// Prepare a stream; file inputs are uploaded before this returns
    pub async fn stream(&self, options: StreamOptions) -> Result<JobStream> {
        let url = match (&options.url, &options.endpoint_id) {
            (Some(url), _) => url.clone(),
            (None, Some(endpoint_id)) => self.dispatcher.urls().submit(endpoint_id, None)?,
            (None, None) => {
                return Err(SunraError::validation(
                    code::MISSING_TARGET,
                    "Either url or endpoint_id is required to open a stream",
                ))
            }
        };
        let body = match options.input {
            Some(input) => Some(self.storage.transform_input(input).await?),
            None => None,
        };
        let request = self
            .dispatcher
            .request(options.method, &url, body.as_ref())?
            .header(header::ACCEPT, CONTENT_TYPE_EVENT_STREAM);

        Ok(JobStream::new(
            self.dispatcher.clone(),
            request,
            options.idle_timeout,
            options.abort,
        ))
    }
}

/// How a stream settled
#[derive(Debug, Clone)]
enum Outcome {
    Completed(Option<StreamPayload>),
    Aborted(Option<StreamPayload>),
    Failed(SunraError),
}

/// Internal abort handle plus an optional caller-supplied signal
#[derive(Debug, Clone)]
struct AbortWatch {
    internal: AbortSignal,
    external: Option<AbortSignal>,
}

impl AbortWatch {
    fn is_aborted(&self) -> bool {
        self.internal.is_aborted() || self.external.as_ref().is_some_and(AbortSignal::is_aborted)
    }

    async fn aborted(&self) {
        match &self.external {
            Some(external) => {
                tokio::select! {
                    _ = self.internal.aborted() => {},
                    _ = external.aborted() => {},
                }
            }
            None => self.internal.aborted().await,
        }
    }
}

struct Shared {
    listeners: Mutex<Vec<(StreamEventKind, StreamListener)>>,
    current: Mutex<Option<StreamPayload>>,
    /// Set on the first poll of the iterator view
    iterating: AtomicBool,
    abort: AbortWatch,
}

impl Shared {
    /// Invoke matching listeners; stops as soon as an abort is seen
    fn emit(&self, event: &StreamEvent) {
        let kind = event.kind();
        let listeners: Vec<StreamListener> = lock(&self.listeners)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            if self.abort.is_aborted() {
                return;
            }
            listener(event);
        }
    }

    fn current(&self) -> Option<StreamPayload> {
        lock(&self.current).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PendingStart {
    dispatcher: RequestDispatcher,
    request: HttpRequest,
    idle_timeout: Duration,
}

/// Handle to one streaming request
pub struct JobStream {
    shared: Arc<Shared>,
    pending: Mutex<Option<PendingStart>>,
    items: mpsc::UnboundedReceiver<StreamPayload>,
    items_tx: Mutex<Option<mpsc::UnboundedSender<StreamPayload>>>,
    outcome_rx: watch::Receiver<Option<Outcome>>,
    outcome_tx: Mutex<Option<watch::Sender<Option<Outcome>>>>,
    abort: AbortHandle,
}

impl JobStream {
    fn new(
        dispatcher: RequestDispatcher,
        request: HttpRequest,
        idle_timeout: Duration,
        external: Option<AbortSignal>,
    ) -> Self {
        let (abort, internal) = abort_pair();
        let (items_tx, items) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                listeners: Mutex::new(Vec::new()),
                current: Mutex::new(None),
                iterating: AtomicBool::new(false),
                abort: AbortWatch { internal, external },
            }),
            pending: Mutex::new(Some(PendingStart {
                dispatcher,
                request,
                idle_timeout,
            })),
            items,
            items_tx: Mutex::new(Some(items_tx)),
            outcome_rx,
            outcome_tx: Mutex::new(Some(outcome_tx)),
            abort,
        }
    }

    /// Register a listener for one event kind
    pub fn on<F>(&self, kind: StreamEventKind, listener: F) -> &Self
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        lock(&self.shared.listeners).push((kind, Arc::new(listener)));
        self
    }

    /// Open the connection (idempotent)
    pub fn start(&self) {
        let Some(pending) = lock(&self.pending).take() else {
            return;
        };
        let (Some(items), Some(outcome)) = (lock(&self.items_tx).take(), lock(&self.outcome_tx).take())
        else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        tokio::spawn(pump(shared, pending, items, outcome));
    }

    /// Wait for the stream to settle
    ///
    /// Resolves with the last payload on completion, and with the best-known
    /// payload when aborted. Server or protocol failures are errors.
    pub async fn done(&self) -> Result<Option<StreamPayload>> {
        self.start();
        let mut rx = self.outcome_rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Outcome::Completed(payload)) | Some(Outcome::Aborted(payload)) => Ok(payload),
            Some(Outcome::Failed(err)) => Err(err),
            None => Err(SunraError::unknown("Stream task ended without an outcome")),
        }
    }

    /// Abort the request; no-op once the stream has settled
    pub fn abort(&self, reason: Option<&str>) {
        if self.outcome_rx.borrow().is_some() {
            return;
        }
        self.abort.abort(reason);
    }

    /// Signal fired by [`JobStream::abort`]
    pub fn signal(&self) -> AbortSignal {
        self.abort.signal()
    }

    /// Best-known payload so far
    pub fn current(&self) -> Option<StreamPayload> {
        self.shared.current()
    }
}

impl Stream for JobStream {
    type Item = StreamPayload;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.shared.iterating.store(true, Ordering::Release);
        this.start();
        this.items.poll_recv(cx)
    }
}

impl Drop for JobStream {
    fn drop(&mut self) {
        self.abort.abort(Some("stream handle dropped"));
    }
}

impl std::fmt::Debug for JobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStream")
            .field("aborted", &self.shared.abort.is_aborted())
            .finish_non_exhaustive()
    }
}

enum ReadEnd {
    Finished,
    Aborted,
}

/// Failure while reading frames off the body
#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("no data within the idle timeout")]
    Idle,
    #[error(transparent)]
    Transport(TransportError),
    #[error("{0}")]
    Payload(SunraError),
}

impl ReadError {
    fn into_error(self, idle_timeout: Duration) -> SunraError {
        match self {
            ReadError::Idle => idle_timeout_error(idle_timeout),
            ReadError::Transport(err) => from_transport(err),
            ReadError::Payload(err) => err,
        }
    }
}

type FrameStream = BoxStream<'static, std::result::Result<StreamPayload, ReadError>>;

async fn pump(
    shared: Arc<Shared>,
    pending: PendingStart,
    items: mpsc::UnboundedSender<StreamPayload>,
    outcome_tx: watch::Sender<Option<Outcome>>,
) {
    let url = pending.request.url.clone();
    let outcome = match read_stream(&shared, pending, &items).await {
        Ok(ReadEnd::Aborted) => {
            debug!(url = %url, "Stream aborted");
            Outcome::Aborted(shared.current())
        }
        Ok(ReadEnd::Finished) => {
            let last = shared.current();
            match last.as_ref().and_then(payload_failure) {
                Some(err) => Outcome::Failed(err),
                None => {
                    info!(url = %url, "Stream completed");
                    shared.emit(&StreamEvent::Done(last.clone()));
                    Outcome::Completed(last)
                }
            }
        }
        Err(err) if shared.abort.is_aborted() => {
            debug!(url = %url, error = %err, "Stream error after abort ignored");
            Outcome::Aborted(shared.current())
        }
        Err(err) => Outcome::Failed(err),
    };

    if let Outcome::Failed(err) = &outcome {
        warn!(url = %url, error = %err, "Stream failed");
        shared.emit(&StreamEvent::Error(err.clone()));
    }
    // closing the channel ends the iterator after it drains
    drop(items);
    outcome_tx.send_replace(Some(outcome));
}

async fn read_stream(
    shared: &Shared,
    pending: PendingStart,
    items: &mpsc::UnboundedSender<StreamPayload>,
) -> Result<ReadEnd> {
    let PendingStart {
        dispatcher,
        request,
        idle_timeout,
    } = pending;

    let response = tokio::select! {
        biased;
        _ = shared.abort.aborted() => return Ok(ReadEnd::Aborted),
        response = dispatcher.send_streaming(request) => response?,
    };

    if !response.is_success() {
        let collected = tokio::select! {
            biased;
            _ = shared.abort.aborted() => return Ok(ReadEnd::Aborted),
            collected = tokio::time::timeout(idle_timeout, response.collect()) => collected,
        };
        return match collected {
            Ok(Ok(response)) => Err(from_response(&response)),
            Ok(Err(err)) => Err(from_transport(err)),
            Err(_) => Err(idle_timeout_error(idle_timeout)),
        };
    }

    let is_event_stream = response
        .header(header::CONTENT_TYPE)
        .is_some_and(|ct| ct.trim_start().starts_with(CONTENT_TYPE_EVENT_STREAM));
    debug!(event_stream = is_event_stream, "Stream opened");

    let StreamingResponse { body, .. } = response;
    let body = guard_idle(body, idle_timeout);
    let mut frames = if is_event_stream {
        event_frames(body)
    } else {
        body.map(|chunk| chunk.map(StreamPayload::Bytes)).boxed()
    };

    loop {
        let read = tokio::select! {
            biased;
            _ = shared.abort.aborted() => return Ok(ReadEnd::Aborted),
            read = frames.next() => read,
        };
        let payload = match read {
            None => break,
            Some(Err(ReadError::Transport(TransportError::Aborted))) if shared.abort.is_aborted() => {
                return Ok(ReadEnd::Aborted)
            }
            Some(Err(err)) => return Err(err.into_error(idle_timeout)),
            Some(Ok(payload)) => payload,
        };

        publish(shared, items, payload);
        if shared.abort.is_aborted() {
            return Ok(ReadEnd::Aborted);
        }
    }
    Ok(ReadEnd::Finished)
}

/// Body chunks, failing with [`ReadError::Idle`] when one read outlasts `idle_timeout`
fn guard_idle(
    body: ByteStream,
    idle_timeout: Duration,
) -> BoxStream<'static, std::result::Result<Vec<u8>, ReadError>> {
    stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle_timeout, body.next()).await {
            Err(_) => Some((Err(ReadError::Idle), None)),
            Ok(None) => None,
            Ok(Some(Err(err))) => Some((Err(ReadError::Transport(err)), None)),
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
        }
    })
    .boxed()
}

/// One JSON payload per event; events without data (keep-alives) are skipped
fn event_frames(body: BoxStream<'static, std::result::Result<Vec<u8>, ReadError>>) -> FrameStream {
    body.eventsource()
        .filter_map(|event| {
            future::ready(match event {
                Ok(event) if event.data.is_empty() => None,
                Ok(event) => Some(parse_frame(&event.data).map_err(ReadError::Payload)),
                Err(EventStreamError::Transport(err)) => Some(Err(err)),
                Err(err) => Some(Err(ReadError::Payload(SunraError::protocol(
                    code::INVALID_PAYLOAD,
                    format!("Malformed event stream: {}", err),
                )))),
            })
        })
        .boxed()
}

fn publish(shared: &Shared, items: &mpsc::UnboundedSender<StreamPayload>, payload: StreamPayload) {
    *lock(&shared.current) = Some(payload.clone());
    if shared.iterating.load(Ordering::Acquire) {
        // the iterator side may have been dropped; listeners still get the event
        let _ = items.send(payload.clone());
    }
    shared.emit(&StreamEvent::Data(payload));
}

fn parse_frame(data: &str) -> Result<StreamPayload> {
    serde_json::from_str(data).map(StreamPayload::Json).map_err(|e| {
        SunraError::protocol(
            code::INVALID_PAYLOAD,
            format!("Malformed event stream frame: {}", e),
        )
    })
}

fn idle_timeout_error(idle_timeout: Duration) -> SunraError {
    SunraError::protocol(
        code::STREAM_IDLE_TIMEOUT,
        format!(
            "Event stream timed out after {} seconds with no messages",
            idle_timeout.as_secs()
        ),
    )
}

/// A final payload reporting `success: false` (or status `FAILED`)
fn payload_failure(payload: &StreamPayload) -> Option<SunraError> {
    let Value::Object(map) = payload.as_json()? else {
        return None;
    };
    let failed = map.get("success") == Some(&Value::Bool(false))
        || map.get("status").and_then(Value::as_str) == Some("FAILED");
    if !failed {
        return None;
    }
    let failure: Option<JobFailure> = map
        .get("error")
        .and_then(|e| serde_json::from_value(e.clone()).ok());
    let request_id = map.get("request_id").and_then(Value::as_str).unwrap_or_default();
    Some(job_failure_error(failure.as_ref(), request_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{dispatcher, queue_client};
    use crate::error::ErrorKind;
    use crate::port::mocks::{MockReply, MockTransport, StreamStep};
    use serde_json::json;

    fn client(transport: &MockTransport) -> StreamingClient {
        StreamingClient::new(dispatcher(transport), queue_client(transport).storage().clone())
    }

    fn frame(value: Value) -> StreamStep {
        StreamStep::Chunk(format!("data: {}\n\n", value).into_bytes())
    }

    /// Records `kind:payload` strings for every event
    fn record(stream: &JobStream) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in [StreamEventKind::Data, StreamEventKind::Error, StreamEventKind::Done] {
            let sink = Arc::clone(&log);
            stream.on(kind, move |event| {
                let entry = match event {
                    StreamEvent::Data(StreamPayload::Json(v)) => format!("data:{}", v),
                    StreamEvent::Data(StreamPayload::Bytes(b)) => format!("bytes:{:?}", b),
                    StreamEvent::Error(e) => format!("error:{}", e.code),
                    StreamEvent::Done(_) => "done".to_string(),
                };
                sink.lock().unwrap().push(entry);
            });
        }
        log
    }

    #[tokio::test(start_paused = true)]
    async fn test_sse_payloads_reach_listeners_and_iterator() {
        let transport = MockTransport::new(|_| {
            MockReply::sse(vec![json!({"step": 1}), json!({"step": 2}), json!({"step": 3})])
        });
        let mut stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm").with_input(json!({"prompt": "hi"})))
            .await
            .unwrap();
        let log = record(&stream);

        let mut seen = Vec::new();
        while let Some(payload) = stream.next().await {
            seen.push(payload.into_json().unwrap()["step"].as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);

        let last = stream.done().await.unwrap();
        assert_eq!(last, Some(StreamPayload::Json(json!({"step": 3}))));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                r#"data:{"step":1}"#,
                r#"data:{"step":2}"#,
                r#"data:{"step":3}"#,
                "done"
            ]
        );

        let requests = transport.requests();
        let req = &requests[0].request;
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.url, "https://api.sunra.ai/v1/queue/sunra/llm");
        assert_eq!(req.header_value("accept"), Some(CONTENT_TYPE_EVENT_STREAM));
        assert_eq!(requests[0].json_body().unwrap(), json!({"prompt": "hi"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_resolves_done_with_snapshot() {
        let transport = MockTransport::new(|_| {
            MockReply::sse_steps(vec![
                frame(json!({"partial": "a"})),
                StreamStep::Delay(Duration::from_secs(1)),
                frame(json!({"partial": "ab"})),
                StreamStep::Hang,
            ])
        });
        let mut stream = client(&transport)
            .stream(StreamOptions::for_url("https://api.sunra.ai/v1/queue/sunra/llm"))
            .await
            .unwrap();
        let log = record(&stream);

        let first = stream.next().await.unwrap();
        assert_eq!(first, StreamPayload::Json(json!({"partial": "a"})));

        stream.abort(Some("user cancelled"));
        assert!(stream.signal().is_aborted());
        assert_eq!(stream.signal().reason().as_deref(), Some("user cancelled"));

        let done = stream.done().await.unwrap();
        assert_eq!(done, Some(StreamPayload::Json(json!({"partial": "a"}))));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*log.lock().unwrap(), vec![r#"data:{"partial":"a"}"#]);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_abort_signal() {
        let transport = MockTransport::new(|_| MockReply::sse_steps(vec![StreamStep::Hang]));
        let (handle, signal) = crate::application::abort::abort_pair();
        let stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm").with_abort_signal(signal))
            .await
            .unwrap();
        stream.start();

        handle.abort(None);
        assert_eq!(stream.done().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_is_an_error() {
        let transport = MockTransport::new(|_| {
            MockReply::sse_steps(vec![
                frame(json!({"n": 1})),
                StreamStep::Delay(Duration::from_secs(20)),
                frame(json!({"n": 2})),
            ])
        });
        let stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm"))
            .await
            .unwrap();
        let log = record(&stream);

        let err = stream.done().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert_eq!(err.code, code::STREAM_IDLE_TIMEOUT);
        assert_eq!(
            *log.lock().unwrap(),
            vec![r#"data:{"n":1}"#.to_string(), format!("error:{}", code::STREAM_IDLE_TIMEOUT)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_steady_stream_is_fine() {
        let transport = MockTransport::new(|_| {
            MockReply::sse_steps(vec![
                frame(json!({"n": 1})),
                StreamStep::Delay(Duration::from_secs(10)),
                frame(json!({"n": 2})),
                StreamStep::Delay(Duration::from_secs(10)),
                frame(json!({"n": 3})),
            ])
        });
        let stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm"))
            .await
            .unwrap();

        let last = stream.done().await.unwrap();
        assert_eq!(last, Some(StreamPayload::Json(json!({"n": 3}))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_binary_body_is_chunked() {
        let transport = MockTransport::new(|_| MockReply::Stream {
            status: 200,
            headers: vec![("content-type".to_string(), "audio/mpeg".to_string())],
            steps: vec![
                StreamStep::Chunk(vec![1, 2]),
                StreamStep::Chunk(vec![3]),
            ],
        });
        let stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/tts"))
            .await
            .unwrap();
        let log = record(&stream);

        let last = stream.done().await.unwrap();
        assert_eq!(last, Some(StreamPayload::Bytes(vec![3])));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["bytes:[1, 2]", "bytes:[3]", "done"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_ok_response_is_mapped() {
        let transport = MockTransport::new(|_| {
            MockReply::json(422, json!({"error": {"code": "BAD_PROMPT", "message": "empty prompt"}}))
        });
        let mut stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm"))
            .await
            .unwrap();
        let log = record(&stream);

        assert!(stream.next().await.is_none());
        let err = stream.done().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.code, "BAD_PROMPT");
        assert_eq!(*log.lock().unwrap(), vec!["error:BAD_PROMPT"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_final_payload_is_an_error() {
        let transport = MockTransport::new(|_| {
            MockReply::sse(vec![
                json!({"status": "IN_PROGRESS"}),
                json!({"request_id": "r1", "success": false, "error": {"code": "OOM", "message": "out of memory"}}),
            ])
        });
        let stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm"))
            .await
            .unwrap();

        let err = stream.done().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::JobFailed);
        assert_eq!(err.code, "OOM");
        assert_eq!(err.request_id.as_deref(), Some("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_protocol_error() {
        let transport = MockTransport::new(|_| {
            MockReply::sse_steps(vec![
                StreamStep::Chunk(b"data: {not json}\n\n".to_vec()),
                frame(json!({"never": true})),
            ])
        });
        let stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm"))
            .await
            .unwrap();
        let log = record(&stream);

        let err = stream.done().await.unwrap_err();
        assert_eq!(err.code, code::INVALID_PAYLOAD);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_target() {
        let transport = MockTransport::new(|_| MockReply::empty(200));
        let err = client(&transport)
            .stream(StreamOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, code::MISSING_TARGET);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_waits_for_start() {
        let transport = MockTransport::new(|_| MockReply::sse(vec![json!({"ok": true})]));
        let stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(transport.requests().is_empty());

        stream.start();
        stream.start();
        assert_eq!(
            stream.done().await.unwrap(),
            Some(StreamPayload::Json(json!({"ok": true})))
        );
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_split_across_chunks_with_keep_alives() {
        let transport = MockTransport::new(|_| {
            MockReply::sse_steps(vec![
                StreamStep::Chunk(b": keep-alive\n\n".to_vec()),
                StreamStep::Chunk(b"da".to_vec()),
                StreamStep::Chunk("ta: {\"word\": \"héllo\"".as_bytes().to_vec()),
                StreamStep::Chunk(b"}\r\n\r\n".to_vec()),
                StreamStep::Chunk(b"event: status\ndata: {\"a\":\ndata: 1}\n\n".to_vec()),
            ])
        });
        let mut stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm"))
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(payload) = stream.next().await {
            seen.push(payload.into_json().unwrap());
        }
        assert_eq!(seen, vec![json!({"word": "héllo"}), json!({"a": 1})]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_only_consumer_buffers_nothing() {
        let transport = MockTransport::new(|_| MockReply::Stream {
            status: 200,
            headers: vec![("content-type".to_string(), "audio/mpeg".to_string())],
            steps: (0..1000).map(|_| StreamStep::Chunk(vec![0u8; 1024])).collect(),
        });
        let mut stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/tts"))
            .await
            .unwrap();
        let received = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&received);
        stream.on(StreamEventKind::Data, move |event| {
            if let StreamEvent::Data(StreamPayload::Bytes(bytes)) = event {
                *sink.lock().unwrap() += bytes.len();
            }
        });

        stream.done().await.unwrap();
        assert_eq!(*received.lock().unwrap(), 1000 * 1024);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_pending_until_settled() {
        let transport = MockTransport::new(|_| MockReply::sse_steps(vec![StreamStep::Hang]));
        let stream = client(&transport)
            .stream(StreamOptions::for_endpoint("sunra/llm"))
            .await
            .unwrap();

        let mut done = tokio_test::task::spawn(stream.done());
        tokio_test::assert_pending!(done.poll());
        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio_test::assert_pending!(done.poll());

        stream.abort(Some("stop"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let settled = tokio_test::assert_ready!(done.poll());
        assert_eq!(settled.unwrap(), None);
    }
}
