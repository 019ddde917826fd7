// Shared fixtures for application-layer unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use super::dispatch::RequestDispatcher;
use super::queue::QueueClient;
use super::storage::StorageClient;
use crate::config::{ClientConfig, Credentials};
use crate::port::mocks::{MockReply, MockTransport};
use crate::port::time_provider::mocks::FixedTimeProvider;
use crate::port::HttpRequest;

pub fn dispatcher(transport: &MockTransport) -> RequestDispatcher {
    let config = ClientConfig::default().with_credentials(Credentials::from_static("test-key"));
    RequestDispatcher::new(Arc::new(config), Arc::new(transport.clone()))
}

pub fn queue_client(transport: &MockTransport) -> QueueClient {
    let dispatcher = dispatcher(transport);
    let storage = StorageClient::new(dispatcher.clone(), Arc::new(FixedTimeProvider::new(0)));
    QueueClient::new(dispatcher, storage)
}

pub fn in_queue(id: &str, position: u64) -> Value {
    json!({
        "status": "IN_QUEUE",
        "request_id": id,
        "queue_position": position,
        "response_url": format!("https://api.sunra.ai/v1/queue/requests/{}", id),
    })
}

pub fn in_progress(id: &str) -> Value {
    json!({
        "status": "IN_PROGRESS",
        "request_id": id,
        "response_url": format!("https://api.sunra.ai/v1/queue/requests/{}", id),
        "logs": [],
    })
}

pub fn completed(id: &str) -> Value {
    json!({
        "status": "COMPLETED",
        "request_id": id,
        "response_url": format!("https://api.sunra.ai/v1/queue/requests/{}", id),
        "logs": [],
        "metrics": {"inference_time": 0.5},
    })
}

/// Replies handed out in order; `fallback` once the script runs out
pub struct Script {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
}

impl Script {
    pub fn new(replies: Vec<MockReply>, fallback: MockReply) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback,
        })
    }

    pub fn next(&self) -> MockReply {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Route by URL fragment: the first matching script answers
pub fn routed(routes: Vec<(&'static str, Arc<Script>)>) -> MockTransport {
    MockTransport::new(move |req: &HttpRequest| {
        routes
            .iter()
            .find(|(fragment, _)| req.url.contains(fragment))
            .map(|(_, script)| script.next())
            .unwrap_or_else(|| MockReply::empty(404))
    })
}
