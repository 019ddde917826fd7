// Job Domain Model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::input::InputValue;

/// Server-assigned request identifier (opaque)
pub type JobId = String;

/// Queue priority header value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    Low,
    #[default]
    Normal,
}

impl QueuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePriority::Low => "low",
            QueuePriority::Normal => "normal",
        }
    }
}

impl std::fmt::Display for QueuePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueuePriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QueuePriority::Low),
            "normal" => Ok(QueuePriority::Normal),
            other => Err(format!("invalid priority '{}': expected low or normal", other)),
        }
    }
}

/// A job to submit. Consumed by submission.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub endpoint_id: String,
    pub input: Option<InputValue>,
    pub webhook_url: Option<String>,
    pub priority: Option<QueuePriority>,
}

impl JobRequest {
    pub fn new(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: impl Into<InputValue>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Output of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub data: Value,
    pub request_id: JobId,
}
