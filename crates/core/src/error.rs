// Central Error Type for the Client
//
// Every failure origin (structured API bodies, bare HTTP failures, transport
// exceptions, local faults) is normalized into one `SunraError` before it
// reaches a caller or a caller-supplied callback.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Structured 4xx business error (may carry field-level details)
    Validation,
    /// Non-2xx without a structured body, or a network failure
    Http,
    /// File transfer failure
    Upload,
    /// Local deadline exceeded
    ClientTimeout,
    /// Unexpected status transition or malformed stream frame
    Protocol,
    /// Server declared the job itself failed
    JobFailed,
    /// Catch-all for local exceptions
    Unknown,
}

impl ErrorKind {
    /// Default `type` string when the server did not send one
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Http => "network_error",
            ErrorKind::Upload => "upload_error",
            ErrorKind::ClientTimeout => "client_timeout",
            ErrorKind::Protocol => "protocol_error",
            ErrorKind::JobFailed => "job_failed",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate limit triple extracted from `x-ratelimit-*` headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds when the window resets
    pub reset: u64,
}

/// Normalized client error
#[derive(Error, Debug, Clone, PartialEq)]
pub struct SunraError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    /// `type` as sent by the server, if any
    pub server_type: Option<String>,
    pub details: Option<Value>,
    pub request_id: Option<String>,
    pub rate_limit: Option<RateLimit>,
    pub timestamp: Option<String>,
}

impl SunraError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            server_type: None,
            details: None,
            request_id: None,
            rate_limit: None,
            timestamp: None,
        }
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upload, code::UPLOAD_FAILED, message)
    }

    pub fn client_timeout(timeout_ms: u128) -> Self {
        Self::new(
            ErrorKind::ClientTimeout,
            code::CLIENT_TIMEOUT,
            format!(
                "Client timed out waiting for the request to complete after {}ms",
                timeout_ms
            ),
        )
    }

    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, code, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, code::UNKNOWN, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// The normalized `type` field: server-sent type, else the kind's default
    pub fn error_type(&self) -> &str {
        self.server_type.as_deref().unwrap_or(self.kind.as_str())
    }

    /// JSON shape matching the API error envelope
    pub fn to_json(&self) -> Value {
        let mut error = serde_json::Map::new();
        error.insert("type".into(), Value::String(self.error_type().to_string()));
        error.insert("code".into(), Value::String(self.code.clone()));
        error.insert("message".into(), Value::String(self.message.clone()));
        if let Some(details) = &self.details {
            error.insert("details".into(), details.clone());
        }

        let mut root = serde_json::Map::new();
        root.insert("error".into(), Value::Object(error));
        if let Some(timestamp) = &self.timestamp {
            root.insert("timestamp".into(), Value::String(timestamp.clone()));
        }
        if let Some(request_id) = &self.request_id {
            root.insert("request_id".into(), Value::String(request_id.clone()));
        }
        if let Some(rate_limit) = &self.rate_limit {
            root.insert(
                "rate_limit".into(),
                serde_json::to_value(rate_limit).unwrap_or(Value::Null),
            );
        }
        Value::Object(root)
    }
}

impl std::fmt::Display for SunraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.code.is_empty() {
            write!(f, "[{}] ", self.code)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(request_id) = &self.request_id {
            write!(f, " (Request: {})", request_id)?;
        }
        Ok(())
    }
}

impl From<serde_json::Error> for SunraError {
    fn from(err: serde_json::Error) -> Self {
        SunraError::new(ErrorKind::Protocol, code::INVALID_PAYLOAD, err.to_string())
    }
}

/// Error codes produced locally (server codes pass through untouched)
pub mod code {
    pub const UNKNOWN: &str = "unknown";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const NETWORK_TIMEOUT: &str = "NETWORK_TIMEOUT";
    pub const CLIENT_TIMEOUT: &str = "CLIENT_TIMEOUT";
    pub const UPLOAD_FAILED: &str = "UPLOAD_FAILED";
    pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
    pub const INVALID_ENDPOINT_ID: &str = "INVALID_ENDPOINT_ID";
    pub const INVALID_URL: &str = "INVALID_URL";
    pub const MISSING_TARGET: &str = "MISSING_TARGET";
    pub const STATUS_REGRESSION: &str = "STATUS_REGRESSION";
    pub const STREAM_IDLE_TIMEOUT: &str = "STREAM_IDLE_TIMEOUT";
    pub const STREAM_INCOMPLETE: &str = "STREAM_INCOMPLETE";
    pub const EMPTY_BODY: &str = "EMPTY_BODY";
    pub const JOB_FAILED: &str = "JOB_FAILED";
}

/// Result type alias using SunraError
pub type Result<T> = std::result::Result<T, SunraError>;
