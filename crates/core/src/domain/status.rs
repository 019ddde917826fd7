// Job Status Domain Model
//
// The queue reports a job as exactly one of IN_QUEUE, IN_PROGRESS, COMPLETED.
// Legal edges only move forward; COMPLETED is terminal.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::job::JobId;
use crate::error::{code, ErrorKind, Result, SunraError};

/// Log level attached to a job log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Stdout,
    Stderr,
    Error,
    Info,
    Warn,
    Debug,
}

/// Log source (the queue only ever reports user logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogSource {
    #[default]
    User,
}

/// One log line emitted by a running job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub message: String,
    pub level: LogLevel,
    #[serde(default)]
    pub source: LogSource,
    /// ISO-8601
    #[serde(default)]
    pub timestamp: String,
}

/// Execution metrics reported on completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(rename = "inference_time", default)]
    pub inference_time_seconds: Option<f64>,
}

/// Failure embedded in a COMPLETED status when `success` is false
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InQueueStatus {
    pub request_id: JobId,
    #[serde(default)]
    pub queue_position: u64,
    pub response_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InProgressStatus {
    pub request_id: JobId,
    pub response_url: String,
    #[serde(default, deserialize_with = "deserialize_logs")]
    pub logs: Vec<LogLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStatus {
    pub request_id: JobId,
    pub response_url: String,
    #[serde(default, deserialize_with = "deserialize_logs")]
    pub logs: Vec<LogLine>,
    #[serde(default)]
    pub metrics: Option<Metrics>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<JobFailure>,
}

fn default_success() -> bool {
    true
}

impl CompletedStatus {
    /// Convert a server-declared failure into a `JobFailed` error
    pub fn failure(&self) -> Option<SunraError> {
        if self.success {
            return None;
        }
        Some(job_failure_error(self.error.as_ref(), &self.request_id))
    }
}

/// Build the `JobFailed` error for a failed completion
pub fn job_failure_error(failure: Option<&JobFailure>, request_id: &str) -> SunraError {
    let mut err = SunraError::new(ErrorKind::JobFailed, code::JOB_FAILED, "Request failed");
    if let Some(failure) = failure {
        if let Some(c) = &failure.code {
            err.code = c.clone();
        }
        if let Some(m) = &failure.message {
            err.message = m.clone();
        }
        err.details = failure.details.clone();
        err.timestamp = failure.timestamp.clone();
    }
    if !request_id.is_empty() {
        err.request_id = Some(request_id.to_string());
    }
    err
}

/// Job status union (keyed by `status`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InQueue(InQueueStatus),
    InProgress(InProgressStatus),
    Completed(CompletedStatus),
}

impl JobStatus {
    pub fn request_id(&self) -> &str {
        match self {
            JobStatus::InQueue(s) => &s.request_id,
            JobStatus::InProgress(s) => &s.request_id,
            JobStatus::Completed(s) => &s.request_id,
        }
    }

    pub fn response_url(&self) -> &str {
        match self {
            JobStatus::InQueue(s) => &s.response_url,
            JobStatus::InProgress(s) => &s.response_url,
            JobStatus::Completed(s) => &s.response_url,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobStatus::Completed(_))
    }

    /// Position in the forward-only lifecycle
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::InQueue(_) => 0,
            JobStatus::InProgress(_) => 1,
            JobStatus::Completed(_) => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InQueue(_) => "IN_QUEUE",
            JobStatus::InProgress(_) => "IN_PROGRESS",
            JobStatus::Completed(_) => "COMPLETED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the best-known status of one job and rejects regressions
#[derive(Debug, Default)]
pub struct StatusTracker {
    current: Option<JobStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed status
    ///
    /// Repeating the current state is fine; moving back to an earlier one
    /// (or anywhere after COMPLETED) is a protocol error.
    pub fn observe(&mut self, status: &JobStatus) -> Result<()> {
        if let Some(previous) = &self.current {
            let regressed = status.rank() < previous.rank();
            let after_terminal = previous.is_completed() && !status.is_completed();
            if regressed || after_terminal {
                return Err(SunraError::protocol(
                    code::STATUS_REGRESSION,
                    format!("Invalid job status transition: {} -> {}", previous, status),
                )
                .with_request_id(status.request_id()));
            }
        }
        self.current = Some(status.clone());
        Ok(())
    }

    pub fn current(&self) -> Option<&JobStatus> {
        self.current.as_ref()
    }
}

/// Accepts `null`, an array of log lines, or a newline-joined string
fn deserialize_logs<'de, D>(deserializer: D) -> std::result::Result<Vec<LogLine>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawLogs {
        Lines(Vec<LogLine>),
        Text(String),
    }

    let raw: Option<RawLogs> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None => Vec::new(),
        Some(RawLogs::Lines(lines)) => lines,
        Some(RawLogs::Text(text)) => text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| LogLine {
                message: line.to_string(),
                level: LogLevel::Info,
                source: LogSource::User,
                timestamp: String::new(),
            })
            .collect(),
    })
}
