// Client constants (no magic values in the lifecycle code)
use std::time::Duration;

/// Delay between two status polls (1s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Consecutive status-call failures tolerated before the poller gives up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum gap between two stream chunks (15s)
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Content type used when a file does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";

/// Header names of the queue protocol
pub mod header {
    pub const AUTHORIZATION: &str = "Authorization";
    pub const ACCEPT: &str = "Accept";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const USER_AGENT: &str = "User-Agent";
    pub const QUEUE_PRIORITY: &str = "x-sunra-queue-priority";
    pub const TARGET_URL: &str = "x-sunra-target-url";
    pub const REQUEST_ID: &str = "x-request-id";
    pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
    pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
    pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
}
