//! Sunra Client - Rust SDK for the Sunra job queue
//!
//! Submit jobs to hosted model endpoints, then wait for them by polling,
//! by following a server-sent event stream, or both through [`SunraClient::subscribe`].
//!
//! # Example
//!
//! ```no_run
//! use sunra_client::{SubscribeOptions, SunraClient};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SunraClient::from_env()?;
//!
//!     let result = client
//!         .subscribe(
//!             "sunra/lcm/text-to-image",
//!             SubscribeOptions::default()
//!                 .with_input(json!({"prompt": "a lighthouse at dusk"}))
//!                 .with_timeout(Duration::from_secs(120))
//!                 .on_queue_update(|status| println!("{}", status.as_str())),
//!         )
//!         .await?;
//!
//!     if let Some(result) = result {
//!         println!("{} -> {}", result.request_id, result.data);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod error;
pub mod global;
mod settings;

pub use client::SunraClient;
pub use error::{SdkError, SdkResult};
pub use settings::{default_config_path, ClientSettings, CONFIG_FILE_NAME};

pub use sunra_core::application::{
    abort_pair, field_errors, field_errors_for, AbortHandle, AbortSignal, FieldError, JobStream,
    PollOptions, StreamEvent, StreamEventKind, StreamOptions, StreamPayload, SubmitOptions,
    SubscribeMode, SubscribeOptions,
};
pub use sunra_core::config::{ClientConfig, Credentials};
pub use sunra_core::domain::{
    CompletedStatus, FileInput, InQueueStatus, InProgressStatus, InputValue, JobResult, JobStatus,
    LogLine, QueuePriority,
};
pub use sunra_core::error::{ErrorKind, RateLimit, Result, SunraError};
