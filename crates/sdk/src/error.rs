//! SDK setup errors
//!
//! Job operations return [`sunra_core::SunraError`]; this type only covers
//! building a client.

use sunra_core::port::TransportError;
use thiserror::Error;

/// Result of client construction
pub type SdkResult<T> = std::result::Result<T, SdkError>;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid setting `{key}`: {message}")]
    InvalidSetting { key: &'static str, message: String },

    #[error("Failed to create HTTP transport: {0}")]
    Transport(#[from] TransportError),
}
