// Sunra Core - Job lifecycle logic & ports
// NO HTTP library here: every request goes through `port::HttpTransport`

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use config::{ClientConfig, Credentials};
pub use error::{ErrorKind, RateLimit, Result, SunraError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
