// Port Layer - Interfaces for external dependencies

pub mod time_provider; // For deterministic upload file names
pub mod transport;

// Re-exports
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use transport::mocks;
pub use transport::{
    ByteStream, HttpRequest, HttpResponse, HttpTransport, Method, StreamingResponse,
    TransportError,
};
