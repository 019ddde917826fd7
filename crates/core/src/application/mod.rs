// Application Layer - Job lifecycle use cases over the transport port

pub mod abort;
pub mod constants;
pub mod dispatch;
pub mod error_mapping;
pub mod poller;
pub mod queue;
pub mod storage;
pub mod stream;
pub mod subscribe;
pub mod urls;

#[cfg(test)]
mod testing;

// Re-exports
pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use dispatch::RequestDispatcher;
pub use error_mapping::{field_errors, field_errors_for, FieldError};
pub use poller::{PollOptions, QueueUpdateCallback, StatusPoller};
pub use queue::{QueueClient, SubmitOptions};
pub use storage::StorageClient;
pub use stream::{
    JobStream, StreamEvent, StreamEventKind, StreamOptions, StreamPayload, StreamingClient,
};
pub use subscribe::{
    EnqueueCallback, ErrorCallback, SubscribeMode, SubscribeOptions, Subscriber,
};
pub use urls::QueueUrls;
