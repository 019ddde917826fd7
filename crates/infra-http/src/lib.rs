// Sunra Infrastructure - HTTP Adapter
// Implements: HttpTransport over reqwest (rustls)

mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;
