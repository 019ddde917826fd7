// Client Configuration Snapshot
//
// Immutable once built; shared by every operation of one client via Arc.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the API key
pub const CREDENTIALS_ENV: &str = "SUNRA_KEY";

/// Default REST root (storage endpoints live here)
pub const DEFAULT_REST_BASE_URL: &str = "https://api.sunra.ai/v1";

/// Default queue root
pub const DEFAULT_QUEUE_BASE_URL: &str = "https://api.sunra.ai/v1/queue";

/// Default per-request timeout applied by the HTTP transport
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

type CredentialsResolver = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Where the API key comes from
#[derive(Clone, Default)]
pub enum Credentials {
    #[default]
    None,
    Static(String),
    /// Resolved at the start of every request
    Resolver(CredentialsResolver),
}

impl Credentials {
    pub fn from_static(key: impl Into<String>) -> Self {
        Credentials::Static(key.into())
    }

    pub fn from_fn<F>(resolver: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Credentials::Resolver(Arc::new(resolver))
    }

    /// Resolver reading `SUNRA_KEY`
    pub fn from_env() -> Self {
        Self::from_fn(|| std::env::var(CREDENTIALS_ENV).ok().filter(|k| !k.is_empty()))
    }

    pub fn resolve(&self) -> Option<String> {
        match self {
            Credentials::None => None,
            Credentials::Static(key) => Some(key.clone()),
            Credentials::Resolver(resolver) => resolver(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print the key itself
        match self {
            Credentials::None => f.write_str("Credentials::None"),
            Credentials::Static(_) => f.write_str("Credentials::Static(***)"),
            Credentials::Resolver(_) => f.write_str("Credentials::Resolver(..)"),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    /// Every request is sent here instead, with the real target in a side header
    pub proxy_url: Option<String>,
    pub rest_base_url: String,
    pub queue_base_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::from_env(),
            proxy_url: None,
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            queue_base_url: DEFAULT_QUEUE_BASE_URL.to_string(),
            user_agent: format!("sunra-client/{}", crate::VERSION),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_proxy_url(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    /// Point both REST and queue roots at another host (e.g. staging)
    pub fn with_rest_base_url(mut self, rest_base_url: impl Into<String>) -> Self {
        let rest = rest_base_url.into().trim_end_matches('/').to_string();
        self.queue_base_url = format!("{}/queue", rest);
        self.rest_base_url = rest;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials_resolve() {
        assert_eq!(Credentials::from_static("k").resolve().as_deref(), Some("k"));
        assert_eq!(Credentials::None.resolve(), None);
    }

    #[test]
    fn test_resolver_is_called_each_time() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let creds = Credentials::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some("rotating".to_string())
        });

        creds.resolve();
        creds.resolve();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", Credentials::from_static("secret-key"));
        assert!(!rendered.contains("secret-key"));
    }

    #[test]
    fn test_rest_base_url_derives_queue_url() {
        let config = ClientConfig::default().with_rest_base_url("https://staging.sunra.ai/v1/");
        assert_eq!(config.rest_base_url, "https://staging.sunra.ai/v1");
        assert_eq!(config.queue_base_url, "https://staging.sunra.ai/v1/queue");
    }
}
