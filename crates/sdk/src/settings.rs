//! Layered client settings
//!
//! Precedence (lowest first): built-in defaults, `client.toml` in the
//! platform config directory, `SUNRA_*` environment variables.

use crate::error::{SdkError, SdkResult};
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sunra_core::config::{
    ClientConfig, Credentials, DEFAULT_REQUEST_TIMEOUT, DEFAULT_REST_BASE_URL,
};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "client.toml";
const ENV_PREFIX: &str = "SUNRA";

/// Raw settings as read from file and environment
///
/// `key` maps to `SUNRA_KEY`, `api_endpoint` to `SUNRA_API_ENDPOINT`,
/// `proxy_url` to `SUNRA_PROXY_URL`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClientSettings {
    #[serde(default)]
    pub key: Option<String>,
    pub api_endpoint: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl ClientSettings {
    /// Load from the platform config file (if present) and the environment
    pub fn load() -> SdkResult<Self> {
        Self::load_from(default_config_path().as_deref())
    }

    /// Load with an explicit config file; a missing file is not an error
    pub fn load_from(path: Option<&Path>) -> SdkResult<Self> {
        let mut builder = Config::builder()
            .set_default("api_endpoint", DEFAULT_REST_BASE_URL)?
            .set_default("request_timeout_secs", DEFAULT_REQUEST_TIMEOUT.as_secs())?;

        if let Some(path) = path {
            debug!(path = %path.display(), "Reading client settings file");
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings: ClientSettings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> SdkResult<()> {
        if !self.api_endpoint.starts_with("http://") && !self.api_endpoint.starts_with("https://") {
            return Err(SdkError::InvalidSetting {
                key: "api_endpoint",
                message: format!("expected an http(s) URL, got {:?}", self.api_endpoint),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(SdkError::InvalidSetting {
                key: "request_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Freeze into a client configuration snapshot
    ///
    /// Without a configured key, credentials are resolved from `SUNRA_KEY`
    /// on every request.
    pub fn into_config(self) -> ClientConfig {
        let credentials = match self.key.filter(|k| !k.is_empty()) {
            Some(key) => Credentials::from_static(key),
            None => Credentials::from_env(),
        };
        let mut config = ClientConfig::default()
            .with_credentials(credentials)
            .with_rest_base_url(self.api_endpoint);
        if let Some(proxy_url) = self.proxy_url.filter(|p| !p.is_empty()) {
            config = config.with_proxy_url(proxy_url);
        }
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config
    }
}

/// `<platform config dir>/sunra/client.toml`
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("ai", "sunra", "sunra").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "sunra-settings-{}-{}.toml",
            std::process::id(),
            name
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = write_settings(
            "override",
            "api_endpoint = \"https://staging.sunra.ai/v1\"\nrequest_timeout_secs = 15\nproxy_url = \"https://proxy.local/api\"\n",
        );

        let settings = ClientSettings::load_from(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.api_endpoint, "https://staging.sunra.ai/v1");
        assert_eq!(settings.request_timeout_secs, 15);

        let config = settings.into_config();
        assert_eq!(config.queue_base_url, "https://staging.sunra.ai/v1/queue");
        assert_eq!(config.proxy_url.as_deref(), Some("https://proxy.local/api"));
        assert_eq!(config.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("sunra-settings-does-not-exist.toml");
        let settings = ClientSettings::load_from(Some(&path)).unwrap();
        assert!(settings.request_timeout_secs > 0);
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let path = write_settings("bad-endpoint", "api_endpoint = \"ftp://files\"\n");
        let err = ClientSettings::load_from(Some(&path)).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            err,
            SdkError::InvalidSetting {
                key: "api_endpoint",
                ..
            }
        ));
    }

    #[test]
    fn test_key_from_settings_is_static() {
        let settings = ClientSettings {
            key: Some("file-key".to_string()),
            api_endpoint: DEFAULT_REST_BASE_URL.to_string(),
            proxy_url: None,
            request_timeout_secs: 30,
        };
        let config = settings.into_config();
        assert_eq!(config.credentials.resolve().as_deref(), Some("file-key"));
    }
}
