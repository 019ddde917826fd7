//! Process-wide client
//!
//! `configure` swaps the whole client. Operations already running keep the
//! snapshot they started with.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use sunra_core::ClientConfig;
use tracing::info;

use crate::client::SunraClient;
use crate::error::SdkResult;

static GLOBAL: OnceLock<RwLock<Option<Arc<SunraClient>>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<Arc<SunraClient>>> {
    GLOBAL.get_or_init(|| RwLock::new(None))
}

/// Replace the global client with one built from `config`
pub fn configure(config: ClientConfig) -> SdkResult<Arc<SunraClient>> {
    let client = Arc::new(SunraClient::new(config)?);
    install(Arc::clone(&client));
    Ok(client)
}

/// Replace the global client with an already built one
pub fn install(client: Arc<SunraClient>) {
    info!(queue_base_url = %client.config().queue_base_url, "Global Sunra client configured");
    *slot().write().unwrap_or_else(PoisonError::into_inner) = Some(client);
}

/// Current global client, built from the environment on first use
pub fn client() -> SdkResult<Arc<SunraClient>> {
    if let Some(client) = slot().read().unwrap_or_else(PoisonError::into_inner).as_ref() {
        return Ok(Arc::clone(client));
    }

    let mut guard = slot().write().unwrap_or_else(PoisonError::into_inner);
    if let Some(client) = guard.as_ref() {
        return Ok(Arc::clone(client));
    }
    let client = Arc::new(SunraClient::from_env()?);
    *guard = Some(Arc::clone(&client));
    Ok(client)
}
