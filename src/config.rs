use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use url::Url;

pub const APP_ID: &str = "aura";

const ENV_GATEWAY_URL: &str = "AURA_GATEWAY_URL";
const ENV_GATEWAY_KEY: &str = "AURA_GATEWAY_KEY";
const ENV_DATA_DIR: &str = "AURA_DATA_DIR";

/// Connection details for the serverless functions that front the AI gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub api_key: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"***")
            .finish()
    }
}

impl GatewayConfig {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid gateway URL: {}", base_url))?;
        // Url::join treats the last segment as a file unless it ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            api_key: api_key.into(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let base_url = match std::env::var(ENV_GATEWAY_URL) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => bail!("{} is not set", ENV_GATEWAY_URL),
        };
        let api_key = std::env::var(ENV_GATEWAY_KEY).unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("{} is not set, requests will be unauthenticated", ENV_GATEWAY_KEY);
        }
        Self::new(base_url.trim(), api_key)
    }

    /// Resolve a serverless function endpoint, e.g. `chat-stream`.
    pub fn function_url(&self, name: &str) -> Result<Url> {
        self.base_url
            .join(&format!("functions/v1/{}", name))
            .with_context(|| format!("Invalid function name: {}", name))
    }
}

/// Directory holding the local database.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        return Ok(PathBuf::from(dir));
    }
    let base = match std::env::var("XDG_DATA_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = std::env::var("HOME").context("HOME not set")?;
            PathBuf::from(home).join(".local/share")
        }
    };
    Ok(base.join(APP_ID))
}

pub fn database_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(format!("{}.db", APP_ID)))
}
