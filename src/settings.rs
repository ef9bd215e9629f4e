use crate::error::{FormaError, Result};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 60;

/// Process configuration, read once at start-up and shared read-only.
#[derive(Clone, Debug)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub access_secret: Option<String>,
    pub port: u16,
    pub model: String,
    pub api_base_url: String,
    pub upstream_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings = Self::from_lookup(|key| std::env::var(key).ok())?;
        info!(
            event = "settings_loaded",
            port = settings.port,
            model = %settings.model,
            api_base_url = %settings.api_base_url,
            upstream_timeout_secs = settings.upstream_timeout.as_secs(),
            has_api_key = settings.openai_api_key.is_some(),
            protected = settings.access_secret.is_some(),
            "Settings loaded from environment"
        );
        Ok(settings)
    }

    /// Build settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| FormaError::config(format!("PORT must be a port number, got '{}'", raw)))?,
            None => DEFAULT_PORT,
        };

        let timeout_secs = match get("UPSTREAM_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().ok().filter(|secs| *secs > 0).ok_or_else(|| {
                FormaError::config(format!(
                    "UPSTREAM_TIMEOUT_SECS must be a positive integer, got '{}'",
                    raw
                ))
            })?,
            None => DEFAULT_UPSTREAM_TIMEOUT_SECS,
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            access_secret: get("FORMA_PASSWORD"),
            port,
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            upstream_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
