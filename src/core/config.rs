use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

pub const API_URL_ENV: &str = "CONVOY_API_URL";
pub const TOKEN_ENV: &str = "CONVOY_TOKEN";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Connect timeout for backend requests. Streams themselves have none.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub default_thinking: bool,
}

fn default_api_base() -> String {
    "http://127.0.0.1:17890".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            default_thinking: false,
        }
    }
}

/// Connection settings given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionFlags {
    pub api_url: Option<String>,
    pub token: Option<String>,
}

impl ClientConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("convoy").join("config.toml"))
    }

    pub async fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config.toml found at {}, using defaults.", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        info!(
            "Loaded config: api_base={}, poll={}ms, token={}",
            config.api_base,
            config.poll_interval_ms,
            if config.token.is_some() { "set" } else { "none" }
        );
        Ok(config)
    }

    /// File, then environment, then flags. The result is validated.
    pub async fn resolve(flags: &ConnectionFlags) -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) => Self::load_from(path).await?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_flags(flags);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_base = url;
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.token = Some(token);
        }
    }

    pub fn apply_flags(&mut self, flags: &ConnectionFlags) {
        if let Some(url) = flags.api_url.as_ref().filter(|v| !v.trim().is_empty()) {
            self.api_base = url.clone();
        }
        if let Some(token) = flags.token.as_ref().filter(|v| !v.trim().is_empty()) {
            self.token = Some(token.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.api_base)
            .map_err(|e| anyhow!("Invalid API URL '{}': {}", self.api_base, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "API URL must use http or https, got '{}'",
                parsed.scheme()
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
