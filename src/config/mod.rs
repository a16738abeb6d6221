//! Configuration loading and shared HTTP client construction.

pub mod schema;

pub use schema::{ChannelsConfig, ChunkMode, DmPolicy, FeishuConfig, GroupPolicy, QqBotConfig, TableMode};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// All network calls (token fetch, upload, send) share this bound; a timeout
/// surfaces as a send failure and triggers the delivery fallback paths.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

/// Build the HTTP client used by all platform transports. The builder has
/// static options only, so construction cannot fail.
pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .expect("http client")
}
