//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    /// HMAC secret for access tokens.
    pub access_token_secret: String,
    /// HMAC secret for refresh tokens; must differ from the access secret.
    pub refresh_token_secret: String,
    /// Access-token lifetime in seconds.
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_days: u64,
    /// Largest accepted sync content, in bytes.
    pub max_content_bytes: usize,
    pub max_payload_size: usize,
    /// Per-IP budget for the public auth routes.
    pub auth_rate_limit_per_minute: u32,
    /// Default page size for recent-sync listings.
    pub recent_limit: usize,
    /// TTL for cached recent/clipboard/link/note entries, seconds.
    pub cache_ttl_secs: u64,
    /// TTL for cached file-path entries, seconds.
    pub file_cache_ttl_secs: u64,
    /// Outbound event queue depth per WebSocket connection.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8920".to_string(),
            storage_path: PathBuf::from("driftsync.db"),
            access_token_secret: String::new(),
            refresh_token_secret: String::new(),
            access_token_ttl_secs: 15 * 60,
            refresh_token_ttl_days: 7,
            max_content_bytes: 1_048_576,
            max_payload_size: 2_097_152,
            auth_rate_limit_per_minute: 20,
            recent_limit: 50,
            cache_ttl_secs: 24 * 60 * 60,
            file_cache_ttl_secs: 7 * 24 * 60 * 60,
            outbound_queue: 256,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Fails fast on configurations that cannot authenticate anyone.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.access_token_secret.is_empty() || self.refresh_token_secret.is_empty() {
            anyhow::bail!("access_token_secret and refresh_token_secret must be set");
        }
        if self.access_token_secret == self.refresh_token_secret {
            anyhow::bail!("access and refresh token secrets must differ");
        }
        Ok(())
    }
}
