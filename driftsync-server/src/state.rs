//! Shared application state.

use crate::cache::SyncCache;
use crate::config::ServerConfig;
use crate::email::{EmailNotifier, LogEmailNotifier};
use crate::engine::SyncEngine;
use crate::rate_limit::RateLimiter;
use crate::sessions::SessionDirectory;
use crate::storage::Storage;
use driftsync_core::TokenService;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub tokens: TokenService,
    pub sessions: Arc<SessionDirectory>,
    pub engine: Arc<SyncEngine>,
    pub cache: Arc<SyncCache>,
    pub notifier: Arc<dyn EmailNotifier>,
    pub limiter: RateLimiter,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig, storage: Storage) -> Self {
        Self::with_notifier(config, storage, Arc::new(LogEmailNotifier))
    }

    pub fn with_notifier(
        config: ServerConfig,
        storage: Storage,
        notifier: Arc<dyn EmailNotifier>,
    ) -> Self {
        let tokens = TokenService::new(
            config.access_token_secret.as_bytes().to_vec(),
            config.refresh_token_secret.as_bytes().to_vec(),
        )
        .with_access_ttl(Duration::from_secs(config.access_token_ttl_secs))
        .with_refresh_ttl(Duration::from_secs(config.refresh_token_ttl_days * 24 * 60 * 60));

        let sessions = Arc::new(SessionDirectory::new());
        let cache = Arc::new(SyncCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            Duration::from_secs(config.file_cache_ttl_secs),
        ));
        let engine = Arc::new(SyncEngine::new(
            storage.clone(),
            Arc::clone(&sessions),
            Arc::clone(&cache),
            config.max_content_bytes,
            config.recent_limit,
        ));
        let limiter = RateLimiter::new(config.auth_rate_limit_per_minute);

        Self {
            storage,
            tokens,
            sessions,
            engine,
            cache,
            notifier,
            limiter,
            config,
        }
    }
}
