//! Background maintenance: prune expired auth rows and cache entries.

use crate::state::AppState;
use std::time::Duration;
use tokio::time;

pub fn spawn_cleanup_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // hourly
        loop {
            interval.tick().await;
            run_cleanup(&state);
        }
    });
}

fn run_cleanup(state: &AppState) {
    match state.storage.prune_expired_device_auth() {
        Ok(pruned) if pruned > 0 => {
            tracing::info!(pruned, "pruned expired refresh-token records")
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Cleanup error: {}", e),
    }

    match state.storage.prune_expired_reset_tokens() {
        Ok(pruned) if pruned > 0 => tracing::info!(pruned, "pruned expired reset tokens"),
        Ok(_) => {}
        Err(e) => tracing::error!("Cleanup error: {}", e),
    }

    let evicted = state.cache.evict_expired();
    if evicted > 0 {
        tracing::debug!(evicted, "evicted expired cache entries");
    }
    state.limiter.evict_idle();

    tracing::debug!("Cleanup completed");
}
