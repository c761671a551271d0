//! Axum router setup.

use crate::auth::auth_middleware;
use crate::gateway;
use crate::handlers::{auth, devices, sync};
use crate::state::AppState;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let max_payload_size = state.config.max_payload_size;

    // Authenticated routes
    let authenticated = Router::new()
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/devices", get(devices::list_devices))
        .route(
            "/api/v1/devices/{id}/settings",
            put(devices::update_settings),
        )
        .route("/api/v1/devices/{id}", delete(devices::remove_device))
        .route(
            "/api/v1/security/events",
            get(devices::list_security_events),
        )
        .route(
            "/api/v1/security/events/{id}/resolve",
            post(devices::resolve_security_event),
        )
        .route("/api/v1/sync", post(sync::create_sync))
        .route("/api/v1/sync/recent", get(sync::recent))
        .route("/api/v1/sync/favorites", get(sync::favorites))
        .route("/api/v1/sync/stats", get(sync::stats))
        .route("/api/v1/sync/{id}/favorite", post(sync::toggle_favorite))
        .route("/api/v1/sync/{id}/ack", post(sync::acknowledge))
        .route("/api/v1/sync/{id}", delete(sync::delete_sync))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Unauthenticated routes; the WebSocket route authenticates in the
    // upgrade request itself.
    let public = Router::new()
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route(
            "/api/v1/auth/verify-email/{token}",
            get(auth::verify_email),
        )
        .route(
            "/api/v1/auth/resend-verification",
            post(auth::resend_verification),
        )
        .route("/api/v1/auth/forgot-password", post(auth::forgot_password))
        .route("/api/v1/auth/reset-password", post(auth::reset_password))
        .route("/ws", get(gateway::ws_handler))
        .route("/health", get(health));

    Router::new()
        .merge(authenticated)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
