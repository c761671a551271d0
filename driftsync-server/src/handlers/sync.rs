//! Sync REST handlers.
//!
//! The same engine backs the WebSocket gateway; these routes exist for
//! clients that poll instead of holding a socket open.

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::events::SyncCreatePayload;
use crate::state::AppState;
use crate::storage::SyncFilter;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use driftsync_core::models::{ContentType, SyncRecord};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct RecentQuery {
    pub content_type: Option<ContentType>,
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

pub async fn create_sync(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<SyncCreatePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (record, delivered) = state
        .engine
        .create_sync(ctx.user_id, ctx.device_id, payload)?;
    Ok(Json(serde_json::json!({
        "sync_id": record.sync_id,
        "checksum": record.checksum,
        "size_bytes": record.size_bytes,
        "delivered_to": delivered,
    })))
}

pub async fn recent(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<SyncRecord>>, ApiError> {
    let filter = SyncFilter {
        content_type: query.content_type,
        since: query.since,
        limit: query.limit,
    };
    Ok(Json(state.engine.list_recent(ctx.user_id, &filter)?))
}

pub async fn favorites(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<SyncRecord>>, ApiError> {
    Ok(Json(state.engine.list_favorites(ctx.user_id)?))
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(sync_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let is_favorite = state
        .engine
        .toggle_favorite(ctx.user_id, ctx.device_id, sync_id)?;
    Ok(Json(serde_json::json!({
        "sync_id": sync_id,
        "is_favorite": is_favorite,
    })))
}

pub async fn delete_sync(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(sync_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .engine
        .soft_delete(ctx.user_id, ctx.device_id, sync_id)?;
    Ok(Json(serde_json::json!({"message": "Sync deleted"})))
}

pub async fn acknowledge(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(sync_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .engine
        .acknowledge(ctx.user_id, ctx.device_id, sync_id)?;
    Ok(Json(serde_json::json!({"message": "Acknowledged"})))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<driftsync_core::models::DeviceStats>, ApiError> {
    Ok(Json(state.engine.device_stats(ctx.user_id)?))
}
