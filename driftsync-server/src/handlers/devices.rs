//! Device management handlers.

use crate::auth::{client_ip, AuthContext};
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::NewSecurityEvent;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use driftsync_core::models::{Device, SecurityEventType, Severity};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    pub is_current: bool,
    pub is_online: bool,
}

#[derive(Deserialize)]
pub struct DeviceSettingsRequest {
    pub device_name: Option<String>,
    pub sync_enabled: Option<bool>,
    pub auto_sync: Option<bool>,
    /// Seconds between background pulls; clients clamp to >= 60.
    pub sync_interval: Option<u32>,
}

pub async fn list_devices(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<DeviceView>>, ApiError> {
    let devices = state
        .storage
        .list_user_devices(ctx.user_id)?
        .into_iter()
        .map(|device| DeviceView {
            is_current: device.device_id == ctx.device_id,
            is_online: state.sessions.is_connected(device.device_id),
            device,
        })
        .collect();
    Ok(Json(devices))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(device_id): Path<Uuid>,
    Json(req): Json<DeviceSettingsRequest>,
) -> Result<Json<Device>, ApiError> {
    // Settings may only be changed on the caller's own devices.
    state
        .storage
        .find_device(device_id)?
        .filter(|d| d.user_id == ctx.user_id)
        .ok_or_else(|| ApiError::NotFound("Device not found".to_string()))?;

    if let Some(interval) = req.sync_interval {
        if interval < 60 {
            return Err(ApiError::Validation(
                "sync_interval must be at least 60 seconds".to_string(),
            ));
        }
    }

    state.storage.update_device_settings(
        device_id,
        req.device_name.as_deref(),
        req.sync_enabled,
        req.auto_sync,
        req.sync_interval,
    )?;

    let updated = state
        .storage
        .find_device(device_id)?
        .ok_or_else(|| ApiError::NotFound("Device not found".to_string()))?;
    Ok(Json(updated))
}

/// Removes a device: revokes its tokens, drops its live session, deletes
/// the row, and tells the account owner.
pub async fn remove_device(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Path(device_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let device = state
        .storage
        .find_device(device_id)?
        .filter(|d| d.user_id == ctx.user_id)
        .ok_or_else(|| ApiError::NotFound("Device not found".to_string()))?;

    let ip = client_ip(&headers);
    state
        .storage
        .invalidate_all_device_auth(device_id, ip.as_deref())?;
    state.storage.delete_device(device_id)?;

    state.storage.record_event(NewSecurityEvent {
        user_id: ctx.user_id,
        device_id: Some(device_id),
        event_type: SecurityEventType::DeviceRemoved,
        severity: Severity::Medium,
        description: format!("Device removed: {}", device.device_name),
        ip_address: ip,
    })?;

    if let Some(user) = state.storage.find_user_by_id(ctx.user_id)? {
        state
            .notifier
            .send_device_removed_alert(&user.email, &user.username, &device.device_name);
    }
    info!(device_id = %device_id, "device removed");

    Ok(Json(serde_json::json!({"message": "Device removed"})))
}

#[derive(Deserialize)]
pub struct ResolveEventRequest {
    pub notes: Option<String>,
}

pub async fn list_security_events(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let recent = state.storage.recent_events(ctx.user_id, 10)?;
    let unresolved = state.storage.unresolved_events(ctx.user_id)?;
    Ok(Json(serde_json::json!({
        "recent": recent,
        "unresolved": unresolved,
    })))
}

pub async fn resolve_security_event(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<ResolveEventRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .storage
        .resolve_event(event_id, ctx.user_id, req.notes.as_deref())?;
    Ok(Json(serde_json::json!({"message": "Event resolved"})))
}
