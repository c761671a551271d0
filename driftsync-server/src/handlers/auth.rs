//! Account and session handlers.
//!
//! The account-recovery endpoints answer identically whether or not the
//! address is registered, so they cannot be used to enumerate accounts.

use crate::auth::{client_ip, issue_token_pair, rotate_tokens, AuthContext};
use crate::error::ApiError;
use crate::password::{hash_password, verify_password};
use crate::state::AppState;
use crate::storage::{NewDevice, NewSecurityEvent};
use axum::extract::{Path, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use driftsync_core::models::{AccountStatus, Device, SecurityEventType, Severity, User};
use driftsync_core::DeviceFingerprint;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

const RECOVERY_MESSAGE: &str =
    "If the address is registered, an email is on its way";

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Email address or username.
    pub identifier: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub device_id: Uuid,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

fn check_rate(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let key = client_ip(headers).unwrap_or_else(|| "unknown".to_string());
    if !state.limiter.check(&key) {
        return Err(ApiError::RateLimited);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_rate(&state, &headers)?;

    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }
    let username = req.username.trim();
    if username.len() < 3 {
        return Err(ApiError::Validation(
            "Username must be at least 3 characters".to_string(),
        ));
    }
    validate_password(&req.password)?;

    let password_hash = hash_password(&req.password)?;
    let verification_token = Uuid::new_v4().to_string();
    let user = state
        .storage
        .create_user(&email, username, &password_hash, &verification_token)?;

    state
        .notifier
        .send_verification(&user.email, &user.username, &verification_token);
    info!(user_id = %user.user_id, "user registered");

    Ok(Json(serde_json::json!({
        "user_id": user.user_id,
        "message": "Registration successful. Check your email to verify the account."
    })))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_rate(&state, &headers)?;
    let ip = client_ip(&headers);

    // Unknown identifiers and wrong passwords produce the same error.
    let invalid = || ApiError::Auth("Invalid credentials".to_string());
    let user = state
        .storage
        .find_user_by_identifier(&req.identifier)?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash) {
        state.storage.record_event(NewSecurityEvent {
            user_id: user.user_id,
            device_id: None,
            event_type: SecurityEventType::LoginFailed,
            severity: Severity::Medium,
            description: "Login failed: wrong password".to_string(),
            ip_address: ip.clone(),
        })?;
        warn!(user_id = %user.user_id, "failed login attempt");
        return Err(invalid());
    }

    if !user.email_verified {
        return Err(ApiError::Auth("Email not verified".to_string()));
    }
    if user.account_status != AccountStatus::Active {
        return Err(ApiError::Auth("Account is not active".to_string()));
    }

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let device = resolve_device(&state, &user, user_agent, req.device_name, ip.clone())?;

    state.storage.record_event(NewSecurityEvent {
        user_id: user.user_id,
        device_id: Some(device.device_id),
        event_type: SecurityEventType::LoginSuccess,
        severity: Severity::Low,
        description: format!("Login from {}", device.device_name),
        ip_address: ip,
    })?;

    let pair = issue_token_pair(&state, user.user_id, device.device_id)?;
    info!(user_id = %user.user_id, device_id = %device.device_id, "login");

    Ok(Json(serde_json::json!({
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
        "device_id": device.device_id,
        "user": user,
    })))
}

/// Finds the device behind a user-agent fingerprint, or registers it and
/// alerts the account owner about the new device.
fn resolve_device(
    state: &AppState,
    user: &User,
    user_agent: &str,
    device_name: Option<String>,
    ip: Option<String>,
) -> Result<Device, ApiError> {
    let fingerprint = DeviceFingerprint::from_user_agent(user_agent);

    if let Some(device) = state
        .storage
        .find_device_by_token(user.user_id, &fingerprint.token)?
    {
        state
            .storage
            .reactivate_device(device.device_id, ip.as_deref())?;
        return Ok(device);
    }

    let device = state.storage.create_device(NewDevice {
        user_id: user.user_id,
        device_name: device_name.unwrap_or_else(|| fingerprint.display_name()),
        device_type: fingerprint.device_type,
        os_type: fingerprint.os.clone(),
        browser_type: fingerprint.browser.clone(),
        device_token: fingerprint.token.clone(),
        ip_address: ip.clone(),
    })?;

    state.storage.record_event(NewSecurityEvent {
        user_id: user.user_id,
        device_id: Some(device.device_id),
        event_type: SecurityEventType::DevicePaired,
        severity: Severity::Medium,
        description: format!("New device paired: {}", device.device_name),
        ip_address: ip.clone(),
    })?;
    state.notifier.send_new_device_alert(
        &user.email,
        &user.username,
        &device.device_name,
        ip.as_deref(),
    );
    Ok(device)
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_rate(&state, &headers)?;
    let ip = client_ip(&headers);

    let claims = state
        .tokens
        .verify_refresh(&req.refresh_token)
        .map_err(|_| ApiError::Auth("Invalid refresh token".to_string()))?;
    if claims.device_id != req.device_id {
        return Err(ApiError::Auth("Invalid refresh token".to_string()));
    }

    let pair = rotate_tokens(
        &state,
        claims.sub,
        req.device_id,
        &req.refresh_token,
        ip.as_deref(),
    )?;
    Ok(Json(serde_json::json!({
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
    })))
}

/// Revokes every refresh token for the calling device and deactivates
/// it, so logout on one device cannot be undone by a stashed older
/// token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ip = client_ip(&headers);
    let revoked = state
        .storage
        .invalidate_all_device_auth(ctx.device_id, ip.as_deref())?;
    state.storage.update_device_status(ctx.device_id, false)?;
    info!(device_id = %ctx.device_id, revoked, "logout");
    Ok(Json(serde_json::json!({"message": "Logged out"})))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state
        .storage
        .find_user_by_verification_token(&token)?
        .ok_or_else(|| ApiError::BadRequest("Invalid verification token".to_string()))?;
    state.storage.mark_email_verified(user.user_id)?;
    Ok(Json(serde_json::json!({"message": "Email verified"})))
}

pub async fn resend_verification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_rate(&state, &headers)?;

    if let Some(user) = state.storage.find_user_by_identifier(&req.email)? {
        if !user.email_verified {
            let token = Uuid::new_v4().to_string();
            state.storage.set_verification_token(user.user_id, &token)?;
            state
                .notifier
                .send_verification(&user.email, &user.username, &token);
        }
    }
    Ok(Json(serde_json::json!({"message": RECOVERY_MESSAGE})))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_rate(&state, &headers)?;

    if let Some(user) = state.storage.find_user_by_identifier(&req.email)? {
        let token = Uuid::new_v4().to_string();
        state.storage.set_reset_token(user.user_id, &token)?;
        state
            .notifier
            .send_password_reset(&user.email, &user.username, &token);
    }
    Ok(Json(serde_json::json!({"message": RECOVERY_MESSAGE})))
}

pub async fn reset_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_rate(&state, &headers)?;
    validate_password(&req.new_password)?;

    let invalid = || ApiError::BadRequest("Invalid or expired reset token".to_string());
    let user = state
        .storage
        .find_user_by_reset_token(&req.token)?
        .ok_or_else(invalid)?;
    let expires = user.reset_token_expires.ok_or_else(invalid)?;
    if expires <= chrono::Utc::now().timestamp() {
        return Err(invalid());
    }

    let password_hash = hash_password(&req.new_password)?;
    state
        .storage
        .apply_password_reset(user.user_id, &password_hash)?;

    // A password change revokes every open session.
    for device in state.storage.list_user_devices(user.user_id)? {
        state
            .storage
            .invalidate_all_device_auth(device.device_id, None)?;
    }
    state.storage.record_event(NewSecurityEvent {
        user_id: user.user_id,
        device_id: None,
        event_type: SecurityEventType::PasswordChanged,
        severity: Severity::Medium,
        description: "Password reset via email token".to_string(),
        ip_address: client_ip(&headers),
    })?;

    Ok(Json(serde_json::json!({"message": "Password updated"})))
}
