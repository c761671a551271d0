//! Bearer-token auth middleware with transparent refresh.
//!
//! Every authenticated request carries an access token. When the token is
//! expired but the request also carries `refresh-token` and `device-id`
//! headers, the middleware rotates the refresh token in place and retries
//! once; the replacement pair is returned in `new-access-token` and
//! `new-refresh-token` response headers so the client can store it
//! without an extra round trip.

use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::NewSecurityEvent;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use driftsync_core::models::{AccountStatus, SecurityEventType, Severity};
use driftsync_core::{Claims, TokenError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity attached to every authenticated request.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub device_id: Uuid,
}

/// A freshly rotated token pair, echoed back via response headers.
#[derive(Debug)]
pub struct RotatedPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Auth("Missing bearer token".to_string()))?
        .to_string();

    let mut rotated = None;
    let claims = match state.tokens.verify_access(&bearer) {
        Ok(claims) => claims,
        Err(TokenError::Expired) => {
            let (claims, pair) = transparent_refresh(&state, request.headers())?;
            debug!(device_id = %claims.device_id, "access token refreshed in-flight");
            rotated = Some(pair);
            claims
        }
        Err(_) => return Err(ApiError::Auth("Invalid token".to_string())),
    };

    let ctx = authorize(&state, &claims)?;
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Some(pair) = rotated {
        attach_rotated_pair(response.headers_mut(), &pair);
    }
    Ok(response)
}

/// Rotates the presented refresh token and mints a replacement pair.
/// The conditional update in storage guarantees a token rotates at most
/// once, so a replayed refresh fails even inside the validity window.
pub fn transparent_refresh(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Claims, RotatedPair), ApiError> {
    let refresh_token = headers
        .get("refresh-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Auth("Token expired".to_string()))?;
    let device_id: Uuid = headers
        .get("device-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::Auth("Token expired".to_string()))?;

    let claims = state
        .tokens
        .verify_refresh(refresh_token)
        .map_err(|_| ApiError::Auth("Invalid refresh token".to_string()))?;
    if claims.device_id != device_id {
        return Err(ApiError::Auth("Invalid refresh token".to_string()));
    }

    let pair = rotate_tokens(state, claims.sub, device_id, refresh_token, None)?;
    Ok((claims, pair))
}

/// Invalidates `presented` and persists a replacement. Fails when the
/// presented token was already rotated or revoked.
pub fn rotate_tokens(
    state: &AppState,
    user_id: Uuid,
    device_id: Uuid,
    presented: &str,
    ip: Option<&str>,
) -> Result<RotatedPair, ApiError> {
    // Every failed precondition reads the same; callers never learn
    // which check tripped.
    let invalid = || ApiError::Auth("Invalid refresh token".to_string());

    let user = state
        .storage
        .find_user_by_id(user_id)?
        .ok_or_else(invalid)?;
    if user.account_status != AccountStatus::Active {
        return Err(invalid());
    }
    let device = state.storage.find_device(device_id)?.ok_or_else(invalid)?;
    if device.user_id != user_id {
        record_device_mismatch(state, user_id, device_id, ip);
        return Err(invalid());
    }
    if !device.is_active {
        return Err(invalid());
    }

    if !state.storage.is_refresh_token_valid(device_id, presented)? {
        return Err(invalid());
    }
    if !state.storage.rotate_device_auth(device_id, presented, ip)? {
        // Lost the race against a concurrent refresh with the same token.
        return Err(ApiError::Auth("Invalid refresh token".to_string()));
    }

    Ok(issue_token_pair(state, user_id, device_id)?)
}

/// Mints an access/refresh pair and persists the refresh-token record.
pub fn issue_token_pair(
    state: &AppState,
    user_id: Uuid,
    device_id: Uuid,
) -> Result<RotatedPair, ApiError> {
    let access_token = state.tokens.issue_access(user_id, device_id);
    let refresh_token = state.tokens.issue_refresh(user_id, device_id);
    let expires_at = Utc::now().timestamp() + state.tokens.refresh_ttl().as_secs() as i64;
    state
        .storage
        .create_device_auth(device_id, &refresh_token, expires_at)?;
    Ok(RotatedPair {
        access_token,
        refresh_token,
    })
}

pub fn attach_rotated_pair(headers: &mut HeaderMap, pair: &RotatedPair) {
    if let Ok(value) = HeaderValue::from_str(&pair.access_token) {
        headers.insert("new-access-token", value);
    }
    if let Ok(value) = HeaderValue::from_str(&pair.refresh_token) {
        headers.insert("new-refresh-token", value);
    }
}

/// Validates the (user, device) pair behind verified claims.
pub fn authorize(state: &AppState, claims: &Claims) -> Result<AuthContext, ApiError> {
    let user = state
        .storage
        .find_user_by_id(claims.sub)?
        .ok_or_else(|| ApiError::Auth("Invalid token".to_string()))?;
    if user.account_status != AccountStatus::Active {
        return Err(ApiError::Auth("Account is not active".to_string()));
    }

    let device = state
        .storage
        .find_device(claims.device_id)?
        .ok_or_else(|| ApiError::Auth("Unknown device".to_string()))?;
    if device.user_id != claims.sub {
        record_device_mismatch(state, claims.sub, claims.device_id, None);
        return Err(ApiError::Auth("Unknown device".to_string()));
    }

    Ok(AuthContext {
        user_id: user.user_id,
        device_id: device.device_id,
    })
}

/// Audits a token presented for a device belonging to another account.
/// The audit write must not mask the rejection, so its error is only
/// logged.
fn record_device_mismatch(state: &AppState, user_id: Uuid, device_id: Uuid, ip: Option<&str>) {
    let result = state.storage.record_event(NewSecurityEvent {
        user_id,
        device_id: Some(device_id),
        event_type: SecurityEventType::SuspiciousActivity,
        severity: Severity::High,
        description: "Token presented for a device owned by another account".to_string(),
        ip_address: ip.map(str::to_string),
    });
    if let Err(err) = result {
        warn!(%user_id, %device_id, %err, "failed to record device-mismatch event");
    }
}

/// Best-effort client address for audit rows and rate limiting.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::storage::{NewDevice, Storage};
    use driftsync_core::models::DeviceType;

    fn state() -> AppState {
        let config = ServerConfig {
            access_token_secret: "access".to_string(),
            refresh_token_secret: "refresh".to_string(),
            ..ServerConfig::default()
        };
        AppState::new(config, Storage::in_memory().unwrap())
    }

    fn seed(state: &AppState) -> (Uuid, Uuid) {
        let user = state
            .storage
            .create_user("a@x.com", "alice", "h", "v")
            .unwrap();
        let device = state
            .storage
            .create_device(NewDevice {
                user_id: user.user_id,
                device_name: "Laptop".to_string(),
                device_type: DeviceType::Desktop,
                os_type: "linux".to_string(),
                browser_type: "firefox".to_string(),
                device_token: "fp".to_string(),
                ip_address: None,
            })
            .unwrap();
        (user.user_id, device.device_id)
    }

    #[test]
    fn rotation_invalidates_the_presented_token() {
        let state = state();
        let (user_id, device_id) = seed(&state);

        let first = issue_token_pair(&state, user_id, device_id).unwrap();
        let second =
            rotate_tokens(&state, user_id, device_id, &first.refresh_token, None).unwrap();

        // Replaying the rotated token must fail; the new one still works.
        assert!(rotate_tokens(&state, user_id, device_id, &first.refresh_token, None).is_err());
        assert!(rotate_tokens(&state, user_id, device_id, &second.refresh_token, None).is_ok());
    }

    #[test]
    fn authorize_rejects_foreign_devices() {
        let state = state();
        let (user_id, _) = seed(&state);
        let other = state
            .storage
            .create_user("b@x.com", "bob", "h", "v2")
            .unwrap();
        let foreign = state
            .storage
            .create_device(NewDevice {
                user_id: other.user_id,
                device_name: "Phone".to_string(),
                device_type: DeviceType::Mobile,
                os_type: "android".to_string(),
                browser_type: "chrome".to_string(),
                device_token: "fp2".to_string(),
                ip_address: None,
            })
            .unwrap();

        let token = state.tokens.issue_access(user_id, foreign.device_id);
        let claims = state.tokens.verify_access(&token).unwrap();
        assert!(matches!(
            authorize(&state, &claims).unwrap_err(),
            ApiError::Auth(_)
        ));

        // The mismatch leaves an audit trail under the claimed account.
        let events = state.storage.recent_events(user_id, 10).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == SecurityEventType::SuspiciousActivity
                && e.device_id == Some(foreign.device_id)));
    }

    #[test]
    fn refresh_with_a_foreign_device_is_audited() {
        let state = state();
        let (user_id, _) = seed(&state);
        let other = state
            .storage
            .create_user("c@x.com", "carol", "h", "v3")
            .unwrap();
        let foreign = state
            .storage
            .create_device(NewDevice {
                user_id: other.user_id,
                device_name: "Tablet".to_string(),
                device_type: DeviceType::Tablet,
                os_type: "android".to_string(),
                browser_type: "chrome".to_string(),
                device_token: "fp3".to_string(),
                ip_address: None,
            })
            .unwrap();

        let refresh = state.tokens.issue_refresh(user_id, foreign.device_id);
        let err = rotate_tokens(&state, user_id, foreign.device_id, &refresh, None).unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));

        let events = state.storage.recent_events(user_id, 10).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == SecurityEventType::SuspiciousActivity));
    }

    #[test]
    fn client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers).unwrap(), "203.0.113.7");
        assert!(client_ip(&HeaderMap::new()).is_none());
    }
}
