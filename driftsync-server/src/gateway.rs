//! WebSocket gateway.
//!
//! Clients authenticate in the upgrade request, before any socket
//! exists: `GET /ws?token=...&device_id=...`, or via the standard
//! `Authorization: Bearer` and `device-id` headers for clients that can
//! set them. A rejected handshake is a plain HTTP error, never a
//! connected-then-dropped socket. After the upgrade the connection is
//! registered in the session directory and primed with an `init:data`
//! snapshot.

use crate::auth::authorize;
use crate::error::ApiError;
use crate::events::{ClientEvent, ServerEvent};
use crate::state::AppState;
use crate::storage::SyncFilter;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Deserialize, Default)]
pub struct WsQuery {
    pub token: Option<String>,
    pub device_id: Option<Uuid>,
}

/// Resolves handshake credentials; query parameters win over headers.
fn handshake_credentials(
    query: WsQuery,
    headers: &HeaderMap,
) -> Result<(String, Uuid), ApiError> {
    let token = query
        .token
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::Auth("Missing token".to_string()))?;
    let device_id = query
        .device_id
        .or_else(|| {
            headers
                .get("device-id")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        })
        .ok_or_else(|| ApiError::Auth("Missing device id".to_string()))?;
    Ok((token, device_id))
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let (token, device_id) = handshake_credentials(query, &headers)?;
    let claims = state
        .tokens
        .verify_access(&token)
        .map_err(|_| ApiError::Auth("Invalid token".to_string()))?;
    if claims.device_id != device_id {
        return Err(ApiError::Auth("Token is bound to another device".to_string()));
    }
    let ctx = authorize(&state, &claims)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, ctx.user_id, ctx.device_id, socket)))
}

async fn handle_socket(state: AppState, user_id: Uuid, device_id: Uuid, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<String>(state.config.outbound_queue);
    let conn_id = state.sessions.register(user_id, device_id, tx.clone());
    info!(%user_id, %device_id, "device connected");

    if let Err(e) = state.storage.update_device_status(device_id, true) {
        warn!(%device_id, error = %e, "failed to mark device online");
    }

    if let Err(e) = send_init(&state, user_id, device_id, &tx).await {
        warn!(%device_id, error = %e, "failed to prime connection");
    }
    announce(&state, user_id, device_id, true);

    let (mut sink, mut stream) = socket.split();

    // Forward the outbound queue to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, user_id, device_id, text.as_str(), &tx).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {} // pings and pongs are handled by axum
                }
            }
        }
    }
    send_task.abort();

    // Only the connection that still owns the device slot tears it down;
    // a reconnect that displaced us already took over.
    if state.sessions.unregister(conn_id).is_some() {
        if let Err(e) = state.storage.update_device_status(device_id, false) {
            warn!(%device_id, error = %e, "failed to mark device offline");
        }
        announce(&state, user_id, device_id, false);
        info!(%user_id, %device_id, "device disconnected");
    }
}

async fn send_init(
    state: &AppState,
    user_id: Uuid,
    device_id: Uuid,
    tx: &mpsc::Sender<String>,
) -> Result<(), ApiError> {
    let stats = state.engine.device_stats(user_id)?;
    let devices = state.storage.list_user_devices(user_id)?;
    let current_device = devices
        .iter()
        .find(|d| d.device_id == device_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound("Device not found".to_string()))?;

    let frame = ServerEvent::InitData {
        stats,
        devices,
        current_device,
    }
    .to_frame();
    tx.send(frame)
        .await
        .map_err(|_| ApiError::Internal("connection closed during init".to_string()))
}

/// Tells the user's other devices about a presence change.
fn announce(state: &AppState, user_id: Uuid, device_id: Uuid, online: bool) {
    let frame = if online {
        let device_name = state
            .storage
            .find_device(device_id)
            .ok()
            .flatten()
            .map(|d| d.device_name)
            .unwrap_or_default();
        ServerEvent::DeviceOnline {
            device_id,
            device_name,
        }
        .to_frame()
    } else {
        ServerEvent::DeviceStatus {
            device_id,
            online,
            at: chrono::Utc::now().timestamp(),
        }
        .to_frame()
    };
    state
        .sessions
        .broadcast_to_user(user_id, &frame, Some(device_id));
}

async fn handle_frame(
    state: &AppState,
    user_id: Uuid,
    device_id: Uuid,
    text: &str,
    tx: &mpsc::Sender<String>,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(%device_id, error = %e, "unparseable frame");
            let _ = tx
                .send(
                    ServerEvent::SyncError {
                        message: format!("Unrecognized event: {}", e),
                    }
                    .to_frame(),
                )
                .await;
            return;
        }
    };

    let reply = match event {
        ClientEvent::SyncCreate(payload) => state
            .engine
            .create_sync(user_id, device_id, payload)
            .map(|(record, delivered)| ServerEvent::SyncCreated {
                sync_id: record.sync_id,
                checksum: record.checksum,
                delivered_to: delivered,
            }),
        ClientEvent::SyncAck { sync_id } => state
            .engine
            .acknowledge(user_id, device_id, sync_id)
            .map(|()| ServerEvent::SyncAcked { sync_id }),
        ClientEvent::SyncRequest {
            content_type,
            since,
            limit,
        } => {
            let filter = SyncFilter {
                content_type,
                since,
                limit,
            };
            state.engine.list_recent(user_id, &filter).and_then(|recent| {
                let favorites = state.engine.list_favorites(user_id)?;
                Ok(ServerEvent::SyncBatch { recent, favorites })
            })
        }
        ClientEvent::ToggleFavorite { sync_id } => state
            .engine
            .toggle_favorite(user_id, device_id, sync_id)
            .map(|is_favorite| ServerEvent::SyncFavorite {
                sync_id,
                is_favorite,
            }),
        ClientEvent::SyncDelete { sync_id } => state
            .engine
            .soft_delete(user_id, device_id, sync_id)
            .map(|()| ServerEvent::SyncDeleted { sync_id }),
    };

    let frame = match reply {
        Ok(event) => event.to_frame(),
        Err(e) => ServerEvent::SyncError {
            message: e.to_string(),
        }
        .to_frame(),
    };
    let _ = tx.send(frame).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn query_credentials_win_over_headers() {
        let device_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        let query = WsQuery {
            token: Some("from-query".to_string()),
            device_id: Some(device_id),
        };
        let (token, resolved) = handshake_credentials(query, &headers).unwrap();
        assert_eq!(token, "from-query");
        assert_eq!(resolved, device_id);
    }

    #[test]
    fn headers_cover_missing_query_parameters() {
        let device_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(
            "device-id",
            HeaderValue::from_str(&device_id.to_string()).unwrap(),
        );

        let (token, resolved) = handshake_credentials(WsQuery::default(), &headers).unwrap();
        assert_eq!(token, "from-header");
        assert_eq!(resolved, device_id);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = handshake_credentials(WsQuery::default(), &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));

        // A token without any device id is still incomplete.
        let query = WsQuery {
            token: Some("t".to_string()),
            device_id: None,
        };
        let err = handshake_credentials(query, &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ApiError::Auth(_)));
    }
}
