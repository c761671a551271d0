//! Wire events exchanged over the WebSocket gateway.
//!
//! Every frame is a JSON object with an `event` discriminant and a `data`
//! payload. Unknown discriminants from clients fail deserialization and
//! are answered with `sync:error` rather than dropped silently.

use driftsync_core::models::{ContentType, Device, DeviceStats, SyncRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "sync:create")]
    SyncCreate(SyncCreatePayload),
    #[serde(rename = "sync:ack")]
    SyncAck { sync_id: Uuid },
    #[serde(rename = "sync:request")]
    SyncRequest {
        content_type: Option<ContentType>,
        since: Option<i64>,
        limit: Option<usize>,
    },
    #[serde(rename = "sync:toggle-favorite")]
    ToggleFavorite { sync_id: Uuid },
    #[serde(rename = "sync:delete")]
    SyncDelete { sync_id: Uuid },
}

#[derive(Debug, Deserialize)]
pub struct SyncCreatePayload {
    pub content_type: ContentType,
    pub content: String,
    pub content_timestamp: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub parent_sync_id: Option<Uuid>,
    /// When present, fan-out is restricted to these devices.
    pub target_devices: Option<Vec<Uuid>>,
}

/// Frames the server pushes.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "init:data")]
    InitData {
        stats: DeviceStats,
        devices: Vec<Device>,
        current_device: Device,
    },
    #[serde(rename = "device:online")]
    DeviceOnline { device_id: Uuid, device_name: String },
    #[serde(rename = "device:status")]
    DeviceStatus {
        device_id: Uuid,
        online: bool,
        /// Unix seconds of the status change.
        at: i64,
    },
    #[serde(rename = "sync:data")]
    SyncData { record: SyncRecord },
    #[serde(rename = "sync:created")]
    SyncCreated {
        sync_id: Uuid,
        checksum: String,
        delivered_to: Vec<Uuid>,
    },
    #[serde(rename = "sync:acked")]
    SyncAcked { sync_id: Uuid },
    #[serde(rename = "sync:deleted")]
    SyncDeleted { sync_id: Uuid },
    #[serde(rename = "sync:favorite")]
    SyncFavorite { sync_id: Uuid, is_favorite: bool },
    #[serde(rename = "sync:batch")]
    SyncBatch {
        recent: Vec<SyncRecord>,
        favorites: Vec<SyncRecord>,
    },
    #[serde(rename = "sync:error")]
    SyncError { message: String },
}

impl ServerEvent {
    /// Serialized frame, ready for the outbound queue.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // Only unrepresentable floats can fail here; none of our
            // payloads carry them.
            "{\"event\":\"sync:error\",\"data\":{\"message\":\"serialization failure\"}}"
                .to_string()
        })
    }
}
