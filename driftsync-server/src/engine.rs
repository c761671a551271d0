//! Sync fan-out engine.
//!
//! Sits between the transport layers (REST handlers and the WebSocket
//! gateway) and storage: validates submissions, persists them, pushes
//! `sync:data` frames to the target sessions, and tracks per-device
//! delivery state.

use crate::cache::SyncCache;
use crate::error::ApiError;
use crate::events::{ServerEvent, SyncCreatePayload};
use crate::sessions::SessionDirectory;
use crate::storage::{NewSyncRecord, Storage, SyncFilter};
use chrono::Utc;
use driftsync_core::models::{DeviceStats, SyncRecord, SyncState};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Favorites returned in `sync:batch` replies.
const FAVORITES_LIMIT: usize = 5;

pub struct SyncEngine {
    storage: Storage,
    sessions: Arc<SessionDirectory>,
    cache: Arc<SyncCache>,
    max_content_bytes: usize,
    recent_limit: usize,
}

impl SyncEngine {
    pub fn new(
        storage: Storage,
        sessions: Arc<SessionDirectory>,
        cache: Arc<SyncCache>,
        max_content_bytes: usize,
        recent_limit: usize,
    ) -> Self {
        Self {
            storage,
            sessions,
            cache,
            max_content_bytes,
            recent_limit,
        }
    }

    /// Persists a submission and fans it out. Returns the stored record
    /// and the devices the frame was queued for.
    pub fn create_sync(
        &self,
        user_id: Uuid,
        source_device_id: Uuid,
        payload: SyncCreatePayload,
    ) -> Result<(SyncRecord, Vec<Uuid>), ApiError> {
        if payload.content.is_empty() {
            return Err(ApiError::Validation("Content must not be empty".to_string()));
        }
        if payload.content.len() > self.max_content_bytes {
            return Err(ApiError::PayloadTooLarge);
        }

        // The submitting device must exist and belong to the caller.
        let source = self
            .storage
            .find_device(source_device_id)?
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| ApiError::NotFound("Device not found".to_string()))?;

        let checksum = hex_sha256(payload.content.as_bytes());
        let size_bytes = payload.content.len() as u64;
        let record = self.storage.create_sync_record(NewSyncRecord {
            user_id,
            source_device_id: source.device_id,
            content_type: payload.content_type,
            content: payload.content,
            content_timestamp: payload
                .content_timestamp
                .unwrap_or_else(|| Utc::now().timestamp()),
            metadata: payload.metadata,
            parent_sync_id: payload.parent_sync_id,
            size_bytes,
            checksum,
        })?;

        // The source already holds the content.
        self.storage.upsert_delivery_status(
            record.sync_id,
            source.device_id,
            SyncState::Completed,
            None,
        )?;

        let connected = self.sessions.connected_devices(user_id);
        let targets: Vec<Uuid> = match &payload.target_devices {
            Some(requested) => connected
                .into_iter()
                .filter(|id| *id != source.device_id && requested.contains(id))
                .collect(),
            None => connected
                .into_iter()
                .filter(|id| *id != source.device_id)
                .collect(),
        };

        let frame = ServerEvent::SyncData {
            record: record.clone(),
        }
        .to_frame();
        let mut delivered = Vec::new();
        for device_id in targets {
            if self.sessions.send_to_device(device_id, &frame) {
                self.storage.upsert_delivery_status(
                    record.sync_id,
                    device_id,
                    SyncState::Pending,
                    None,
                )?;
                delivered.push(device_id);
            }
        }
        debug!(sync_id = %record.sync_id, targets = delivered.len(), "sync fanned out");

        self.cache.invalidate_user(user_id);
        Ok((record, delivered))
    }

    /// Marks a device's copy of a sync as received. Repeated acks are
    /// harmless.
    pub fn acknowledge(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        sync_id: Uuid,
    ) -> Result<(), ApiError> {
        self.storage
            .find_sync_record(sync_id, user_id)?
            .ok_or_else(|| ApiError::NotFound("Sync not found".to_string()))?;
        self.storage
            .upsert_delivery_status(sync_id, device_id, SyncState::Completed, None)
    }

    /// Cache-aside recent listing. Only plain queries are cached; filters
    /// on `since` or an explicit limit always hit storage.
    pub fn list_recent(
        &self,
        user_id: Uuid,
        filter: &SyncFilter,
    ) -> Result<Vec<SyncRecord>, ApiError> {
        let cacheable = filter.since.is_none() && filter.limit.is_none();
        let kind = filter
            .content_type
            .map(|t| t.as_str())
            .unwrap_or("recent");

        if cacheable {
            if let Some(hit) = self.cache.get(kind, user_id, None) {
                return Ok(hit);
            }
        }
        let records = self.storage.list_recent(user_id, filter, self.recent_limit)?;
        if cacheable {
            self.cache.put(kind, user_id, None, records.clone());
        }
        Ok(records)
    }

    pub fn list_favorites(&self, user_id: Uuid) -> Result<Vec<SyncRecord>, ApiError> {
        if let Some(hit) = self.cache.get("favorites", user_id, None) {
            return Ok(hit);
        }
        let records = self.storage.list_favorites(user_id, FAVORITES_LIMIT)?;
        self.cache.put("favorites", user_id, None, records.clone());
        Ok(records)
    }

    /// Flips the favorite flag and tells the user's other devices.
    pub fn toggle_favorite(
        &self,
        user_id: Uuid,
        acting_device: Uuid,
        sync_id: Uuid,
    ) -> Result<bool, ApiError> {
        let is_favorite = self.storage.toggle_favorite(sync_id, user_id)?;
        self.cache.invalidate_user(user_id);
        let frame = ServerEvent::SyncFavorite {
            sync_id,
            is_favorite,
        }
        .to_frame();
        self.sessions
            .broadcast_to_user(user_id, &frame, Some(acting_device));
        Ok(is_favorite)
    }

    /// Soft-deletes a record and fans `sync:deleted` out so other devices
    /// can drop their local copies.
    pub fn soft_delete(
        &self,
        user_id: Uuid,
        acting_device: Uuid,
        sync_id: Uuid,
    ) -> Result<(), ApiError> {
        self.storage.soft_delete(sync_id, user_id)?;
        self.cache.invalidate_user(user_id);
        let frame = ServerEvent::SyncDeleted { sync_id }.to_frame();
        self.sessions
            .broadcast_to_user(user_id, &frame, Some(acting_device));
        Ok(())
    }

    pub fn device_stats(&self, user_id: Uuid) -> Result<DeviceStats, ApiError> {
        self.storage.device_stats(user_id)
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewDevice;
    use driftsync_core::models::{ContentType, DeviceType};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn engine() -> (SyncEngine, Storage, Arc<SessionDirectory>) {
        let storage = Storage::in_memory().unwrap();
        let sessions = Arc::new(SessionDirectory::new());
        let cache = Arc::new(SyncCache::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let engine = SyncEngine::new(
            storage.clone(),
            Arc::clone(&sessions),
            cache,
            1024,
            50,
        );
        (engine, storage, sessions)
    }

    fn seed_device(storage: &Storage, user_id: Uuid, fp: &str) -> Uuid {
        storage
            .create_device(NewDevice {
                user_id,
                device_name: fp.to_string(),
                device_type: DeviceType::Desktop,
                os_type: "linux".to_string(),
                browser_type: "firefox".to_string(),
                device_token: fp.to_string(),
                ip_address: None,
            })
            .unwrap()
            .device_id
    }

    fn payload(content: &str) -> SyncCreatePayload {
        SyncCreatePayload {
            content_type: ContentType::Clipboard,
            content: content.to_string(),
            content_timestamp: None,
            metadata: None,
            parent_sync_id: None,
            target_devices: None,
        }
    }

    #[test]
    fn checksum_and_source_delivery() {
        let (engine, storage, _) = engine();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let device = seed_device(&storage, user.user_id, "a");

        let (record, delivered) = engine
            .create_sync(user.user_id, device, payload("hello"))
            .unwrap();

        assert_eq!(record.size_bytes, 5);
        assert_eq!(record.version, 1);
        assert_eq!(
            record.checksum,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(delivered.is_empty());

        let status = storage
            .find_delivery_status(record.sync_id, device)
            .unwrap()
            .unwrap();
        assert_eq!(status.state, SyncState::Completed);
    }

    #[test]
    fn fan_out_skips_source_and_offline_devices() {
        let (engine, storage, sessions) = engine();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let dev_a = seed_device(&storage, user.user_id, "a");
        let dev_b = seed_device(&storage, user.user_id, "b");
        let dev_c = seed_device(&storage, user.user_id, "c");
        let dev_d = seed_device(&storage, user.user_id, "d");

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (tx_c, mut rx_c) = mpsc::channel(8);
        sessions.register(user.user_id, dev_a, tx_a);
        sessions.register(user.user_id, dev_b, tx_b);
        sessions.register(user.user_id, dev_c, tx_c);
        // dev_d never connects.

        let (record, mut delivered) = engine
            .create_sync(user.user_id, dev_a, payload("shared"))
            .unwrap();
        delivered.sort();
        let mut expected = vec![dev_b, dev_c];
        expected.sort();
        assert_eq!(delivered, expected);

        assert!(rx_a.try_recv().is_err());
        for rx in [&mut rx_b, &mut rx_c] {
            let frame = rx.try_recv().unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["event"], "sync:data");
            assert_eq!(value["data"]["record"]["content"], "shared");
        }

        // Pending for pushed targets, nothing for the offline device.
        let status_b = storage
            .find_delivery_status(record.sync_id, dev_b)
            .unwrap()
            .unwrap();
        assert_eq!(status_b.state, SyncState::Pending);
        assert!(storage
            .find_delivery_status(record.sync_id, dev_d)
            .unwrap()
            .is_none());
    }

    #[test]
    fn explicit_targets_restrict_fan_out() {
        let (engine, storage, sessions) = engine();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let dev_a = seed_device(&storage, user.user_id, "a");
        let dev_b = seed_device(&storage, user.user_id, "b");
        let dev_c = seed_device(&storage, user.user_id, "c");

        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (tx_c, mut rx_c) = mpsc::channel(8);
        sessions.register(user.user_id, dev_b, tx_b);
        sessions.register(user.user_id, dev_c, tx_c);

        let mut targeted = payload("just for b");
        targeted.target_devices = Some(vec![dev_b]);
        let (_, delivered) = engine.create_sync(user.user_id, dev_a, targeted).unwrap();

        assert_eq!(delivered, vec![dev_b]);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn rejects_empty_and_oversized_content() {
        let (engine, storage, _) = engine();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let device = seed_device(&storage, user.user_id, "a");

        let err = engine
            .create_sync(user.user_id, device, payload(""))
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = engine
            .create_sync(user.user_id, device, payload(&"x".repeat(2048)))
            .unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge));
    }

    #[test]
    fn foreign_device_cannot_submit() {
        let (engine, storage, _) = engine();
        let alice = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let bob = storage.create_user("b@x.com", "bob", "h", "v2").unwrap();
        let bobs_device = seed_device(&storage, bob.user_id, "b");

        let err = engine
            .create_sync(alice.user_id, bobs_device, payload("x"))
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn acknowledge_is_idempotent_and_stamps_success() {
        let (engine, storage, _) = engine();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let dev_a = seed_device(&storage, user.user_id, "a");
        let dev_b = seed_device(&storage, user.user_id, "b");

        let (record, _) = engine
            .create_sync(user.user_id, dev_a, payload("x"))
            .unwrap();

        engine.acknowledge(user.user_id, dev_b, record.sync_id).unwrap();
        engine.acknowledge(user.user_id, dev_b, record.sync_id).unwrap();

        let status = storage
            .find_delivery_status(record.sync_id, dev_b)
            .unwrap()
            .unwrap();
        assert_eq!(status.state, SyncState::Completed);
        assert!(status.last_successful_sync.is_some());
    }

    #[test]
    fn recent_listing_reflects_writes_through_the_cache() {
        let (engine, storage, _) = engine();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let device = seed_device(&storage, user.user_id, "a");

        engine
            .create_sync(user.user_id, device, payload("first"))
            .unwrap();
        assert_eq!(
            engine.list_recent(user.user_id, &SyncFilter::default()).unwrap().len(),
            1
        );

        // A second write must invalidate the cached listing.
        engine
            .create_sync(user.user_id, device, payload("second"))
            .unwrap();
        let recent = engine.list_recent(user.user_id, &SyncFilter::default()).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "second");
    }

    #[test]
    fn soft_delete_fans_out_and_refuses_repeats() {
        let (engine, storage, sessions) = engine();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let dev_a = seed_device(&storage, user.user_id, "a");
        let dev_b = seed_device(&storage, user.user_id, "b");

        let (tx_b, mut rx_b) = mpsc::channel(8);
        sessions.register(user.user_id, dev_b, tx_b);

        let (record, _) = engine
            .create_sync(user.user_id, dev_a, payload("bye"))
            .unwrap();
        rx_b.try_recv().unwrap(); // drain the sync:data frame

        engine.soft_delete(user.user_id, dev_a, record.sync_id).unwrap();
        let frame = rx_b.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "sync:deleted");

        let err = engine
            .soft_delete(user.user_id, dev_a, record.sync_id)
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
