//! Sync-record and delivery-status queries.

use super::Storage;
use crate::error::ApiError;
use chrono::Utc;
use driftsync_core::models::{
    ContentType, DeviceStats, SyncDeliveryStatus, SyncRecord, SyncState,
};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

/// Fields persisted for one submitted content event.
pub struct NewSyncRecord {
    pub user_id: Uuid,
    pub source_device_id: Uuid,
    pub content_type: ContentType,
    pub content: String,
    pub content_timestamp: i64,
    pub metadata: Option<serde_json::Value>,
    pub parent_sync_id: Option<Uuid>,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Filters for recent-sync listings.
#[derive(Debug, Clone, Default)]
pub struct SyncFilter {
    pub content_type: Option<ContentType>,
    /// Unix seconds; only records created strictly after this instant.
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<SyncRecord> {
    let metadata: Option<String> = row.get(6)?;
    Ok(SyncRecord {
        sync_id: row
            .get::<_, String>(0)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        user_id: row
            .get::<_, String>(1)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        source_device_id: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        content_type: ContentType::parse(&row.get::<_, String>(3)?)
            .unwrap_or(ContentType::Clipboard),
        content: row.get(4)?,
        content_timestamp: row.get(5)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        parent_sync_id: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| s.parse().ok()),
        version: row.get(8)?,
        size_bytes: row.get::<_, i64>(9)? as u64,
        checksum: row.get(10)?,
        is_deleted: row.get(11)?,
        is_favorite: row.get(12)?,
        created_at: row.get(13)?,
    })
}

const RECORD_COLUMNS: &str = "sync_id, user_id, source_device_id, content_type, content, \
     content_timestamp, metadata, parent_sync_id, version, size_bytes, checksum, is_deleted, \
     is_favorite, created_at";

impl Storage {
    pub fn create_sync_record(&self, new: NewSyncRecord) -> Result<SyncRecord, ApiError> {
        let record = SyncRecord {
            sync_id: Uuid::new_v4(),
            user_id: new.user_id,
            source_device_id: new.source_device_id,
            content_type: new.content_type,
            content: new.content,
            content_timestamp: new.content_timestamp,
            metadata: new.metadata,
            parent_sync_id: new.parent_sync_id,
            version: 1,
            size_bytes: new.size_bytes,
            checksum: new.checksum,
            is_deleted: false,
            is_favorite: false,
            created_at: Utc::now().timestamp(),
        };

        let metadata_json = record
            .metadata
            .as_ref()
            .map(|m| m.to_string());

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_records (sync_id, user_id, source_device_id, content_type,
                                       content, content_timestamp, metadata, parent_sync_id,
                                       version, size_bytes, checksum, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10, ?11)",
            params![
                record.sync_id.to_string(),
                record.user_id.to_string(),
                record.source_device_id.to_string(),
                record.content_type.as_str(),
                record.content,
                record.content_timestamp,
                metadata_json,
                record.parent_sync_id.map(|id| id.to_string()),
                record.size_bytes as i64,
                record.checksum,
                record.created_at,
            ],
        )?;
        Ok(record)
    }

    /// Finds a non-deleted record owned by the caller. Foreign or deleted
    /// records are indistinguishable from absent ones.
    pub fn find_sync_record(
        &self,
        sync_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<SyncRecord>, ApiError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM sync_records
                 WHERE sync_id = ?1 AND user_id = ?2 AND is_deleted = 0"
            ),
            params![sync_id.to_string(), user_id.to_string()],
            map_record,
        )
        .optional()
        .map_err(|e| ApiError::Database(e.to_string()))
    }

    /// Non-deleted records, newest first.
    pub fn list_recent(
        &self,
        user_id: Uuid,
        filter: &SyncFilter,
        default_limit: usize,
    ) -> Result<Vec<SyncRecord>, ApiError> {
        let limit = filter.limit.unwrap_or(default_limit) as i64;
        let content_type = filter.content_type.map(|t| t.as_str());
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records
             WHERE user_id = ?1 AND is_deleted = 0
               AND (?2 IS NULL OR content_type = ?2)
               AND (?3 IS NULL OR created_at > ?3)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?4"
        ))?;
        let records = stmt
            .query_map(
                params![user_id.to_string(), content_type, filter.since, limit],
                map_record,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn list_favorites(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SyncRecord>, ApiError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records
             WHERE user_id = ?1 AND is_favorite = 1 AND is_deleted = 0
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let records = stmt
            .query_map(params![user_id.to_string(), limit as i64], map_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Flips `is_favorite` on an owned, non-deleted record; returns the
    /// new state.
    pub fn toggle_favorite(&self, sync_id: Uuid, user_id: Uuid) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_records SET is_favorite = NOT is_favorite
             WHERE sync_id = ?1 AND user_id = ?2 AND is_deleted = 0",
            params![sync_id.to_string(), user_id.to_string()],
        )?;
        if changed == 0 {
            return Err(ApiError::NotFound("Sync not found".to_string()));
        }

        let is_favorite: bool = conn.query_row(
            "SELECT is_favorite FROM sync_records WHERE sync_id = ?1",
            [sync_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(is_favorite)
    }

    /// Soft-deletes an owned record. Already-deleted records fail
    /// NotFound, which makes a second delete of the same id an error.
    pub fn soft_delete(&self, sync_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sync_records SET is_deleted = 1
             WHERE sync_id = ?1 AND user_id = ?2 AND is_deleted = 0",
            params![sync_id.to_string(), user_id.to_string()],
        )?;
        if changed == 0 {
            return Err(ApiError::NotFound("Sync not found".to_string()));
        }
        Ok(())
    }

    /// Per-content-type counts of live records.
    pub fn device_stats(&self, user_id: Uuid) -> Result<DeviceStats, ApiError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT content_type, COUNT(*) FROM sync_records
             WHERE user_id = ?1 AND is_deleted = 0
             GROUP BY content_type",
        )?;
        let mut stats = DeviceStats::default();
        let rows = stmt.query_map([user_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (ty, count) = row?;
            match ContentType::parse(&ty) {
                Some(ContentType::Clipboard) => stats.clipboard = count,
                Some(ContentType::Link) => stats.link = count,
                Some(ContentType::File) => stats.file = count,
                Some(ContentType::Note) => stats.note = count,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Idempotent upsert of one device's delivery state for one sync.
    ///
    /// Every state stamps `last_sync_attempt`; `Completed` also stamps
    /// `last_successful_sync`. Repeats bump `retry_count`.
    pub fn upsert_delivery_status(
        &self,
        sync_id: Uuid,
        device_id: Uuid,
        state: SyncState,
        error_message: Option<&str>,
    ) -> Result<(), ApiError> {
        let now = Utc::now().timestamp();
        let success_at = (state == SyncState::Completed).then_some(now);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_delivery_status (sync_id, device_id, state, last_sync_attempt,
                                               last_successful_sync, retry_count, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
             ON CONFLICT(sync_id, device_id) DO UPDATE SET
                state = excluded.state,
                last_sync_attempt = excluded.last_sync_attempt,
                last_successful_sync = COALESCE(excluded.last_successful_sync,
                                                last_successful_sync),
                retry_count = retry_count + 1,
                error_message = excluded.error_message",
            params![
                sync_id.to_string(),
                device_id.to_string(),
                state.as_str(),
                now,
                success_at,
                error_message,
            ],
        )?;
        Ok(())
    }

    pub fn find_delivery_status(
        &self,
        sync_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<SyncDeliveryStatus>, ApiError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT sync_id, device_id, state, last_sync_attempt, last_successful_sync,
                    retry_count, error_message, conflict_resolution
             FROM sync_delivery_status WHERE sync_id = ?1 AND device_id = ?2",
            params![sync_id.to_string(), device_id.to_string()],
            |row| {
                Ok(SyncDeliveryStatus {
                    sync_id: row
                        .get::<_, String>(0)?
                        .parse()
                        .unwrap_or_else(|_| Uuid::nil()),
                    device_id: row
                        .get::<_, String>(1)?
                        .parse()
                        .unwrap_or_else(|_| Uuid::nil()),
                    state: SyncState::parse(&row.get::<_, String>(2)?),
                    last_sync_attempt: row.get(3)?,
                    last_successful_sync: row.get(4)?,
                    retry_count: row.get(5)?,
                    error_message: row.get(6)?,
                    conflict_resolution: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(|e| ApiError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewDevice;
    use driftsync_core::models::DeviceType;

    fn seed(storage: &Storage) -> (Uuid, Uuid) {
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();
        let device = storage
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

    fn new_record(user_id: Uuid, device_id: Uuid, content: &str) -> NewSyncRecord {
        NewSyncRecord {
            user_id,
            source_device_id: device_id,
            content_type: ContentType::Clipboard,
            content: content.to_string(),
            content_timestamp: Utc::now().timestamp(),
            metadata: None,
            parent_sync_id: None,
            size_bytes: content.len() as u64,
            checksum: "abc".to_string(),
        }
    }

    #[test]
    fn create_and_list_recent() {
        let storage = Storage::in_memory().unwrap();
        let (user_id, device_id) = seed(&storage);

        storage
            .create_sync_record(new_record(user_id, device_id, "one"))
            .unwrap();
        storage
            .create_sync_record(new_record(user_id, device_id, "two"))
            .unwrap();

        let recent = storage
            .list_recent(user_id, &SyncFilter::default(), 50)
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].version, 1);
    }

    #[test]
    fn same_second_records_list_newest_submission_first() {
        let storage = Storage::in_memory().unwrap();
        let (user_id, device_id) = seed(&storage);

        // created_at has second granularity, so back-to-back inserts
        // share a timestamp; insertion order must break the tie.
        storage
            .create_sync_record(new_record(user_id, device_id, "first"))
            .unwrap();
        storage
            .create_sync_record(new_record(user_id, device_id, "second"))
            .unwrap();

        let recent = storage
            .list_recent(user_id, &SyncFilter::default(), 50)
            .unwrap();
        assert_eq!(recent[0].content, "second");
        assert_eq!(recent[1].content, "first");
    }

    #[test]
    fn filters_apply() {
        let storage = Storage::in_memory().unwrap();
        let (user_id, device_id) = seed(&storage);

        let mut note = new_record(user_id, device_id, "a note");
        note.content_type = ContentType::Note;
        storage.create_sync_record(note).unwrap();
        storage
            .create_sync_record(new_record(user_id, device_id, "clip"))
            .unwrap();

        let notes = storage
            .list_recent(
                user_id,
                &SyncFilter {
                    content_type: Some(ContentType::Note),
                    ..SyncFilter::default()
                },
                50,
            )
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "a note");

        let limited = storage
            .list_recent(
                user_id,
                &SyncFilter {
                    limit: Some(1),
                    ..SyncFilter::default()
                },
                50,
            )
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn toggle_favorite_roundtrip() {
        let storage = Storage::in_memory().unwrap();
        let (user_id, device_id) = seed(&storage);
        let record = storage
            .create_sync_record(new_record(user_id, device_id, "fav"))
            .unwrap();

        assert!(storage.toggle_favorite(record.sync_id, user_id).unwrap());
        assert!(!storage.toggle_favorite(record.sync_id, user_id).unwrap());

        let persisted = storage
            .find_sync_record(record.sync_id, user_id)
            .unwrap()
            .unwrap();
        assert!(!persisted.is_favorite);
    }

    #[test]
    fn foreign_record_is_not_found() {
        let storage = Storage::in_memory().unwrap();
        let (user_id, device_id) = seed(&storage);
        let other = storage.create_user("b@x.com", "bob", "h", "v2").unwrap();

        let record = storage
            .create_sync_record(new_record(user_id, device_id, "mine"))
            .unwrap();

        let err = storage
            .toggle_favorite(record.sync_id, other.user_id)
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn soft_delete_is_not_repeatable() {
        let storage = Storage::in_memory().unwrap();
        let (user_id, device_id) = seed(&storage);
        let record = storage
            .create_sync_record(new_record(user_id, device_id, "gone"))
            .unwrap();

        storage.soft_delete(record.sync_id, user_id).unwrap();
        let err = storage.soft_delete(record.sync_id, user_id).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        // Deleted records disappear from listings.
        let recent = storage
            .list_recent(user_id, &SyncFilter::default(), 50)
            .unwrap();
        assert!(recent.is_empty());
    }

    #[test]
    fn delivery_status_upsert_is_idempotent() {
        let storage = Storage::in_memory().unwrap();
        let (user_id, device_id) = seed(&storage);
        let record = storage
            .create_sync_record(new_record(user_id, device_id, "x"))
            .unwrap();

        storage
            .upsert_delivery_status(record.sync_id, device_id, SyncState::Pending, None)
            .unwrap();
        storage
            .upsert_delivery_status(record.sync_id, device_id, SyncState::Completed, None)
            .unwrap();

        let status = storage
            .find_delivery_status(record.sync_id, device_id)
            .unwrap()
            .unwrap();
        assert_eq!(status.state, SyncState::Completed);
        assert!(status.last_successful_sync.is_some());
        assert!(status.last_sync_attempt.is_some());
        assert_eq!(status.retry_count, 1);
    }

    #[test]
    fn device_stats_count_by_type() {
        let storage = Storage::in_memory().unwrap();
        let (user_id, device_id) = seed(&storage);

        storage
            .create_sync_record(new_record(user_id, device_id, "clip"))
            .unwrap();
        let mut link = new_record(user_id, device_id, "https://x");
        link.content_type = ContentType::Link;
        storage.create_sync_record(link).unwrap();

        let stats = storage.device_stats(user_id).unwrap();
        assert_eq!(stats.clipboard, 1);
        assert_eq!(stats.link, 1);
        assert_eq!(stats.note, 0);
    }
}
