//! In-process read cache for sync listings.
//!
//! Keys follow a `sync:{kind}:{user_id}[:{identifier}]` shape so entries
//! for one user can be swept together after a write. File entries live
//! longer than the rest because file paths change rarely.

use driftsync_core::models::SyncRecord;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Entry {
    records: Vec<SyncRecord>,
    expires_at: Instant,
}

pub struct SyncCache {
    entries: Mutex<HashMap<String, Entry>>,
    default_ttl: Duration,
    file_ttl: Duration,
}

impl SyncCache {
    pub fn new(default_ttl: Duration, file_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
            file_ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn key(kind: &str, user_id: Uuid, identifier: Option<&str>) -> String {
        match identifier {
            Some(id) => format!("sync:{}:{}:{}", kind, user_id, id),
            None => format!("sync:{}:{}", kind, user_id),
        }
    }

    pub fn get(&self, kind: &str, user_id: Uuid, identifier: Option<&str>) -> Option<Vec<SyncRecord>> {
        let key = Self::key(kind, user_id, identifier);
        let mut entries = self.lock();
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.records.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(
        &self,
        kind: &str,
        user_id: Uuid,
        identifier: Option<&str>,
        records: Vec<SyncRecord>,
    ) {
        let ttl = if kind == "file" {
            self.file_ttl
        } else {
            self.default_ttl
        };
        let key = Self::key(kind, user_id, identifier);
        self.lock().insert(
            key,
            Entry {
                records,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drops every cached listing for one user. Called after any write
    /// that could change what a listing returns.
    pub fn invalidate_user(&self, user_id: Uuid) {
        let marker = format!(":{}", user_id);
        self.lock()
            .retain(|key, _| !key.contains(&marker));
    }

    /// Sweeps expired entries; run from the periodic maintenance task.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use driftsync_core::models::ContentType;

    fn record(user_id: Uuid) -> SyncRecord {
        SyncRecord {
            sync_id: Uuid::new_v4(),
            user_id,
            source_device_id: Uuid::new_v4(),
            content_type: ContentType::Clipboard,
            content: "cached".to_string(),
            content_timestamp: Utc::now().timestamp(),
            metadata: None,
            parent_sync_id: None,
            version: 1,
            size_bytes: 6,
            checksum: "c".to_string(),
            is_deleted: false,
            is_favorite: false,
            created_at: Utc::now().timestamp(),
        }
    }

    #[test]
    fn hit_within_ttl() {
        let cache = SyncCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let user = Uuid::new_v4();
        cache.put("recent", user, None, vec![record(user)]);

        let hit = cache.get("recent", user, None).unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].content, "cached");
    }

    #[test]
    fn expired_entries_miss() {
        let cache = SyncCache::new(Duration::ZERO, Duration::ZERO);
        let user = Uuid::new_v4();
        cache.put("recent", user, None, vec![record(user)]);
        assert!(cache.get("recent", user, None).is_none());
    }

    #[test]
    fn invalidation_is_scoped_to_one_user() {
        let cache = SyncCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
        cache.put("recent", user_a, None, vec![record(user_a)]);
        cache.put("favorites", user_a, None, vec![record(user_a)]);
        cache.put("recent", user_b, None, vec![record(user_b)]);

        cache.invalidate_user(user_a);
        assert!(cache.get("recent", user_a, None).is_none());
        assert!(cache.get("favorites", user_a, None).is_none());
        assert!(cache.get("recent", user_b, None).is_some());
    }

    #[test]
    fn eviction_reports_swept_count() {
        let cache = SyncCache::new(Duration::ZERO, Duration::from_secs(60));
        let user = Uuid::new_v4();
        cache.put("recent", user, None, vec![record(user)]);
        cache.put("file", user, None, vec![record(user)]);

        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.get("file", user, None).is_some());
    }
}
