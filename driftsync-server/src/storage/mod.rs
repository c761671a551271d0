//! SQLite storage backend.
//!
//! One durable store for users, devices, refresh-token records, sync
//! records, per-device delivery status, and the security-event audit log.
//! SQLite transactions back the registration uniqueness check and the
//! conditional refresh-token rotation.

mod devices;
mod security;
mod sync;
mod users;

pub use devices::NewDevice;
pub use security::NewSecurityEvent;
pub use sync::{NewSyncRecord, SyncFilter};

use crate::error::ApiError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe storage handle.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self, anyhow::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> Result<(), anyhow::Error> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                email_verified INTEGER NOT NULL DEFAULT 0,
                verification_token TEXT,
                reset_password_token TEXT,
                reset_token_expires INTEGER,
                account_status TEXT NOT NULL DEFAULT 'active',
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS devices (
                device_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_name TEXT NOT NULL,
                device_type TEXT NOT NULL,
                os_type TEXT NOT NULL,
                browser_type TEXT NOT NULL,
                last_ip_address TEXT,
                device_token TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                sync_enabled INTEGER NOT NULL DEFAULT 1,
                auto_sync INTEGER NOT NULL DEFAULT 1,
                sync_interval INTEGER NOT NULL DEFAULT 300,
                last_active INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (user_id, device_token),
                FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS device_auth (
                auth_id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                is_valid INTEGER NOT NULL DEFAULT 1,
                issued_at INTEGER NOT NULL,
                revoked_at INTEGER,
                revoked_by_ip TEXT,
                FOREIGN KEY (device_id) REFERENCES devices(device_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS sync_records (
                sync_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                source_device_id TEXT NOT NULL,
                content_type TEXT NOT NULL,
                content TEXT NOT NULL,
                content_timestamp INTEGER NOT NULL,
                metadata TEXT,
                parent_sync_id TEXT,
                version INTEGER NOT NULL DEFAULT 1,
                size_bytes INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS sync_delivery_status (
                sync_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                state TEXT NOT NULL,
                last_sync_attempt INTEGER,
                last_successful_sync INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                conflict_resolution TEXT,
                PRIMARY KEY (sync_id, device_id),
                FOREIGN KEY (sync_id) REFERENCES sync_records(sync_id) ON DELETE CASCADE,
                FOREIGN KEY (device_id) REFERENCES devices(device_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS security_events (
                event_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                description TEXT NOT NULL,
                ip_address TEXT,
                is_resolved INTEGER NOT NULL DEFAULT 0,
                resolution_notes TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_devices_user
                ON devices(user_id);
            CREATE INDEX IF NOT EXISTS idx_device_auth_device
                ON device_auth(device_id, is_valid);
            CREATE INDEX IF NOT EXISTS idx_device_auth_token
                ON device_auth(refresh_token);
            CREATE INDEX IF NOT EXISTS idx_sync_records_user_created
                ON sync_records(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_sync_records_user_favorite
                ON sync_records(user_id, is_favorite);
            CREATE INDEX IF NOT EXISTS idx_security_events_user_created
                ON security_events(user_id, created_at DESC);",
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ApiError> {
        self.conn
            .lock()
            .map_err(|e| ApiError::Internal(format!("Lock error: {}", e)))
    }
}
