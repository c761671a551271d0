//! Device and refresh-token-record queries.

use super::Storage;
use crate::error::ApiError;
use chrono::Utc;
use driftsync_core::models::{Device, DeviceAuth, DeviceType};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

/// Fields for registering a device on first sight of a fingerprint.
pub struct NewDevice {
    pub user_id: Uuid,
    pub device_name: String,
    pub device_type: DeviceType,
    pub os_type: String,
    pub browser_type: String,
    pub device_token: String,
    pub ip_address: Option<String>,
}

fn map_device(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        device_id: row
            .get::<_, String>(0)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        user_id: row
            .get::<_, String>(1)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        device_name: row.get(2)?,
        device_type: DeviceType::parse(&row.get::<_, String>(3)?),
        os_type: row.get(4)?,
        browser_type: row.get(5)?,
        last_ip_address: row.get(6)?,
        device_token: row.get(7)?,
        is_active: row.get(8)?,
        sync_enabled: row.get(9)?,
        auto_sync: row.get(10)?,
        sync_interval: row.get(11)?,
        last_active: row.get(12)?,
        created_at: row.get(13)?,
    })
}

const DEVICE_COLUMNS: &str = "device_id, user_id, device_name, device_type, os_type, \
     browser_type, last_ip_address, device_token, is_active, sync_enabled, auto_sync, \
     sync_interval, last_active, created_at";

impl Storage {
    pub fn find_device(&self, device_id: Uuid) -> Result<Option<Device>, ApiError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = ?1"),
            [device_id.to_string()],
            map_device,
        )
        .optional()
        .map_err(|e| ApiError::Database(e.to_string()))
    }

    /// Fingerprint lookup: the identity that makes re-logins from the
    /// same physical client reuse the same device row.
    pub fn find_device_by_token(
        &self,
        user_id: Uuid,
        device_token: &str,
    ) -> Result<Option<Device>, ApiError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = ?1 AND device_token = ?2"
            ),
            params![user_id.to_string(), device_token],
            map_device,
        )
        .optional()
        .map_err(|e| ApiError::Database(e.to_string()))
    }

    pub fn list_user_devices(&self, user_id: Uuid) -> Result<Vec<Device>, ApiError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = ?1 ORDER BY last_active DESC"
        ))?;
        let devices = stmt
            .query_map([user_id.to_string()], map_device)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    pub fn create_device(&self, new: NewDevice) -> Result<Device, ApiError> {
        let now = Utc::now().timestamp();
        let device = Device {
            device_id: Uuid::new_v4(),
            user_id: new.user_id,
            device_name: new.device_name,
            device_type: new.device_type,
            os_type: new.os_type,
            browser_type: new.browser_type,
            last_ip_address: new.ip_address,
            device_token: new.device_token,
            is_active: true,
            sync_enabled: true,
            auto_sync: true,
            sync_interval: 300,
            last_active: now,
            created_at: now,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO devices (device_id, user_id, device_name, device_type, os_type,
                                  browser_type, last_ip_address, device_token, is_active,
                                  sync_enabled, auto_sync, sync_interval, last_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, 1, 1, 300, ?9, ?9)",
            params![
                device.device_id.to_string(),
                device.user_id.to_string(),
                device.device_name,
                device.device_type.as_str(),
                device.os_type,
                device.browser_type,
                device.last_ip_address,
                device.device_token,
                now,
            ],
        )?;
        Ok(device)
    }

    /// Routine re-login: reactivate and refresh last-seen metadata.
    pub fn reactivate_device(
        &self,
        device_id: Uuid,
        ip_address: Option<&str>,
    ) -> Result<(), ApiError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE devices SET is_active = 1, last_active = ?1,
                    last_ip_address = COALESCE(?2, last_ip_address)
             WHERE device_id = ?3",
            params![Utc::now().timestamp(), ip_address, device_id.to_string()],
        )?;
        Ok(())
    }

    /// Connect/disconnect bookkeeping from the session directory.
    pub fn update_device_status(&self, device_id: Uuid, is_connected: bool) -> Result<(), ApiError> {
        let conn = self.conn()?;
        if is_connected {
            conn.execute(
                "UPDATE devices SET is_active = 1, last_active = ?1 WHERE device_id = ?2",
                params![Utc::now().timestamp(), device_id.to_string()],
            )?;
        } else {
            conn.execute(
                "UPDATE devices SET is_active = 0, last_active = ?1 WHERE device_id = ?2",
                params![Utc::now().timestamp(), device_id.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn update_device_settings(
        &self,
        device_id: Uuid,
        device_name: Option<&str>,
        sync_enabled: Option<bool>,
        auto_sync: Option<bool>,
        sync_interval: Option<u32>,
    ) -> Result<(), ApiError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE devices SET
                device_name = COALESCE(?1, device_name),
                sync_enabled = COALESCE(?2, sync_enabled),
                auto_sync = COALESCE(?3, auto_sync),
                sync_interval = COALESCE(?4, sync_interval)
             WHERE device_id = ?5",
            params![
                device_name,
                sync_enabled,
                auto_sync,
                sync_interval,
                device_id.to_string()
            ],
        )?;
        Ok(())
    }

    /// Removes the device; auth rows and delivery statuses cascade.
    pub fn delete_device(&self, device_id: Uuid) -> Result<(), ApiError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM devices WHERE device_id = ?1",
            [device_id.to_string()],
        )?;
        Ok(())
    }

    pub fn create_device_auth(
        &self,
        device_id: Uuid,
        refresh_token: &str,
        expires_at: i64,
    ) -> Result<DeviceAuth, ApiError> {
        let auth = DeviceAuth {
            auth_id: Uuid::new_v4(),
            device_id,
            refresh_token: refresh_token.to_string(),
            expires_at,
            is_valid: true,
            issued_at: Utc::now().timestamp(),
            revoked_at: None,
            revoked_by_ip: None,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO device_auth (auth_id, device_id, refresh_token, expires_at,
                                      is_valid, issued_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                auth.auth_id.to_string(),
                device_id.to_string(),
                refresh_token,
                expires_at,
                auth.issued_at,
            ],
        )?;
        Ok(auth)
    }

    /// Conditionally invalidates the presented refresh-token row.
    ///
    /// The `is_valid = 1` predicate is the rotation guard: of two
    /// concurrent refresh attempts carrying the same token, only the one
    /// that flips the row observes `true`; the loser sees zero rows
    /// changed and must fail.
    pub fn rotate_device_auth(
        &self,
        device_id: Uuid,
        refresh_token: &str,
        revoked_by_ip: Option<&str>,
    ) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE device_auth SET is_valid = 0, revoked_at = ?1, revoked_by_ip = ?2
             WHERE device_id = ?3 AND refresh_token = ?4 AND is_valid = 1",
            params![
                Utc::now().timestamp(),
                revoked_by_ip,
                device_id.to_string(),
                refresh_token,
            ],
        )?;
        Ok(changed == 1)
    }

    /// Checks the presented refresh token is still the authoritative one.
    pub fn is_refresh_token_valid(
        &self,
        device_id: Uuid,
        refresh_token: &str,
    ) -> Result<bool, ApiError> {
        let conn = self.conn()?;
        let valid: bool = conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM device_auth
                 WHERE device_id = ?1 AND refresh_token = ?2
                   AND is_valid = 1 AND expires_at > ?3)",
            params![
                device_id.to_string(),
                refresh_token,
                Utc::now().timestamp()
            ],
        |row| row.get(0),
        )?;
        Ok(valid)
    }

    /// Logout and device removal revoke every token for the device, not
    /// just the current one.
    pub fn invalidate_all_device_auth(
        &self,
        device_id: Uuid,
        revoked_by_ip: Option<&str>,
    ) -> Result<usize, ApiError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE device_auth SET is_valid = 0, revoked_at = ?1, revoked_by_ip = ?2
             WHERE device_id = ?3 AND is_valid = 1",
            params![
                Utc::now().timestamp(),
                revoked_by_ip,
                device_id.to_string()
            ],
        )?;
        Ok(changed)
    }

    /// Drops rows that expired past their validity window.
    pub fn prune_expired_device_auth(&self) -> Result<usize, ApiError> {
        let conn = self.conn()?;
        let pruned = conn.execute(
            "DELETE FROM device_auth WHERE expires_at < ?1",
            [Utc::now().timestamp()],
        )?;
        Ok(pruned)
    }
}
