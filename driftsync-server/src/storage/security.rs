//! Security-event audit log.

use super::Storage;
use crate::error::ApiError;
use chrono::Utc;
use driftsync_core::models::{SecurityEvent, SecurityEventType, Severity};
use rusqlite::{params, Row};
use uuid::Uuid;

/// Fields captured when an auditable event is recorded.
pub struct NewSecurityEvent {
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub description: String,
    pub ip_address: Option<String>,
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<SecurityEvent> {
    Ok(SecurityEvent {
        event_id: row
            .get::<_, String>(0)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        user_id: row
            .get::<_, String>(1)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        device_id: row
            .get::<_, Option<String>>(2)?
            .and_then(|s| s.parse().ok()),
        event_type: SecurityEventType::parse(&row.get::<_, String>(3)?),
        severity: Severity::parse(&row.get::<_, String>(4)?),
        description: row.get(5)?,
        ip_address: row.get(6)?,
        is_resolved: row.get(7)?,
        resolution_notes: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const EVENT_COLUMNS: &str = "event_id, user_id, device_id, event_type, severity, description, \
     ip_address, is_resolved, resolution_notes, created_at";

impl Storage {
    pub fn record_event(&self, new: NewSecurityEvent) -> Result<SecurityEvent, ApiError> {
        let event = SecurityEvent {
            event_id: Uuid::new_v4(),
            user_id: new.user_id,
            device_id: new.device_id,
            event_type: new.event_type,
            severity: new.severity,
            description: new.description,
            ip_address: new.ip_address,
            is_resolved: false,
            resolution_notes: None,
            created_at: Utc::now().timestamp(),
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO security_events (event_id, user_id, device_id, event_type,
                                          severity, description, ip_address, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.event_id.to_string(),
                event.user_id.to_string(),
                event.device_id.map(|id| id.to_string()),
                event.event_type.as_str(),
                event.severity.as_str(),
                event.description,
                event.ip_address,
                event.created_at,
            ],
        )?;
        Ok(event)
    }

    /// Most recent events for a user, newest first.
    pub fn recent_events(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<SecurityEvent>, ApiError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM security_events
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;
        let events = stmt
            .query_map(params![user_id.to_string(), limit as i64], map_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub fn unresolved_events(&self, user_id: Uuid) -> Result<Vec<SecurityEvent>, ApiError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM security_events
             WHERE user_id = ?1 AND is_resolved = 0
             ORDER BY created_at DESC"
        ))?;
        let events = stmt
            .query_map([user_id.to_string()], map_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub fn resolve_event(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        notes: Option<&str>,
    ) -> Result<(), ApiError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE security_events SET is_resolved = 1, resolution_notes = ?1
             WHERE event_id = ?2 AND user_id = ?3",
            params![notes, event_id.to_string(), user_id.to_string()],
        )?;
        if changed == 0 {
            return Err(ApiError::NotFound("Event not found".to_string()));
        }
        Ok(())
    }
}
