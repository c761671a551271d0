//! Domain models: users, devices, sync records, delivery status, audit events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account lifecycle state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
    Deactivated,
}

impl AccountStatus {
    /// Convert account status to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deactivated => "deactivated",
        }
    }

    /// Parse an account status from its string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "suspended" => Self::Suspended,
            "deactivated" => Self::Deactivated,
            _ => Self::Active,
        }
    }
}

/// A registered user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    /// Lowercase-normalized, globally unique.
    pub email: String,
    /// Globally unique.
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email_verified: bool,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_password_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires: Option<i64>,
    pub account_status: AccountStatus,
    pub created_at: i64,
}

/// Physical client classification derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    /// Convert device type to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
        }
    }

    /// Parse a device type from its string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "mobile" => Self::Mobile,
            "tablet" => Self::Tablet,
            _ => Self::Desktop,
        }
    }
}

/// One physical/browser client bound to exactly one user.
///
/// `(user_id, device_token)` is unique: a re-login from the same physical
/// client reuses the existing row instead of creating a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub device_name: String,
    pub device_type: DeviceType,
    pub os_type: String,
    pub browser_type: String,
    pub last_ip_address: Option<String>,
    /// Deterministic fingerprint of the client (see [`crate::fingerprint`]).
    pub device_token: String,
    pub is_active: bool,
    pub sync_enabled: bool,
    pub auto_sync: bool,
    pub sync_interval: u32,
    pub last_active: i64,
    pub created_at: i64,
}

/// One issued refresh token.
///
/// Rotation invalidates the predecessor, so at most one valid token is
/// authoritative per device at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuth {
    pub auth_id: Uuid,
    pub device_id: Uuid,
    pub refresh_token: String,
    pub expires_at: i64,
    pub is_valid: bool,
    pub issued_at: i64,
    pub revoked_at: Option<i64>,
    pub revoked_by_ip: Option<String>,
}

/// Kind of synced content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Clipboard,
    Link,
    File,
    Note,
}

impl ContentType {
    /// Convert content type to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clipboard => "clipboard",
            Self::Link => "link",
            Self::File => "file",
            Self::Note => "note",
        }
    }

    /// Parse a content type from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clipboard" => Some(Self::Clipboard),
            "link" => Some(Self::Link),
            "file" => Some(Self::File),
            "note" => Some(Self::Note),
            _ => None,
        }
    }
}

/// One immutable content event.
///
/// Never mutated after creation except the `is_deleted`/`is_favorite`
/// flags and a version bump on explicit update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub sync_id: Uuid,
    pub user_id: Uuid,
    pub source_device_id: Uuid,
    pub content_type: ContentType,
    pub content: String,
    /// Client-side creation instant of the content itself.
    pub content_timestamp: i64,
    pub metadata: Option<serde_json::Value>,
    /// Threading: the sync this one replies to or supersedes.
    pub parent_sync_id: Option<Uuid>,
    pub version: u32,
    pub size_bytes: u64,
    /// Hex SHA-256 of the raw content.
    pub checksum: String,
    pub is_deleted: bool,
    pub is_favorite: bool,
    pub created_at: i64,
}

/// Delivery state of a sync record on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Conflict,
}

impl SyncState {
    /// Convert sync state to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }

    /// Parse a sync state from its string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "conflict" => Self::Conflict,
            _ => Self::Pending,
        }
    }
}

/// One row per (sync record, device) describing whether that device has
/// received and applied the sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDeliveryStatus {
    pub sync_id: Uuid,
    pub device_id: Uuid,
    pub state: SyncState,
    pub last_sync_attempt: Option<i64>,
    pub last_successful_sync: Option<i64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub conflict_resolution: Option<String>,
}

/// Kind of security-relevant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailed,
    DevicePaired,
    DeviceRemoved,
    PasswordChanged,
    SuspiciousActivity,
}

impl SecurityEventType {
    /// Convert event type to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailed => "login_failed",
            Self::DevicePaired => "device_paired",
            Self::DeviceRemoved => "device_removed",
            Self::PasswordChanged => "password_changed",
            Self::SuspiciousActivity => "suspicious_activity",
        }
    }

    /// Parse an event type from its string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "login_success" => Self::LoginSuccess,
            "login_failed" => Self::LoginFailed,
            "device_paired" => Self::DevicePaired,
            "device_removed" => Self::DeviceRemoved,
            "password_changed" => Self::PasswordChanged,
            _ => Self::SuspiciousActivity,
        }
    }
}

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Convert severity to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse a severity from its string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Low,
        }
    }
}

/// Append-only audit record. Resolution is the only mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub description: String,
    pub ip_address: Option<String>,
    pub is_resolved: bool,
    pub resolution_notes: Option<String>,
    pub created_at: i64,
}

/// Per-content-type record counts for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStats {
    pub clipboard: u64,
    pub link: u64,
    pub file: u64,
    pub note: u64,
}
