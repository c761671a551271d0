//! DriftSync Core Library
//!
//! This library provides the domain types shared by the DriftSync server
//! and clients: sync/device/user models, the signed-token service, and
//! deterministic device fingerprinting.

pub mod fingerprint;
pub mod models;
pub mod token;

pub use fingerprint::DeviceFingerprint;
pub use models::{
    AccountStatus, ContentType, Device, DeviceAuth, DeviceStats, DeviceType, SecurityEvent,
    SecurityEventType, Severity, SyncDeliveryStatus, SyncRecord, SyncState, User,
};
pub use token::{Claims, TokenError, TokenKind, TokenService};

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// General error type for core domain operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Token error: {0}")]
    Token(#[from] token::TokenError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
