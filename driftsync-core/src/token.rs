//! Signed token service for access and refresh tokens.
//!
//! Tokens are HMAC-SHA256 signed claim sets:
//!
//! ```text
//! base64url(claims_json) "." base64url(hmac_sha256(secret, claims_b64))
//! ```
//!
//! Access and refresh tokens are signed with **separate secrets**, so a
//! leaked access-token secret cannot mint refresh tokens. Verification is
//! purely cryptographic; persistence of the refresh-token *record* (and
//! its rotation) is the caller's responsibility.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default access-token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
/// Default refresh-token lifetime: 7 days.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Token verification failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Wrong token type")]
    WrongTokenType,
}

/// Discriminates access tokens from refresh tokens inside the claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims embedded in every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Owning user.
    pub sub: Uuid,
    /// Device the token is bound to.
    pub device_id: Uuid,
    #[serde(rename = "type")]
    pub token_type: TokenKind,
    /// Unique id of this token. Without it, two tokens minted for the
    /// same (user, device) within one second would be byte-identical,
    /// and rotating a refresh token could re-persist the very string it
    /// just revoked.
    pub jti: Uuid,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Issues and verifies access/refresh token pairs.
#[derive(Clone)]
pub struct TokenService {
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    /// Creates a token service with default lifetimes.
    pub fn new(access_secret: impl Into<Vec<u8>>, refresh_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
        }
    }

    /// Overrides the access-token lifetime.
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    /// Overrides the refresh-token lifetime.
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    /// Refresh-token lifetime, for callers persisting the token record.
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issues a short-lived access token bound to (user, device).
    pub fn issue_access(&self, user_id: Uuid, device_id: Uuid) -> String {
        self.issue(user_id, device_id, TokenKind::Access, self.access_ttl)
    }

    /// Issues a long-lived refresh token bound to (user, device).
    pub fn issue_refresh(&self, user_id: Uuid, device_id: Uuid) -> String {
        self.issue(user_id, device_id, TokenKind::Refresh, self.refresh_ttl)
    }

    /// Verifies an access token and returns its claims.
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenKind::Access, &self.access_secret)
    }

    /// Verifies a refresh token and returns its claims.
    ///
    /// Fails with [`TokenError::WrongTokenType`] when handed a token whose
    /// claims do not carry `type = "refresh"`.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenKind::Refresh, &self.refresh_secret)
    }

    fn issue(&self, user_id: Uuid, device_id: Uuid, kind: TokenKind, ttl: Duration) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            device_id,
            token_type: kind,
            jti: Uuid::new_v4(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        };
        let secret = match kind {
            TokenKind::Access => &self.access_secret,
            TokenKind::Refresh => &self.refresh_secret,
        };

        // Claims is a closed struct; serialization cannot fail.
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let sig = URL_SAFE_NO_PAD.encode(sign(secret, body.as_bytes()));
        format!("{body}.{sig}")
    }

    fn verify(&self, token: &str, expected: TokenKind, secret: &[u8]) -> Result<Claims, TokenError> {
        let (body, sig) = token.split_once('.').ok_or(TokenError::Malformed)?;

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| TokenError::Malformed)?;
        let expected_sig = sign(secret, body.as_bytes());
        if sig_bytes != expected_sig {
            return Err(TokenError::InvalidSignature);
        }

        let claims_json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&claims_json).map_err(|_| TokenError::Malformed)?;

        if claims.token_type != expected {
            return Err(TokenError::WrongTokenType);
        }
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

fn sign(secret: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}
