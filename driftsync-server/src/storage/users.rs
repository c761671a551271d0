//! User queries: registration, lookup, verification, password reset.

use super::Storage;
use crate::error::ApiError;
use chrono::Utc;
use driftsync_core::models::{AccountStatus, User};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

/// Reset tokens are single-use and time-boxed to 30 minutes.
pub const RESET_TOKEN_TTL_SECS: i64 = 30 * 60;

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row
            .get::<_, String>(0)?
            .parse()
            .unwrap_or_else(|_| Uuid::nil()),
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        email_verified: row.get(4)?,
        verification_token: row.get(5)?,
        reset_password_token: row.get(6)?,
        reset_token_expires: row.get(7)?,
        account_status: AccountStatus::parse(&row.get::<_, String>(8)?),
        created_at: row.get(9)?,
    })
}

const USER_COLUMNS: &str = "user_id, email, username, password_hash, email_verified, \
     verification_token, reset_password_token, reset_token_expires, account_status, created_at";

impl Storage {
    /// Creates a user inside one transaction spanning the uniqueness
    /// check and the insert, so two concurrent registrations sharing an
    /// email (or username) cannot both succeed.
    pub fn create_user(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
        verification_token: &str,
    ) -> Result<User, ApiError> {
        let email = email.trim().to_lowercase();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 OR username = ?2)",
                params![email, username],
                |row| row.get(0),
            )
            .map_err(|e| ApiError::Database(e.to_string()))?;

        if exists {
            return Err(ApiError::Conflict("User already exists".to_string()));
        }

        let user = User {
            user_id: Uuid::new_v4(),
            email,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            email_verified: false,
            verification_token: Some(verification_token.to_string()),
            reset_password_token: None,
            reset_token_expires: None,
            account_status: AccountStatus::Active,
            created_at: Utc::now().timestamp(),
        };

        tx.execute(
            "INSERT INTO users (user_id, email, username, password_hash, email_verified,
                                verification_token, account_status, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
            params![
                user.user_id.to_string(),
                user.email,
                user.username,
                user.password_hash,
                verification_token,
                user.account_status.as_str(),
                user.created_at,
            ],
        )
        .map_err(|e| match e {
            // Unique constraint races lost inside SQLite surface as conflicts too.
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ApiError::Conflict("User already exists".to_string())
            }
            other => ApiError::Database(other.to_string()),
        })?;

        tx.commit().map_err(|e| ApiError::Database(e.to_string()))?;
        Ok(user)
    }

    pub fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ApiError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            [user_id.to_string()],
            map_user,
        )
        .optional()
        .map_err(|e| ApiError::Database(e.to_string()))
    }

    /// Looks a user up by email or username.
    pub fn find_user_by_identifier(&self, identifier: &str) -> Result<Option<User>, ApiError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 OR username = ?2"),
            params![identifier.trim().to_lowercase(), identifier],
            map_user,
        )
        .optional()
        .map_err(|e| ApiError::Database(e.to_string()))
    }

    pub fn find_user_by_verification_token(&self, token: &str) -> Result<Option<User>, ApiError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE verification_token = ?1"),
            [token],
            map_user,
        )
        .optional()
        .map_err(|e| ApiError::Database(e.to_string()))
    }

    pub fn find_user_by_reset_token(&self, token: &str) -> Result<Option<User>, ApiError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE reset_password_token = ?1"),
            [token],
            map_user,
        )
        .optional()
        .map_err(|e| ApiError::Database(e.to_string()))
    }

    /// Marks the email verified and consumes the verification token.
    pub fn mark_email_verified(&self, user_id: Uuid) -> Result<(), ApiError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET email_verified = 1, verification_token = NULL WHERE user_id = ?1",
            [user_id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_verification_token(&self, user_id: Uuid, token: &str) -> Result<(), ApiError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET verification_token = ?1 WHERE user_id = ?2",
            params![token, user_id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_reset_token(&self, user_id: Uuid, token: &str) -> Result<(), ApiError> {
        let expires = Utc::now().timestamp() + RESET_TOKEN_TTL_SECS;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET reset_password_token = ?1, reset_token_expires = ?2
             WHERE user_id = ?3",
            params![token, expires, user_id.to_string()],
        )?;
        Ok(())
    }

    /// Replaces the password hash and consumes the reset token.
    pub fn apply_password_reset(&self, user_id: Uuid, password_hash: &str) -> Result<(), ApiError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET password_hash = ?1, reset_password_token = NULL,
                              reset_token_expires = NULL
             WHERE user_id = ?2",
            params![password_hash, user_id.to_string()],
        )?;
        Ok(())
    }

    /// Clears reset tokens whose 30-minute window has lapsed.
    pub fn prune_expired_reset_tokens(&self) -> Result<usize, ApiError> {
        let conn = self.conn()?;
        let pruned = conn.execute(
            "UPDATE users SET reset_password_token = NULL, reset_token_expires = NULL
             WHERE reset_token_expires IS NOT NULL AND reset_token_expires < ?1",
            [Utc::now().timestamp()],
        )?;
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_find_user() {
        let storage = Storage::in_memory().unwrap();
        let user = storage
            .create_user("A@X.com", "alice", "hash", "vtok")
            .unwrap();

        // Email is lowercase-normalized.
        assert_eq!(user.email, "a@x.com");
        assert!(!user.email_verified);

        let by_email = storage.find_user_by_identifier("a@x.com").unwrap().unwrap();
        let by_name = storage.find_user_by_identifier("alice").unwrap().unwrap();
        assert_eq!(by_email.user_id, user.user_id);
        assert_eq!(by_name.user_id, user.user_id);
    }

    #[test]
    fn duplicate_email_conflicts() {
        let storage = Storage::in_memory().unwrap();
        storage.create_user("a@x.com", "alice", "h", "t1").unwrap();

        let err = storage
            .create_user("a@x.com", "other", "h", "t2")
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn duplicate_username_conflicts() {
        let storage = Storage::in_memory().unwrap();
        storage.create_user("a@x.com", "alice", "h", "t1").unwrap();

        let err = storage
            .create_user("b@x.com", "alice", "h", "t2")
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn verification_consumes_token() {
        let storage = Storage::in_memory().unwrap();
        let user = storage.create_user("a@x.com", "alice", "h", "tok").unwrap();

        let found = storage
            .find_user_by_verification_token("tok")
            .unwrap()
            .unwrap();
        storage.mark_email_verified(found.user_id).unwrap();

        assert!(storage
            .find_user_by_verification_token("tok")
            .unwrap()
            .is_none());
        let user = storage.find_user_by_id(user.user_id).unwrap().unwrap();
        assert!(user.email_verified);
        assert!(user.verification_token.is_none());
    }

    #[test]
    fn reset_token_is_single_use() {
        let storage = Storage::in_memory().unwrap();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();

        storage.set_reset_token(user.user_id, "reset").unwrap();
        let found = storage.find_user_by_reset_token("reset").unwrap().unwrap();
        assert!(found.reset_token_expires.unwrap() > Utc::now().timestamp());

        storage.apply_password_reset(user.user_id, "new-hash").unwrap();
        assert!(storage.find_user_by_reset_token("reset").unwrap().is_none());

        let user = storage.find_user_by_id(user.user_id).unwrap().unwrap();
        assert_eq!(user.password_hash, "new-hash");
    }

    #[test]
    fn concurrent_registrations_admit_one_winner() {
        let storage = Storage::in_memory().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    storage
                        .create_user("a@x.com", "alice", "h", &format!("t{}", i))
                        .is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn expired_reset_tokens_are_pruned() {
        let storage = Storage::in_memory().unwrap();
        let user = storage.create_user("a@x.com", "alice", "h", "v").unwrap();

        // Force an already-lapsed expiry.
        {
            let conn = storage.conn().unwrap();
            conn.execute(
                "UPDATE users SET reset_password_token = 'old', reset_token_expires = ?1
                 WHERE user_id = ?2",
                params![Utc::now().timestamp() - 60, user.user_id.to_string()],
            )
            .unwrap();
        }

        assert_eq!(storage.prune_expired_reset_tokens().unwrap(), 1);
        assert!(storage.find_user_by_reset_token("old").unwrap().is_none());
    }
}
