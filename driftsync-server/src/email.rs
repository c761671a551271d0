//! Outbound account notifications.
//!
//! Delivery is behind a trait so deployments can plug a real mail
//! transport in; the default implementation writes structured log lines,
//! which is enough for self-hosted setups that watch the journal.

use tracing::info;

pub trait EmailNotifier: Send + Sync {
    fn send_verification(&self, email: &str, username: &str, token: &str);
    fn send_password_reset(&self, email: &str, username: &str, token: &str);
    fn send_new_device_alert(&self, email: &str, username: &str, device_name: &str, ip: Option<&str>);
    fn send_device_removed_alert(&self, email: &str, username: &str, device_name: &str);
}

/// Logs each notification instead of sending it.
pub struct LogEmailNotifier;

impl EmailNotifier for LogEmailNotifier {
    fn send_verification(&self, email: &str, username: &str, token: &str) {
        info!(email, username, token, "verification email queued");
    }

    fn send_password_reset(&self, email: &str, username: &str, token: &str) {
        info!(email, username, token, "password reset email queued");
    }

    fn send_new_device_alert(
        &self,
        email: &str,
        username: &str,
        device_name: &str,
        ip: Option<&str>,
    ) {
        info!(email, username, device_name, ip, "new device alert queued");
    }

    fn send_device_removed_alert(&self, email: &str, username: &str, device_name: &str) {
        info!(email, username, device_name, "device removed alert queued");
    }
}
