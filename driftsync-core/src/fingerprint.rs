//! Deterministic device fingerprinting from client metadata.
//!
//! The fingerprint token recognizes a returning physical client without
//! any persistent client-side identifier: the same browser on the same
//! machine reproduces the same token across logins, which is what lets a
//! refresh token stay bound to a stable device identity.

use crate::models::DeviceType;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Classification and fingerprint derived from a raw user-agent string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    pub device_type: DeviceType,
    pub os: String,
    pub browser: String,
    /// Stable token: `base64(type-os-browser-rawUA)`.
    pub token: String,
}

impl DeviceFingerprint {
    /// Derives the fingerprint from a raw user-agent string.
    ///
    /// Classification is ordered substring matching: tablet hints are
    /// checked before mobile ones, and desktop is the fallback, so an
    /// Android tablet is never misfiled as a phone.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();

        let device_type = if is_tablet(&ua) {
            DeviceType::Tablet
        } else if is_mobile(&ua) {
            DeviceType::Mobile
        } else {
            DeviceType::Desktop
        };

        let os = if ua.contains("windows") {
            "windows"
        } else if ua.contains("mac os x") {
            "macos"
        } else if ua.contains("android") {
            "android"
        } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
            "ios"
        } else if ua.contains("linux") {
            "linux"
        } else {
            "unknown"
        };

        // Chrome and Edge both embed "safari"; order matters.
        let browser = if ua.contains("firefox") {
            "firefox"
        } else if ua.contains("edg") {
            "edge"
        } else if ua.contains("opr") || ua.contains("opera") {
            "opera"
        } else if ua.contains("chrome") {
            "chrome"
        } else if ua.contains("safari") {
            "safari"
        } else {
            "unknown"
        };

        let token = STANDARD.encode(format!(
            "{}-{}-{}-{}",
            device_type.as_str(),
            os,
            browser,
            user_agent
        ));

        Self {
            device_type,
            os: os.to_string(),
            browser: browser.to_string(),
            token,
        }
    }

    /// Default human-readable device name, e.g. `"Macos Desktop"`.
    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            capitalize(&self.os),
            capitalize(self.device_type.as_str())
        )
    }
}

fn is_tablet(ua: &str) -> bool {
    let tablet_hints = ["tablet", "ipad", "playbook", "silk"];
    if tablet_hints.iter().any(|h| ua.contains(h)) {
        return true;
    }
    // Android without "mobi" is a tablet.
    ua.contains("android") && !ua.contains("mobi")
}

fn is_mobile(ua: &str) -> bool {
    let mobile_hints = [
        "mobile",
        "iphone",
        "ipod",
        "android",
        "blackberry",
        "iemobile",
        "kindle",
        "webos",
        "opera mini",
        "opera mobi",
    ];
    mobile_hints.iter().any(|h| ua.contains(h))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
