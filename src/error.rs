//! Crate-level error type and log sanitization
//!
//! Each layer defines its own error enum next to the code that produces it;
//! this module ties them together for callers that drive the whole
//! provisioning flow, and provides the sanitizer applied to raw server
//! payloads before they are logged (sync replies carry broker passwords).

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Umbrella error for the full provisioning-and-session flow.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] crate::provision::discovery::DiscoveryError),

    #[error("sync failed: {0}")]
    Sync(#[from] crate::provision::sync::SyncError),

    #[error("session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

static KEY_VALUE_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|secret|sas)[=:]\s*\S+").expect("static regex")
});

static JSON_SECRET_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(pwd|password|pass)"\s*:\s*"[^"]*""#).expect("static regex")
});

/// Sanitize a raw payload or error string before logging.
///
/// Redacts broker passwords and SAS tokens in both JSON and key=value form,
/// and truncates to keep log lines bounded.
pub fn sanitize_secrets(message: &str) -> String {
    let mut sanitized = JSON_SECRET_FIELD
        .replace_all(message, r#""$1":"***""#)
        .to_string();
    sanitized = KEY_VALUE_SECRET
        .replace_all(&sanitized, "$1=***")
        .to_string();

    if sanitized.len() > 1024 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 1024 - truncate_suffix.len();
        // Back off to a char boundary so the slice cannot panic.
        let mut cut = max_content_len;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_json_password_field() {
        let raw = r#"{"p":{"un":"dev","pwd":"SharedAccessSignature sr=abc&sig=xyz"}}"#;
        let sanitized = sanitize_secrets(raw);
        assert!(!sanitized.contains("SharedAccessSignature"));
        assert!(sanitized.contains(r#""pwd":"***""#));
        assert!(sanitized.contains(r#""un":"dev""#));
    }

    #[test]
    fn test_sanitize_key_value_secrets() {
        let raw = "connect failed: password=hunter2 token: abc123";
        let sanitized = sanitize_secrets(raw);
        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc123"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_sanitize_key_value_case_insensitive() {
        let sanitized = sanitize_secrets("PASSWORD=s3cret");
        assert!(!sanitized.contains("s3cret"));
    }

    #[test]
    fn test_sanitize_truncates_long_payloads() {
        let raw = "x".repeat(4096);
        let sanitized = sanitize_secrets(&raw);
        assert!(sanitized.len() <= 1024);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_short_message_untouched() {
        assert_eq!(sanitize_secrets("all fine"), "all fine");
    }

    #[test]
    fn test_device_error_wraps_session_error() {
        let err: DeviceError = crate::session::SessionError::NotInitialized.into();
        assert!(err.to_string().contains("not initialized"));
    }
}
