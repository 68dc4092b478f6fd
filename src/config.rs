//! Device configuration for the CloudLink provisioning flow
//!
//! Configuration is loaded from a TOML file. The `[device]` section carries
//! the identity triple (cpid, env, duid), `[auth]` selects the
//! authentication material, and `[session]` tunes the MQTT session. Secrets
//! (X509 cert and key) are referenced by file path and read at load time,
//! never embedded in the TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main device configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// Device identity section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Company id assigned by the platform (must match [a-zA-Z0-9._-]+)
    pub cpid: String,
    /// Environment name from the platform key vault (e.g. "poc", "prod")
    pub env: String,
    /// Device unique id (must match [a-zA-Z0-9._-]+)
    pub duid: String,
}

/// Authentication selection.
///
/// Only `token` and `x509` can open an MQTT session; `symmetric_key` and
/// `tpm` are accepted here but rejected by the client before any network
/// call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuthSection {
    /// SAS-token authentication; the password arrives in the sync reply.
    Token,
    /// Mutual TLS with a device certificate and private key.
    X509 {
        cert_file: PathBuf,
        key_file: PathBuf,
    },
    /// Not supported for the MQTT connection flow.
    SymmetricKey { key: String },
    /// Not supported for the MQTT connection flow.
    Tpm,
}

/// MQTT session tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    /// MQTT buffer size hint in bytes; 0 selects the 2048-byte default.
    pub mqtt_buffer_size: usize,
    /// Discovery service hostname override.
    pub discovery_host: String,
    /// Trust anchor for the broker connection (required for X509 auth).
    pub ca_cert_file: Option<PathBuf>,
    /// Heartbeat publish interval for the daemon, in seconds.
    pub heartbeat_interval_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            mqtt_buffer_size: 0,
            discovery_host: crate::provision::discovery::DEFAULT_DISCOVERY_HOST.to_string(),
            ca_cert_file: None,
            heartbeat_interval_secs: 60,
        }
    }
}

/// Resolved authentication material, ready for the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthInfo {
    Token,
    X509 { cert_pem: String, key_pem: String },
    SymmetricKey(String),
    Tpm,
}

/// Discriminant of [`AuthInfo`], used where only the branch matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Token,
    X509,
    SymmetricKey,
    Tpm,
}

impl AuthInfo {
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthInfo::Token => AuthKind::Token,
            AuthInfo::X509 { .. } => AuthKind::X509,
            AuthInfo::SymmetricKey(_) => AuthKind::SymmetricKey,
            AuthInfo::Tpm => AuthKind::Tpm,
        }
    }

    /// Reject configurations that cannot open an MQTT session.
    ///
    /// Called before any network operation so unsupported setups fail fast.
    pub fn ensure_operable(&self) -> Result<(), ConfigError> {
        match self {
            AuthInfo::Token => Ok(()),
            AuthInfo::X509 { cert_pem, key_pem } => {
                if cert_pem.trim().is_empty() || key_pem.trim().is_empty() {
                    return Err(ConfigError::InvalidX509Pair(
                        "device certificate or private key is empty".to_string(),
                    ));
                }
                Ok(())
            }
            AuthInfo::SymmetricKey(_) => Err(ConfigError::UnsupportedAuthType("symmetric_key")),
            AuthInfo::Tpm => Err(ConfigError::UnsupportedAuthType("tpm")),
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid identifier {0:?}: must match [a-zA-Z0-9._-]+")]
    InvalidIdentifier(String),
    #[error("authentication type {0:?} is not supported for the MQTT connection flow")]
    UnsupportedAuthType(&'static str),
    #[error("invalid X509 certificate/key pair: {0}")]
    InvalidX509Pair(String),
}

impl DeviceConfig {
    /// Load configuration from a TOML file and validate identities.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DeviceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate identity fields without touching the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.cpid.is_empty() {
            return Err(ConfigError::MissingField("device.cpid"));
        }
        if self.device.env.is_empty() {
            return Err(ConfigError::MissingField("device.env"));
        }
        if self.device.duid.is_empty() {
            return Err(ConfigError::MissingField("device.duid"));
        }
        validate_identifier(&self.device.cpid)?;
        validate_identifier(&self.device.duid)?;
        Ok(())
    }

    /// Resolve the auth section into runtime material, reading X509 files.
    pub fn auth_info(&self) -> Result<AuthInfo, ConfigError> {
        match &self.auth {
            AuthSection::Token => Ok(AuthInfo::Token),
            AuthSection::X509 {
                cert_file,
                key_file,
            } => {
                let cert_pem = std::fs::read_to_string(cert_file)?;
                let key_pem = std::fs::read_to_string(key_file)?;
                Ok(AuthInfo::X509 { cert_pem, key_pem })
            }
            AuthSection::SymmetricKey { key } => Ok(AuthInfo::SymmetricKey(key.clone())),
            AuthSection::Tpm => Ok(AuthInfo::Tpm),
        }
    }

    /// Read the broker trust anchor, if one is configured.
    pub fn ca_pem(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match &self.session.ca_cert_file {
            Some(path) => Ok(Some(std::fs::read(path)?)),
            None => Ok(None),
        }
    }

    /// Create a test configuration for unit testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
cpid = "ACME0001"
env = "poc"
duid = "sensor-01"

[auth]
type = "token"
"#;
        toml::from_str(toml_content).expect("test config should parse")
    }
}

/// Identifiers end up embedded in URLs and topic names, so the accepted
/// alphabet is restricted.
fn validate_identifier(id: &str) -> Result<(), ConfigError> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidIdentifier(id.to_string()));
    }

    Ok(())
}
