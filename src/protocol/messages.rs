//! Handshake message types for discovery and sync
//!
//! The discovery endpoint answers with a base URL naming the regional agent
//! host; the sync endpoint answers with broker credentials wrapped in a `d`
//! envelope using short field names. Both replies are decoded here into the
//! owned result types consumed by the provisioning flow.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Broker endpoint resolved by the discovery step.
///
/// `path` always ends with `/` so the sync URL can be appended directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub host: String,
    pub path: String,
}

/// Device registration status reported by the sync endpoint.
///
/// Wire codes 0..=6 map in order to `Ok`..`CpidNotFound`; any other code is
/// `Unknown`. `ParsingError` is produced locally when a reply decodes as JSON
/// but is missing the broker fields required for an `Ok` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Ok,
    NotRegistered,
    AutoRegister,
    NotFound,
    Inactive,
    Moved,
    CpidNotFound,
    Unknown,
    ParsingError,
}

impl DeviceStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => DeviceStatus::Ok,
            1 => DeviceStatus::NotRegistered,
            2 => DeviceStatus::AutoRegister,
            3 => DeviceStatus::NotFound,
            4 => DeviceStatus::Inactive,
            5 => DeviceStatus::Moved,
            6 => DeviceStatus::CpidNotFound,
            _ => DeviceStatus::Unknown,
        }
    }

    /// Operator-facing description used when a sync outcome is logged.
    pub fn description(&self) -> &'static str {
        match self {
            DeviceStatus::Ok => "device is registered and active",
            DeviceStatus::NotRegistered => "device is not registered",
            DeviceStatus::AutoRegister => "device is pending auto-registration",
            DeviceStatus::NotFound => "device not found",
            DeviceStatus::Inactive => "device is inactive",
            DeviceStatus::Moved => "device has moved to another environment",
            DeviceStatus::CpidNotFound => "company id not found",
            DeviceStatus::Unknown => "unknown device status reported by server",
            DeviceStatus::ParsingError => "sync reply is missing required broker fields",
        }
    }

    /// Credentials from a sync result are usable only for `Ok` status (the
    /// enrollment-pending special case is handled by the sync resolver).
    pub fn credentials_usable(&self) -> bool {
        matches!(self, DeviceStatus::Ok)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Connection parameters for one MQTT session, as delivered by sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub host: String,
    pub client_id: String,
    pub user_name: String,
    pub password: String,
    pub pub_topic: String,
    pub sub_topic: String,
}

/// Outcome of the sync step: status plus credentials and device group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub status: DeviceStatus,
    pub credentials: BrokerCredentials,
    pub device_group: String,
}

/// Decoding failures for handshake payloads.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base URL {url:?} is not an absolute URL with a host")]
    BadBaseUrl { url: String },
}

#[derive(Deserialize)]
struct DiscoveryReply {
    #[serde(rename = "baseUrl")]
    base_url: String,
    #[serde(rename = "dmsg", default)]
    _message: Option<String>,
}

#[derive(Deserialize)]
struct SyncReply {
    d: SyncEnvelope,
}

#[derive(Deserialize)]
struct SyncEnvelope {
    ds: u32,
    #[serde(default)]
    dtg: String,
    #[serde(default)]
    p: Option<BrokerSection>,
}

#[derive(Deserialize, Default)]
struct BrokerSection {
    #[serde(rename = "h", default)]
    host: String,
    #[serde(rename = "id", default)]
    client_id: String,
    #[serde(rename = "un", default)]
    user_name: String,
    #[serde(rename = "pwd", default)]
    password: String,
    #[serde(rename = "pub", default)]
    pub_topic: String,
    #[serde(rename = "sub", default)]
    sub_topic: String,
}

/// Decode a discovery reply and split its base URL into host and path.
pub fn parse_discovery_reply(json: &str) -> Result<DiscoveryResult, WireError> {
    let reply: DiscoveryReply = serde_json::from_str(json)?;
    let url = Url::parse(&reply.base_url).map_err(|_| WireError::BadBaseUrl {
        url: reply.base_url.clone(),
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| WireError::BadBaseUrl {
            url: reply.base_url.clone(),
        })?
        .to_string();
    let mut path = url.path().to_string();
    if !path.ends_with('/') {
        path.push('/');
    }
    Ok(DiscoveryResult { host, path })
}

/// Decode a sync reply into a [`SyncResult`].
///
/// An `Ok` status with missing broker fields is downgraded to
/// [`DeviceStatus::ParsingError`]; interpreting non-`Ok` statuses is the sync
/// resolver's job.
pub fn parse_sync_reply(json: &str) -> Result<SyncResult, WireError> {
    let reply: SyncReply = serde_json::from_str(json)?;
    let mut status = DeviceStatus::from_code(reply.d.ds);
    let broker = reply.d.p.unwrap_or_default();
    let credentials = BrokerCredentials {
        host: broker.host,
        client_id: broker.client_id,
        user_name: broker.user_name,
        password: broker.password,
        pub_topic: broker.pub_topic,
        sub_topic: broker.sub_topic,
    };
    if status == DeviceStatus::Ok && !sync_fields_complete(&credentials) {
        status = DeviceStatus::ParsingError;
    }
    Ok(SyncResult {
        status,
        credentials,
        device_group: reply.d.dtg,
    })
}

fn sync_fields_complete(credentials: &BrokerCredentials) -> bool {
    // The password may legitimately be empty (X509 auth); everything else is
    // required to open a session.
    !credentials.host.is_empty()
        && !credentials.client_id.is_empty()
        && !credentials.pub_topic.is_empty()
        && !credentials.sub_topic.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_wire_codes() {
        assert_eq!(DeviceStatus::from_code(0), DeviceStatus::Ok);
        assert_eq!(DeviceStatus::from_code(1), DeviceStatus::NotRegistered);
        assert_eq!(DeviceStatus::from_code(2), DeviceStatus::AutoRegister);
        assert_eq!(DeviceStatus::from_code(3), DeviceStatus::NotFound);
        assert_eq!(DeviceStatus::from_code(4), DeviceStatus::Inactive);
        assert_eq!(DeviceStatus::from_code(5), DeviceStatus::Moved);
        assert_eq!(DeviceStatus::from_code(6), DeviceStatus::CpidNotFound);
        assert_eq!(DeviceStatus::from_code(7), DeviceStatus::Unknown);
        assert_eq!(DeviceStatus::from_code(999), DeviceStatus::Unknown);
    }

    #[test]
    fn test_only_ok_status_is_usable() {
        assert!(DeviceStatus::Ok.credentials_usable());
        assert!(!DeviceStatus::NotRegistered.credentials_usable());
        assert!(!DeviceStatus::Unknown.credentials_usable());
    }

    #[test]
    fn test_parse_discovery_reply() {
        let json = r#"{"baseUrl":"https://agent.cloudlink.io/api/2.0/agent/","dmsg":"ok"}"#;
        let result = parse_discovery_reply(json).unwrap();
        assert_eq!(result.host, "agent.cloudlink.io");
        assert_eq!(result.path, "/api/2.0/agent/");
    }

    #[test]
    fn test_parse_discovery_reply_appends_trailing_slash() {
        let json = r#"{"baseUrl":"https://agent.cloudlink.io/api/2.0/agent"}"#;
        let result = parse_discovery_reply(json).unwrap();
        assert_eq!(result.path, "/api/2.0/agent/");
    }

    #[test]
    fn test_parse_discovery_reply_rejects_relative_url() {
        let json = r#"{"baseUrl":"not-a-url"}"#;
        assert!(matches!(
            parse_discovery_reply(json),
            Err(WireError::BadBaseUrl { .. })
        ));
    }

    #[test]
    fn test_parse_sync_reply_ok() {
        let json = r#"{
            "d": {
                "ds": 0,
                "dtg": "3fd1b6a2-0001-4f5d-9d27-b0044c8ad13a",
                "p": {
                    "h": "broker.cloudlink.io",
                    "id": "client-1",
                    "un": "broker.cloudlink.io/client-1",
                    "pwd": "SharedAccessSignature sr=abc",
                    "pub": "devices/client-1/messages/events/",
                    "sub": "devices/client-1/messages/devicebound/#"
                }
            }
        }"#;
        let result = parse_sync_reply(json).unwrap();
        assert_eq!(result.status, DeviceStatus::Ok);
        assert_eq!(result.credentials.host, "broker.cloudlink.io");
        assert_eq!(result.credentials.client_id, "client-1");
        assert_eq!(result.device_group, "3fd1b6a2-0001-4f5d-9d27-b0044c8ad13a");
    }

    #[test]
    fn test_parse_sync_reply_missing_broker_fields_downgrades_status() {
        let json = r#"{"d":{"ds":0,"dtg":"g"}}"#;
        let result = parse_sync_reply(json).unwrap();
        assert_eq!(result.status, DeviceStatus::ParsingError);
    }

    #[test]
    fn test_parse_sync_reply_empty_password_is_complete() {
        // X509-authenticated brokers hand out no password.
        let json = r#"{
            "d": {
                "ds": 0,
                "dtg": "g",
                "p": {
                    "h": "broker.cloudlink.io",
                    "id": "client-1",
                    "un": "u",
                    "pub": "out/",
                    "sub": "in/"
                }
            }
        }"#;
        let result = parse_sync_reply(json).unwrap();
        assert_eq!(result.status, DeviceStatus::Ok);
        assert!(result.credentials.password.is_empty());
    }

    #[test]
    fn test_parse_sync_reply_error_status_without_broker_section() {
        let json = r#"{"d":{"ds":3}}"#;
        let result = parse_sync_reply(json).unwrap();
        assert_eq!(result.status, DeviceStatus::NotFound);
        assert!(result.credentials.client_id.is_empty());
    }

    #[test]
    fn test_parse_sync_reply_malformed_json() {
        assert!(matches!(
            parse_sync_reply("not json"),
            Err(WireError::Json(_))
        ));
    }
}
