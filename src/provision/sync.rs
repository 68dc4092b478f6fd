//! Sync: exchange device identity for broker credentials

use super::json_payload;
use crate::config::AuthKind;
use crate::error::sanitize_secrets;
use crate::protocol::{parse_sync_reply, DeviceStatus, DiscoveryResult, SyncResult, WireError};
use crate::transport::{HttpGateway, HttpOutcome};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// The sync request body must fit in a single MTU-sized frame.
pub const SYNC_POST_BODY_MAX_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync response carried no JSON payload")]
    NoPayload,
    #[error("failed to parse sync response")]
    ParseFailed {
        raw: String,
        #[source]
        source: WireError,
    },
    #[error("sync rejected: {}", .0.description())]
    DeviceStatus(DeviceStatus),
}

/// Resolves (cpid, duid) against a discovered endpoint into a [`SyncResult`].
///
/// One HTTP attempt only; retrying a sync, if desired at all, belongs to an
/// outer policy, not this layer.
pub struct SyncResolver {
    gateway: Arc<dyn HttpGateway>,
}

impl SyncResolver {
    pub fn new(gateway: Arc<dyn HttpGateway>) -> Self {
        Self { gateway }
    }

    /// # Panics
    ///
    /// Panics if `cpid`/`duid` would produce a request body longer than
    /// [`SYNC_POST_BODY_MAX_LEN`]; identifier length is a caller contract,
    /// not a runtime condition.
    pub async fn resolve(
        &self,
        cpid: &str,
        duid: &str,
        discovery: &DiscoveryResult,
        auth_kind: AuthKind,
    ) -> Result<SyncResult, SyncError> {
        let url = format!("https://{}{}sync?", discovery.host, discovery.path);
        let body = serde_json::json!({ "cpid": cpid, "uniqueId": duid }).to_string();
        assert!(
            body.len() <= SYNC_POST_BODY_MAX_LEN,
            "sync request body exceeds {SYNC_POST_BODY_MAX_LEN} bytes; cpid/duid too long"
        );
        debug!(%url, "running sync");

        let raw = match self.gateway.request(&url, Some(&body)).await {
            HttpOutcome::Success(raw) => raw,
            HttpOutcome::Empty => {
                warn!("sync returned no data");
                return Err(SyncError::NoPayload);
            }
            HttpOutcome::Failure(reason) => {
                warn!(%reason, "sync request failed");
                return Err(SyncError::NoPayload);
            }
        };

        let json = match json_payload(&raw) {
            Some(json) => json,
            None => {
                warn!(raw = %sanitize_secrets(&raw), "no JSON in sync response");
                return Err(SyncError::NoPayload);
            }
        };

        let mut result = parse_sync_reply(json).map_err(|source| SyncError::ParseFailed {
            raw: raw.clone(),
            source,
        })?;

        if result.status != DeviceStatus::Ok {
            // A TPM-class device that is not registered yet may still
            // connect: the broker completes enrollment on first connect, and
            // the client id is derived from the identity pair.
            if auth_kind == AuthKind::Tpm && result.status == DeviceStatus::NotRegistered {
                result.credentials.client_id = format!("{cpid}-{duid}");
                info!(client_id = %result.credentials.client_id, "device not yet enrolled; proceeding with derived client id");
            } else {
                error!(
                    status = %result.status,
                    detail = result.status.description(),
                    raw = %sanitize_secrets(&raw),
                    "sync rejected by server"
                );
                return Err(SyncError::DeviceStatus(result.status));
            }
        }

        info!(device_group = %result.device_group, "sync response parsed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockHttpGateway;

    fn endpoint() -> DiscoveryResult {
        DiscoveryResult {
            host: "agent.cloudlink.io".to_string(),
            path: "/api/2.0/agent/".to_string(),
        }
    }

    fn ok_body() -> String {
        r#"{
            "d": {
                "ds": 0,
                "dtg": "group-1",
                "p": {
                    "h": "broker.cloudlink.io",
                    "id": "srv-client",
                    "un": "broker.cloudlink.io/srv-client",
                    "pwd": "SharedAccessSignature sr=abc",
                    "pub": "devices/srv-client/messages/events/",
                    "sub": "devices/srv-client/messages/devicebound/#"
                }
            }
        }"#
        .to_string()
    }

    fn status_body(ds: u32) -> String {
        format!(r#"{{"d":{{"ds":{ds},"dtg":""}}}}"#)
    }

    #[tokio::test]
    async fn test_resolve_posts_identity_to_sync_url() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(
            ok_body(),
        )]));
        let resolver = SyncResolver::new(gateway.clone());

        let result = resolver
            .resolve("ACME0001", "sensor-01", &endpoint(), AuthKind::Token)
            .await
            .unwrap();
        assert_eq!(result.status, DeviceStatus::Ok);
        assert_eq!(result.credentials.client_id, "srv-client");

        let requests = gateway.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "https://agent.cloudlink.io/api/2.0/agent/sync?");
        let body = requests[0].1.as_deref().unwrap();
        assert!(body.contains(r#""cpid":"ACME0001""#));
        assert!(body.contains(r#""uniqueId":"sensor-01""#));
    }

    #[tokio::test]
    async fn test_not_registered_tpm_derives_client_id() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(
            status_body(1),
        )]));
        let resolver = SyncResolver::new(gateway);

        let result = resolver
            .resolve("ACME0001", "sensor-01", &endpoint(), AuthKind::Tpm)
            .await
            .unwrap();
        assert_eq!(result.status, DeviceStatus::NotRegistered);
        assert_eq!(result.credentials.client_id, "ACME0001-sensor-01");
    }

    #[tokio::test]
    async fn test_not_registered_token_auth_is_an_error() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(
            status_body(1),
        )]));
        let resolver = SyncResolver::new(gateway);

        let err = resolver
            .resolve("ACME0001", "sensor-01", &endpoint(), AuthKind::Token)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::DeviceStatus(DeviceStatus::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn test_device_not_found_does_not_derive_client_id() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(
            status_body(3),
        )]));
        let resolver = SyncResolver::new(gateway);

        let err = resolver
            .resolve("ACME0001", "sensor-01", &endpoint(), AuthKind::Tpm)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DeviceStatus(DeviceStatus::NotFound)));
    }

    #[tokio::test]
    async fn test_single_attempt_no_retry() {
        let gateway = Arc::new(MockHttpGateway::always(HttpOutcome::Empty));
        let resolver = SyncResolver::new(gateway.clone());

        let err = resolver
            .resolve("ACME0001", "sensor-01", &endpoint(), AuthKind::Token)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoPayload));
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_ok_status_with_missing_broker_fields() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(
            r#"{"d":{"ds":0,"dtg":"g"}}"#.to_string(),
        )]));
        let resolver = SyncResolver::new(gateway);

        let err = resolver
            .resolve("ACME0001", "sensor-01", &endpoint(), AuthKind::Token)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::DeviceStatus(DeviceStatus::ParsingError)
        ));
    }
}
