//! Discovery: resolve the regional endpoint for a company/environment pair

use super::json_payload;
use crate::error::sanitize_secrets;
use crate::protocol::{parse_discovery_reply, DiscoveryResult, WireError};
use crate::retry::RetryPolicy;
use crate::transport::{HttpGateway, HttpOutcome};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Well-known discovery service host; overridable through configuration.
pub const DEFAULT_DISCOVERY_HOST: &str = "discovery.cloudlink.io";

/// Transport-level failures are retried immediately, up to this bound.
pub const DISCOVERY_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery endpoint unreachable after {attempts} attempts")]
    Unreachable { attempts: u32 },
    #[error("discovery response carried no JSON payload")]
    NoPayload,
    #[error("failed to parse discovery response")]
    ParseFailed {
        raw: String,
        #[source]
        source: WireError,
    },
}

/// Resolves (cpid, env) to a broker host/path pair.
pub struct DiscoveryResolver {
    gateway: Arc<dyn HttpGateway>,
    host: String,
    retry: RetryPolicy,
}

impl DiscoveryResolver {
    pub fn new(gateway: Arc<dyn HttpGateway>, host: impl Into<String>) -> Self {
        Self {
            gateway,
            host: host.into(),
            retry: RetryPolicy::new(DISCOVERY_ATTEMPTS, Duration::ZERO),
        }
    }

    pub async fn resolve(&self, cpid: &str, env: &str) -> Result<DiscoveryResult, DiscoveryError> {
        let url = format!(
            "https://{}/api/sdk/cpid/{}/lang/rust/ver/2.0/env/{}",
            self.host, cpid, env
        );
        debug!(%url, "running discovery");

        // A non-empty body ends the retry loop no matter what it contains;
        // only a transport failure or an empty body is worth another try.
        let body = self
            .retry
            .run(|attempt| {
                let gateway = Arc::clone(&self.gateway);
                let url = url.clone();
                async move {
                    match gateway.request(&url, None).await {
                        HttpOutcome::Success(body) => Ok(body),
                        HttpOutcome::Empty => {
                            warn!(attempt, "discovery returned no data");
                            Err(())
                        }
                        HttpOutcome::Failure(reason) => {
                            warn!(attempt, %reason, "discovery request failed");
                            Err(())
                        }
                    }
                }
            })
            .await
            .map_err(|()| DiscoveryError::Unreachable {
                attempts: self.retry.max_attempts,
            })?;

        let json = match json_payload(&body) {
            Some(json) => json,
            None => {
                warn!(raw = %sanitize_secrets(&body), "no JSON in discovery response");
                return Err(DiscoveryError::NoPayload);
            }
        };

        let result = parse_discovery_reply(json).map_err(|source| {
            warn!(
                env,
                raw = %sanitize_secrets(&body),
                "unable to parse discovery response; check the environment name in the key vault"
            );
            DiscoveryError::ParseFailed {
                raw: body.clone(),
                source,
            }
        })?;

        info!(host = %result.host, path = %result.path, "discovery response parsed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockHttpGateway;

    fn fixture_body() -> String {
        r#"{"baseUrl":"https://agent.cloudlink.io/api/2.0/agent/"}"#.to_string()
    }

    #[tokio::test]
    async fn test_resolve_returns_fixture_endpoint() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(
            fixture_body(),
        )]));
        let resolver = DiscoveryResolver::new(gateway.clone(), DEFAULT_DISCOVERY_HOST);

        let result = resolver.resolve("ACME0001", "poc").await.unwrap();
        assert_eq!(result.host, "agent.cloudlink.io");
        assert_eq!(result.path, "/api/2.0/agent/");

        let requests = gateway.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].0,
            "https://discovery.cloudlink.io/api/sdk/cpid/ACME0001/lang/rust/ver/2.0/env/poc"
        );
        // Discovery is a GET: no body, no content type.
        assert!(requests[0].1.is_none());
    }

    #[tokio::test]
    async fn test_empty_bodies_exhaust_exactly_five_attempts() {
        let gateway = Arc::new(MockHttpGateway::always(HttpOutcome::Empty));
        let resolver = DiscoveryResolver::new(gateway.clone(), DEFAULT_DISCOVERY_HOST);

        let err = resolver.resolve("ACME0001", "poc").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unreachable { attempts: 5 }));
        assert_eq!(gateway.requests().len(), 5);
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![
            HttpOutcome::Failure("connect refused".to_string()),
            HttpOutcome::Empty,
            HttpOutcome::Success(fixture_body()),
        ]));
        let resolver = DiscoveryResolver::new(gateway.clone(), DEFAULT_DISCOVERY_HOST);

        assert!(resolver.resolve("ACME0001", "poc").await.is_ok());
        assert_eq!(gateway.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_leading_garbage_is_tolerated() {
        let body = format!("1f4\r\n{}", fixture_body());
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(body)]));
        let resolver = DiscoveryResolver::new(gateway, DEFAULT_DISCOVERY_HOST);

        let result = resolver.resolve("ACME0001", "poc").await.unwrap();
        assert_eq!(result.host, "agent.cloudlink.io");
    }

    #[tokio::test]
    async fn test_body_without_json_is_no_payload() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(
            "<html>gateway error</html>".to_string(),
        )]));
        let resolver = DiscoveryResolver::new(gateway.clone(), DEFAULT_DISCOVERY_HOST);

        let err = resolver.resolve("ACME0001", "poc").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoPayload));
        // The non-empty body stopped the retry loop despite being useless.
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_parse_failure_carries_raw_response() {
        let gateway = Arc::new(MockHttpGateway::scripted(vec![HttpOutcome::Success(
            r#"{"unexpected":"shape"}"#.to_string(),
        )]));
        let resolver = DiscoveryResolver::new(gateway, DEFAULT_DISCOVERY_HOST);

        match resolver.resolve("ACME0001", "poc").await.unwrap_err() {
            DiscoveryError::ParseFailed { raw, .. } => {
                assert!(raw.contains("unexpected"));
            }
            other => panic!("expected ParseFailed, got {other:?}"),
        }
    }
}
