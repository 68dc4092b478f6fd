//! Transport gateways for the provisioning handshake and the MQTT session
//!
//! This module provides the narrow interfaces the core is written against:
//! a blocking-style HTTP request/response operation and an MQTT link with
//! single-step servicing. Trait objects enable dependency injection and
//! testing against the mocks in [`crate::testing`].

use async_trait::async_trait;

pub mod http;
pub mod mqtt;

pub use http::ReqwestGateway;
pub use mqtt::{
    BrokerEndpoint, InboundMessage, LinkError, LinkEvent, MqttLink, MqttLinkFactory,
    RumqttcLinkFactory, DEFAULT_BUFFER_SIZE, MQTT_SECURE_PORT,
};

/// Outcome of one HTTP exchange, collapsed to what the handshake cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpOutcome {
    /// The server answered with a non-empty body.
    Success(String),
    /// The server answered but the body was empty.
    Empty,
    /// The request failed at the transport level.
    Failure(String),
}

/// One blocking "perform request, get full body" operation.
///
/// Implementations send `Content-Type: application/json` only when a body is
/// present (GET otherwise). Chunked responses are consumed into a single
/// string before returning.
#[async_trait]
pub trait HttpGateway: Send + Sync {
    async fn request(&self, url: &str, body: Option<&str>) -> HttpOutcome;
}
