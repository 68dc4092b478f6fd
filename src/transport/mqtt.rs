//! MQTT link over rumqttc
//!
//! The link is deliberately passive: no background task drives the event
//! loop. One [`MqttLink::connect_attempt`] call polls the loop until the
//! broker acknowledges the connection, and each [`MqttLink::poll_step`] call
//! services exactly one read/keepalive tick. The session layer owns the
//! cadence.

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// All broker sessions run over TLS on the standard secure port.
pub const MQTT_SECURE_PORT: u16 = 8883;

/// Applied when the caller's buffer-size hint is 0.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Everything needed to open one broker connection.
#[derive(Debug, Clone, Default)]
pub struct BrokerEndpoint {
    pub host: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// Max packet size hint in bytes; 0 selects [`DEFAULT_BUFFER_SIZE`].
    pub buffer_size: usize,
    /// Trust anchor (PEM). Without one, the platform trust store is used.
    pub ca_pem: Option<Vec<u8>>,
    /// X509 client certificate and key (PEM pair). Requires `ca_pem`.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl BrokerEndpoint {
    pub fn effective_buffer_size(&self) -> usize {
        if self.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.buffer_size
        }
    }
}

/// One inbound C2D message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Result of servicing one link step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A message arrived on a subscribed topic.
    Inbound(InboundMessage),
    /// Keepalive or other protocol traffic was serviced; nothing to deliver.
    Serviced,
    /// The link is down.
    Down(String),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connect attempt failed: {0}")]
    Connect(String),
    #[error("request could not be issued: {0}")]
    Request(String),
}

/// A single MQTT connection: connect, subscribe, publish, single-step poll.
#[async_trait]
pub trait MqttLink: Send {
    /// Drive the link until the broker acknowledges the connection or the
    /// attempt fails. One call is one attempt; retrying is the caller's
    /// policy.
    async fn connect_attempt(&mut self) -> Result<(), LinkError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), LinkError>;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError>;

    /// Service one read/keepalive tick. Returns immediately with
    /// [`LinkEvent::Down`] when the link is not alive.
    async fn poll_step(&mut self) -> LinkEvent;

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Opens fresh links; one factory serves the whole process.
pub trait MqttLinkFactory: Send + Sync {
    fn open(&self, endpoint: &BrokerEndpoint) -> Box<dyn MqttLink>;
}

/// Build rumqttc options from a broker endpoint.
fn configure_mqtt_options(endpoint: &BrokerEndpoint) -> MqttOptions {
    let mut options = MqttOptions::new(&endpoint.client_id, &endpoint.host, MQTT_SECURE_PORT);
    options.set_keep_alive(KEEP_ALIVE);

    let buffer_size = endpoint.effective_buffer_size();
    options.set_max_packet_size(buffer_size, buffer_size);

    if !endpoint.username.is_empty() {
        options.set_credentials(&endpoint.username, &endpoint.password);
    }

    let transport = match &endpoint.ca_pem {
        Some(ca) => Transport::Tls(TlsConfiguration::Simple {
            ca: ca.clone(),
            alpn: None,
            client_auth: endpoint.client_auth.clone(),
        }),
        None => Transport::tls_with_default_config(),
    };
    options.set_transport(transport);

    options
}

/// Production MQTT link backed by rumqttc.
pub struct RumqttcLink {
    client: AsyncClient,
    event_loop: EventLoop,
    connected: bool,
}

impl RumqttcLink {
    fn new(endpoint: &BrokerEndpoint) -> Self {
        let options = configure_mqtt_options(endpoint);
        let (client, event_loop) = AsyncClient::new(options, 10);
        Self {
            client,
            event_loop,
            connected: false,
        }
    }
}

#[async_trait]
impl MqttLink for RumqttcLink {
    async fn connect_attempt(&mut self) -> Result<(), LinkError> {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        debug!("broker acknowledged connection");
                        self.connected = true;
                        return Ok(());
                    }
                    self.connected = false;
                    return Err(LinkError::Connect(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                }
                Ok(event) => {
                    trace!(?event, "event before ConnAck");
                }
                Err(e) => {
                    self.connected = false;
                    return Err(LinkError::Connect(e.to_string()));
                }
            }
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        // QoS 0 throughout: the platform does not use acknowledged delivery.
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| LinkError::Request(e.to_string()))?;

        // Drive the loop until the broker confirms the subscription so that
        // a refused topic surfaces here and not on a later poll.
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::SubAck(_))) => return Ok(()),
                Ok(event) => {
                    trace!(?event, "event before SubAck");
                }
                Err(e) => {
                    self.connected = false;
                    return Err(LinkError::Request(e.to_string()));
                }
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| LinkError::Request(e.to_string()))
    }

    async fn poll_step(&mut self) -> LinkEvent {
        if !self.connected {
            return LinkEvent::Down("link is down".to_string());
        }
        match self.event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => LinkEvent::Inbound(InboundMessage {
                topic: publish.topic,
                payload: publish.payload,
            }),
            Ok(event) => {
                trace!(?event, "serviced link event");
                LinkEvent::Serviced
            }
            Err(e) => {
                self.connected = false;
                LinkEvent::Down(e.to_string())
            }
        }
    }

    async fn disconnect(&mut self) {
        // Best effort; the broker may already be gone.
        let _ = self.client.disconnect().await;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Factory for [`RumqttcLink`]s.
#[derive(Debug, Clone, Default)]
pub struct RumqttcLinkFactory;

impl MqttLinkFactory for RumqttcLinkFactory {
    fn open(&self, endpoint: &BrokerEndpoint) -> Box<dyn MqttLink> {
        debug!(
            host = %endpoint.host,
            client_id = %endpoint.client_id,
            buffer_size = endpoint.effective_buffer_size(),
            "opening MQTT link"
        );
        Box::new(RumqttcLink::new(endpoint))
    }
}
