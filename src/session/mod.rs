//! MQTT session supervision
//!
//! The session manager owns the single active MQTT link. It performs
//! connect-with-retry against resolved broker credentials, caches the
//! publish topic, forwards inbound messages, and detects implicit
//! disconnects from its cooperative `poll()` step. Nothing here runs in the
//! background: the owner calls `poll()` and the link is serviced exactly one
//! tick at a time.
//!
//! Inbound messages and status transitions are delivered through registered
//! channel senders rather than direct callbacks, so session-affecting
//! reactions (a forced re-sync tearing the session down) always run after
//! `poll()` has returned, never from inside the link's event servicing.

use crate::protocol::BrokerCredentials;
use crate::retry::RetryPolicy;
use crate::transport::{
    BrokerEndpoint, InboundMessage, LinkEvent, MqttLink, MqttLinkFactory,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Connect attempts before giving up, with a one-second pause between them.
pub const CONNECT_ATTEMPTS: u32 = 10;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle of one provisioning-and-session cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Discovering,
    Syncing,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Value delivered to the caller's status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Channels registered with the session at initialization.
///
/// Dropping the senders (teardown) closes the channels; send failures are
/// ignored because a departed receiver means the owner is going away.
pub struct SessionCallbacks {
    pub status: mpsc::UnboundedSender<ConnectionStatus>,
    pub inbound: mpsc::UnboundedSender<InboundMessage>,
}

/// TLS material and tuning applied when the session opens its link.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Buffer size hint in bytes; 0 selects the transport default.
    pub buffer_size: usize,
    pub ca_pem: Option<Vec<u8>>,
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("MQTT connect failed after {attempts} attempts")]
    ConnectFailed { attempts: u32 },
    #[error("failed to subscribe to {topic}")]
    SubscribeFailed { topic: String },
    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("session is not initialized")]
    NotInitialized,
}

/// Owns the single active MQTT connection.
pub struct SessionManager {
    factory: Box<dyn MqttLinkFactory>,
    connect_retry: RetryPolicy,
    link: Option<Box<dyn MqttLink>>,
    pub_topic: Option<String>,
    callbacks: Option<SessionCallbacks>,
    state: SessionState,
    down_announced: bool,
}

impl SessionManager {
    pub fn new(factory: Box<dyn MqttLinkFactory>) -> Self {
        Self::with_retry(
            factory,
            RetryPolicy::new(CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY),
        )
    }

    /// Override the connect retry policy (tests shrink the delay).
    pub fn with_retry(factory: Box<dyn MqttLinkFactory>, connect_retry: RetryPolicy) -> Self {
        Self {
            factory,
            connect_retry,
            link: None,
            pub_topic: None,
            callbacks: None,
            state: SessionState::Idle,
            down_announced: false,
        }
    }

    /// Establish a session with the given credentials.
    ///
    /// Any prior session is torn down first, unconditionally, so calling this
    /// twice replaces the first session rather than leaking it. On failure
    /// the partially built session is torn down and the typed error returned;
    /// the manager is then safe to initialize again.
    pub async fn initialize(
        &mut self,
        credentials: &BrokerCredentials,
        options: SessionOptions,
        callbacks: SessionCallbacks,
    ) -> Result<(), SessionError> {
        self.teardown().await;

        self.pub_topic = Some(credentials.pub_topic.clone());

        let endpoint = BrokerEndpoint {
            host: credentials.host.clone(),
            client_id: credentials.client_id.clone(),
            username: credentials.user_name.clone(),
            password: credentials.password.clone(),
            buffer_size: options.buffer_size,
            ca_pem: options.ca_pem,
            client_auth: options.client_auth,
        };
        let mut link = self.factory.open(&endpoint);

        self.state = SessionState::Connecting;
        info!(host = %endpoint.host, client_id = %endpoint.client_id, "connecting to broker");

        let mut attempt = 0;
        let connected = loop {
            attempt += 1;
            match link.connect_attempt().await {
                Ok(()) => break true,
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.connect_retry.max_attempts,
                        error = %e,
                        "MQTT connect attempt failed"
                    );
                    if attempt >= self.connect_retry.max_attempts {
                        break false;
                    }
                    tokio::time::sleep(self.connect_retry.delay).await;
                }
            }
        };

        if !connected {
            drop(link);
            self.teardown().await;
            self.state = SessionState::Failed;
            return Err(SessionError::ConnectFailed { attempts: attempt });
        }

        if let Err(e) = link.subscribe(&credentials.sub_topic).await {
            warn!(topic = %credentials.sub_topic, error = %e, "subscribe failed");
            link.disconnect().await;
            self.teardown().await;
            self.state = SessionState::Failed;
            return Err(SessionError::SubscribeFailed {
                topic: credentials.sub_topic.clone(),
            });
        }

        self.link = Some(link);
        self.callbacks = Some(callbacks);
        self.state = SessionState::Connected;
        self.down_announced = false;
        self.emit_status(ConnectionStatus::Connected);
        info!(sub_topic = %credentials.sub_topic, "MQTT session established");
        Ok(())
    }

    /// Publish a payload to the cached publish topic.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let topic = match (&self.link, &self.pub_topic) {
            (Some(_), Some(topic)) => topic.clone(),
            _ => return Err(SessionError::NotInitialized),
        };
        let link = self.link.as_mut().expect("link checked above");
        link.publish(&topic, payload)
            .await
            .map_err(|e| SessionError::PublishFailed {
                topic,
                reason: e.to_string(),
            })
    }

    /// Service one link step.
    ///
    /// Detecting an implicit disconnect happens here and only here: if the
    /// link reports not-alive, the status channel receives `Disconnected`
    /// exactly once per transition, before the read/keepalive step runs.
    pub async fn poll(&mut self) {
        if self.link.is_none() {
            debug!("poll called with no active session");
            return;
        }

        let alive = self.link.as_ref().is_some_and(|l| l.is_connected());
        if !alive {
            self.mark_down("connection no longer alive");
        }

        let step = match self.link.as_mut() {
            Some(link) => link.poll_step().await,
            None => return,
        };

        match step {
            LinkEvent::Inbound(message) => {
                debug!(topic = %message.topic, bytes = message.payload.len(), "inbound message");
                if let Some(callbacks) = &self.callbacks {
                    let _ = callbacks.inbound.send(message);
                }
            }
            LinkEvent::Serviced => {}
            LinkEvent::Down(reason) => self.mark_down(&reason),
        }
    }

    /// Graceful disconnect followed by full teardown. Idempotent.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Connected && !self.down_announced {
            self.emit_status(ConnectionStatus::Disconnected);
        }
        let had_session = self.link.is_some();
        self.teardown().await;
        if had_session || self.state != SessionState::Idle {
            self.state = SessionState::Disconnected;
        }
        if had_session {
            info!("MQTT session closed");
        }
    }

    /// Last-known transport connection state; false without a session.
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|l| l.is_connected())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Topic the session publishes to, while one is active.
    pub fn publish_topic(&self) -> Option<&str> {
        self.pub_topic.as_deref()
    }

    /// Release the link, the cached topic and the registered channels.
    async fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.disconnect().await;
        }
        self.pub_topic = None;
        self.callbacks = None;
        self.down_announced = false;
    }

    fn mark_down(&mut self, reason: &str) {
        if self.down_announced || self.state != SessionState::Connected {
            return;
        }
        warn!(reason, "MQTT session lost");
        self.down_announced = true;
        self.state = SessionState::Disconnected;
        self.emit_status(ConnectionStatus::Disconnected);
    }

    fn emit_status(&self, status: ConnectionStatus) {
        if let Some(callbacks) = &self.callbacks {
            let _ = callbacks.status.send(status);
        }
    }
}
