//! Device client: the owning facade over provisioning and the session
//!
//! A [`DeviceClient`] holds the configuration, the cached discovery and sync
//! results, the session manager, and the caller's callbacks. It drives the
//! full cycle: discovery, sync, MQTT session establishment, cooperative
//! polling, and the control-plane reactions (forced re-sync, forced close)
//! that arrive over the subscribe topic.
//!
//! Cached results are owned here exclusively and replaced wholesale on a
//! forced re-sync; nothing mutates them in place.

use crate::config::{AuthInfo, ConfigError, DeviceConfig};
use crate::dispatch::{route_payload, ControlAction};
use crate::error::DeviceResult;
use crate::protocol::{ControlEvent, DiscoveryResult, SyncResult};
use crate::provision::{DiscoveryResolver, SyncResolver};
use crate::session::{
    ConnectionStatus, SessionCallbacks, SessionError, SessionManager, SessionOptions, SessionState,
};
use crate::transport::{HttpGateway, InboundMessage, MqttLinkFactory};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Caller-supplied callbacks, all optional.
///
/// They are invoked from `poll_once()` (and from `initialize()` for the
/// initial `Connected`), on the caller's task, strictly in event order.
#[derive(Default)]
pub struct DeviceCallbacks {
    pub on_status: Option<Box<dyn FnMut(ConnectionStatus) + Send>>,
    pub on_command: Option<Box<dyn FnMut(Value) + Send>>,
    pub on_ota: Option<Box<dyn FnMut(Value) + Send>>,
    /// Receives events the session layer does not interpret.
    pub on_event: Option<Box<dyn FnMut(u32, Value) + Send>>,
}

/// One provisioning cycle: configuration in, supervised MQTT session out.
pub struct DeviceClient {
    config: DeviceConfig,
    auth: AuthInfo,
    discovery_resolver: DiscoveryResolver,
    sync_resolver: SyncResolver,
    session: SessionManager,
    callbacks: DeviceCallbacks,
    discovery: Option<DiscoveryResult>,
    sync: Option<SyncResult>,
    state: SessionState,
    status_tx: mpsc::UnboundedSender<ConnectionStatus>,
    status_rx: mpsc::UnboundedReceiver<ConnectionStatus>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl DeviceClient {
    /// Build a client over injected gateways.
    ///
    /// Fails fast on unreadable X509 material; unsupported auth types are
    /// accepted here and rejected by [`DeviceClient::initialize`].
    pub fn new(
        config: DeviceConfig,
        http: Arc<dyn HttpGateway>,
        mqtt: Box<dyn MqttLinkFactory>,
        callbacks: DeviceCallbacks,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let auth = config.auth_info()?;
        let discovery_resolver =
            DiscoveryResolver::new(Arc::clone(&http), config.session.discovery_host.clone());
        let sync_resolver = SyncResolver::new(http);
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            auth,
            discovery_resolver,
            sync_resolver,
            session: SessionManager::new(mqtt),
            callbacks,
            discovery: None,
            sync: None,
            state: SessionState::Idle,
            status_tx,
            status_rx,
            inbound_tx,
            inbound_rx,
        })
    }

    /// Build a client over the production gateways (reqwest + rumqttc).
    pub fn with_defaults(
        config: DeviceConfig,
        callbacks: DeviceCallbacks,
    ) -> Result<Self, ConfigError> {
        Self::new(
            config,
            Arc::new(crate::transport::ReqwestGateway::new()),
            Box::new(crate::transport::RumqttcLinkFactory),
            callbacks,
        )
    }

    /// Run the full provisioning flow and establish the MQTT session.
    ///
    /// Discovery and sync results are cached; a second call reuses them and
    /// only re-establishes the session (replacing any previous one).
    pub async fn initialize(&mut self) -> DeviceResult<()> {
        // Reject unsupported auth before the first network call.
        self.auth.ensure_operable()?;

        if self.discovery.is_none() {
            self.state = SessionState::Discovering;
            let result = self
                .discovery_resolver
                .resolve(&self.config.device.cpid, &self.config.device.env)
                .await;
            match result {
                Ok(discovery) => self.discovery = Some(discovery),
                Err(e) => {
                    self.state = SessionState::Failed;
                    return Err(e.into());
                }
            }
        }

        if self.sync.is_none() {
            self.state = SessionState::Syncing;
            let discovery = self.discovery.as_ref().expect("resolved above");
            let result = self
                .sync_resolver
                .resolve(
                    &self.config.device.cpid,
                    &self.config.device.duid,
                    discovery,
                    self.auth.kind(),
                )
                .await;
            match result {
                Ok(sync) => self.sync = Some(sync),
                Err(e) => {
                    self.state = SessionState::Failed;
                    return Err(e.into());
                }
            }
        }

        let credentials = self
            .sync
            .as_ref()
            .expect("resolved above")
            .credentials
            .clone();
        if matches!(self.auth, AuthInfo::Token) && credentials.password.is_empty() {
            self.state = SessionState::Failed;
            return Err(ConfigError::MissingField("broker password (token auth)").into());
        }

        self.state = SessionState::Connecting;
        let options = self.session_options()?;
        let callbacks = SessionCallbacks {
            status: self.status_tx.clone(),
            inbound: self.inbound_tx.clone(),
        };
        match self.session.initialize(&credentials, options, callbacks).await {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!(cpid = %self.config.device.cpid, duid = %self.config.device.duid, "device session up");
                self.drain_status();
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                self.drain_status();
                Err(e.into())
            }
        }
    }

    /// Publish a payload on the session's publish topic.
    pub async fn send_message(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        self.session.send(payload).await
    }

    /// Service one session step and dispatch whatever it produced.
    ///
    /// Must be called periodically; this is the only place implicit
    /// disconnects are detected and inbound messages are handled.
    pub async fn poll_once(&mut self) {
        self.session.poll().await;
        self.dispatch_inbound().await;
        self.drain_status();
    }

    /// Graceful disconnect and teardown. Idempotent.
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
        if self.state != SessionState::Idle {
            self.state = SessionState::Disconnected;
        }
        self.drain_status();
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Currently cached sync result, if provisioning has run.
    pub fn sync_result(&self) -> Option<&SyncResult> {
        self.sync.as_ref()
    }

    /// Currently cached discovery result, if provisioning has run.
    pub fn discovery_result(&self) -> Option<&DiscoveryResult> {
        self.discovery.as_ref()
    }

    fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        let client_auth = match &self.auth {
            AuthInfo::X509 { cert_pem, key_pem } => {
                Some((cert_pem.clone().into_bytes(), key_pem.clone().into_bytes()))
            }
            _ => None,
        };
        let ca_pem = self.config.ca_pem()?;
        if client_auth.is_some() && ca_pem.is_none() {
            return Err(ConfigError::MissingField(
                "session.ca_cert_file (required for x509 auth)",
            ));
        }
        Ok(SessionOptions {
            buffer_size: self.config.session.mqtt_buffer_size,
            ca_pem,
            client_auth,
        })
    }

    /// Handle everything the session forwarded during the last poll step.
    ///
    /// Runs strictly after `SessionManager::poll` has returned, so a
    /// control-plane teardown never re-enters the link's event servicing.
    async fn dispatch_inbound(&mut self) {
        while let Ok(message) = self.inbound_rx.try_recv() {
            let Some(action) = route_payload(&message.topic, &message.payload) else {
                continue;
            };
            match action {
                ControlAction::Resync => self.handle_force_sync().await,
                ControlAction::Shutdown => self.handle_close().await,
                ControlAction::Forward(event) => self.forward_event(event),
            }
        }
    }

    /// Forced re-sync: discard cached results, re-provision, reconnect.
    ///
    /// On resolver failure the session is left disconnected; retrying the
    /// cycle is the owner's decision.
    async fn handle_force_sync(&mut self) {
        info!("force-sync request received; re-provisioning");
        self.session.disconnect().await;
        self.discovery = None;
        self.sync = None;

        self.state = SessionState::Discovering;
        let discovery = match self
            .discovery_resolver
            .resolve(&self.config.device.cpid, &self.config.device.env)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "discovery failed during forced re-sync");
                self.state = SessionState::Disconnected;
                return;
            }
        };

        self.state = SessionState::Syncing;
        let sync = match self
            .sync_resolver
            .resolve(
                &self.config.device.cpid,
                &self.config.device.duid,
                &discovery,
                self.auth.kind(),
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "sync failed during forced re-sync");
                self.state = SessionState::Disconnected;
                return;
            }
        };

        self.discovery = Some(discovery);
        self.sync = Some(sync);

        self.state = SessionState::Connecting;
        let options = match self.session_options() {
            Ok(options) => options,
            Err(e) => {
                error!(error = %e, "session options invalid during forced re-sync");
                self.state = SessionState::Disconnected;
                return;
            }
        };
        let callbacks = SessionCallbacks {
            status: self.status_tx.clone(),
            inbound: self.inbound_tx.clone(),
        };
        let credentials = self
            .sync
            .as_ref()
            .expect("stored above")
            .credentials
            .clone();
        match self.session.initialize(&credentials, options, callbacks).await {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!("session re-established with fresh credentials");
            }
            Err(e) => {
                error!(error = %e, "failed to re-establish session after forced re-sync");
                self.state = SessionState::Failed;
            }
        }
    }

    /// Forced close: tear the session down and stop. Restarting the device
    /// is the operator's move, not ours.
    async fn handle_close(&mut self) {
        warn!("close request received from the control plane; a device restart is required to resume");
        self.session.disconnect().await;
        self.state = SessionState::Disconnected;
    }

    fn forward_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Command(data) => {
                if let Some(cb) = self.callbacks.on_command.as_mut() {
                    cb(data);
                }
            }
            ControlEvent::OtaRequest(data) => {
                if let Some(cb) = self.callbacks.on_ota.as_mut() {
                    cb(data);
                }
            }
            ControlEvent::Generic { ct, data } => {
                if let Some(cb) = self.callbacks.on_event.as_mut() {
                    cb(ct, data);
                }
            }
            // Session-affecting events never reach here; they are routed
            // before forwarding.
            ControlEvent::ForceSync | ControlEvent::Close => {}
        }
    }

    fn drain_status(&mut self) {
        while let Ok(status) = self.status_rx.try_recv() {
            match status {
                ConnectionStatus::Connected => self.state = SessionState::Connected,
                // Terminal states (Failed) are not overwritten by a stale
                // Disconnected emitted earlier in the same cycle.
                ConnectionStatus::Disconnected => {
                    if self.state == SessionState::Connected {
                        self.state = SessionState::Disconnected;
                    }
                }
            }
            if let Some(cb) = self.callbacks.on_status.as_mut() {
                cb(status);
            }
        }
    }
}
