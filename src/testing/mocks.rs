//! Mock implementations for testing
//!
//! Provides a scripted HTTP gateway and a scriptable MQTT link/factory so
//! the provisioning flow, the session manager and the control-plane
//! dispatcher can be exercised without any network.

use crate::transport::{
    BrokerEndpoint, HttpGateway, HttpOutcome, InboundMessage, LinkError, LinkEvent, MqttLink,
    MqttLinkFactory,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// HTTP gateway answering from a script, recording every request.
pub struct MockHttpGateway {
    script: Mutex<VecDeque<HttpOutcome>>,
    /// Outcome used once the script is exhausted.
    fallback: HttpOutcome,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl MockHttpGateway {
    /// Answer with the scripted outcomes in order, then with `Empty`.
    pub fn scripted(outcomes: Vec<HttpOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            fallback: HttpOutcome::Empty,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the same outcome.
    pub fn always(outcome: HttpOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far as (url, body).
    pub fn requests(&self) -> Vec<(String, Option<String>)> {
        self.requests.lock().expect("mock state").clone()
    }
}

#[async_trait]
impl HttpGateway for MockHttpGateway {
    async fn request(&self, url: &str, body: Option<&str>) -> HttpOutcome {
        self.requests
            .lock()
            .expect("mock state")
            .push((url.to_string(), body.map(str::to_string)));
        self.script
            .lock()
            .expect("mock state")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Shared, inspectable state behind a [`MockMqttLink`].
#[derive(Debug, Default)]
pub struct MockLinkState {
    /// Scripted results for successive connect attempts; empty means accept.
    pub connect_script: VecDeque<bool>,
    pub refuse_subscribe: bool,
    pub refuse_publish: bool,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    /// Messages delivered by successive poll steps.
    pub inbound: VecDeque<InboundMessage>,
    pub alive: bool,
    pub connect_attempts: u32,
    pub disconnect_calls: u32,
}

/// Handle for scripting and inspecting one mock link from a test.
#[derive(Debug, Clone, Default)]
pub struct MockLinkHandle(Arc<Mutex<MockLinkState>>);

impl MockLinkHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockLinkState) -> R) -> R {
        f(&mut self.0.lock().expect("mock state"))
    }

    /// Queue an inbound message for delivery on a later poll step.
    pub fn push_inbound(&self, topic: &str, payload: &[u8]) {
        self.with(|state| {
            state.inbound.push_back(InboundMessage {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(payload),
            });
        });
    }

    /// Simulate the transport dropping the connection.
    pub fn kill(&self) {
        self.with(|state| state.alive = false);
    }

    pub fn is_alive(&self) -> bool {
        self.with(|state| state.alive)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.with(|state| state.subscriptions.clone())
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.with(|state| state.published.clone())
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.with(|state| state.disconnect_calls)
    }

    pub fn connect_attempts(&self) -> u32 {
        self.with(|state| state.connect_attempts)
    }
}

/// Mock MQTT link driven entirely by its shared state.
pub struct MockMqttLink {
    state: Arc<Mutex<MockLinkState>>,
}

#[async_trait]
impl MqttLink for MockMqttLink {
    async fn connect_attempt(&mut self) -> Result<(), LinkError> {
        let mut state = self.state.lock().expect("mock state");
        state.connect_attempts += 1;
        let accept = state.connect_script.pop_front().unwrap_or(true);
        if accept {
            state.alive = true;
            Ok(())
        } else {
            Err(LinkError::Connect("scripted connect failure".to_string()))
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        let mut state = self.state.lock().expect("mock state");
        if state.refuse_subscribe {
            return Err(LinkError::Request("scripted subscribe refusal".to_string()));
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.lock().expect("mock state");
        if !state.alive {
            return Err(LinkError::Request("link is down".to_string()));
        }
        if state.refuse_publish {
            return Err(LinkError::Request("scripted publish refusal".to_string()));
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn poll_step(&mut self) -> LinkEvent {
        let mut state = self.state.lock().expect("mock state");
        if !state.alive {
            return LinkEvent::Down("link is down".to_string());
        }
        match state.inbound.pop_front() {
            Some(message) => LinkEvent::Inbound(message),
            None => LinkEvent::Serviced,
        }
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.lock().expect("mock state");
        state.alive = false;
        state.disconnect_calls += 1;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().expect("mock state").alive
    }
}

/// Factory handing out pre-scripted links in order.
///
/// Each `open()` pops the next prepared handle (or creates a fresh
/// accept-everything one) and records the endpoint it was opened with.
#[derive(Default)]
pub struct MockMqttFactory {
    prepared: Mutex<VecDeque<MockLinkHandle>>,
    opened_endpoints: Mutex<Vec<BrokerEndpoint>>,
    opened_links: Mutex<Vec<MockLinkHandle>>,
}

impl MockMqttFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a handle to back the next opened link.
    pub fn prepare(&self, handle: MockLinkHandle) {
        self.prepared.lock().expect("mock state").push_back(handle);
    }

    pub fn opened_endpoints(&self) -> Vec<BrokerEndpoint> {
        self.opened_endpoints.lock().expect("mock state").clone()
    }

    /// Handles for every link opened so far, in order.
    pub fn opened_links(&self) -> Vec<MockLinkHandle> {
        self.opened_links.lock().expect("mock state").clone()
    }
}

/// Tests keep an `Arc` to the factory for inspection while the session owns
/// a boxed clone of it.
impl MqttLinkFactory for Arc<MockMqttFactory> {
    fn open(&self, endpoint: &BrokerEndpoint) -> Box<dyn MqttLink> {
        <MockMqttFactory as MqttLinkFactory>::open(self, endpoint)
    }
}

impl MqttLinkFactory for MockMqttFactory {
    fn open(&self, endpoint: &BrokerEndpoint) -> Box<dyn MqttLink> {
        let handle = self
            .prepared
            .lock()
            .expect("mock state")
            .pop_front()
            .unwrap_or_default();
        self.opened_endpoints
            .lock()
            .expect("mock state")
            .push(endpoint.clone());
        self.opened_links
            .lock()
            .expect("mock state")
            .push(handle.clone());
        Box::new(MockMqttLink {
            state: Arc::clone(&handle.0),
        })
    }
}
