//! Control-plane routing for inbound events
//!
//! Decoded inbound events are classified into the action the session layer
//! must take before anything reaches the application. Classification is a
//! pure function; executing the action (re-provisioning, teardown,
//! forwarding) is the device client's job.
//!
//! `ForceSync` and `Close` are two independent branches: a force-sync never
//! implies the close behavior in the same dispatch.

use crate::protocol::ControlEvent;
use tracing::warn;

/// What the session layer must do with one decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    /// Tear the session down, re-run discovery and sync, reconnect.
    Resync,
    /// Tear the session down for good; a device restart is required.
    Shutdown,
    /// No session action; hand the event to the application.
    Forward(ControlEvent),
}

/// Classify a decoded event.
pub fn route_event(event: ControlEvent) -> ControlAction {
    match event {
        ControlEvent::ForceSync => ControlAction::Resync,
        ControlEvent::Close => ControlAction::Shutdown,
        other => ControlAction::Forward(other),
    }
}

/// Decode a raw inbound payload and classify it in one step.
///
/// Malformed payloads are logged and dropped; decoding is never retried.
pub fn route_payload(topic: &str, payload: &[u8]) -> Option<ControlAction> {
    match crate::protocol::decode(payload) {
        Ok(event) => Some(route_event(event)),
        Err(e) => {
            warn!(topic, error = %e, "dropping malformed inbound message");
            None
        }
    }
}
