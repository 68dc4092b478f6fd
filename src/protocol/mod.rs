//! Wire types for the CloudLink provisioning handshake and control plane
//!
//! This module defines the structures exchanged with the discovery and sync
//! endpoints and the decoding of inbound cloud-to-device messages.

pub mod events;
pub mod messages;

pub use events::{decode, ControlEvent};
pub use messages::{
    parse_discovery_reply, parse_sync_reply, BrokerCredentials, DeviceStatus, DiscoveryResult,
    SyncResult, WireError,
};
