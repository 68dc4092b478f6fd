//! CloudLink Device SDK
//!
//! Provisions and maintains a device's connection to the CloudLink IoT
//! broker:
//! - Two-stage HTTP handshake: discovery resolves the regional endpoint,
//!   sync exchanges the device identity for broker credentials
//! - Supervised MQTT session with bounded connect retries and cooperative
//!   polling
//! - Control-plane interception: inbound force-sync and close requests act
//!   on the session itself; commands and OTA requests are forwarded to the
//!   application
//!
//! # Quick Start
//!
//! ```rust
//! use cloudlink::config::DeviceConfig;
//! use cloudlink::protocol::{decode, ControlEvent};
//!
//! // Configuration comes from a TOML file (here: inline for brevity).
//! let config: DeviceConfig = toml::from_str(r#"
//!     [device]
//!     cpid = "ACME0001"
//!     env = "poc"
//!     duid = "sensor-01"
//!
//!     [auth]
//!     type = "token"
//! "#).unwrap();
//! assert!(config.validate().is_ok());
//!
//! // Inbound cloud-to-device messages decode into control events.
//! let event = decode(br#"{"ct":1,"data":{"cmd":"led-on"}}"#).unwrap();
//! assert!(matches!(event, ControlEvent::Command(_)));
//! ```
//!
//! The full cycle is driven through [`DeviceClient`]: build it from a
//! [`config::DeviceConfig`], call `initialize()`, then call `poll_once()`
//! from the application loop and `send_message()` to publish telemetry.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod provision;
pub mod retry;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{AuthInfo, AuthKind, ConfigError, DeviceConfig};
pub use device::{DeviceCallbacks, DeviceClient};
pub use error::{DeviceError, DeviceResult};
pub use protocol::{BrokerCredentials, ControlEvent, DeviceStatus, DiscoveryResult, SyncResult};
pub use session::{ConnectionStatus, SessionError, SessionState};
