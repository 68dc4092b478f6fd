//! Inbound cloud-to-device event decoding
//!
//! Every C2D message carries a numeric `ct` (command type) field that selects
//! how the message is handled. Two of the types address the session layer
//! itself (force re-sync and close); the rest are application events handed
//! to the caller unmodified.

use serde::Deserialize;
use serde_json::Value;

/// Command type: device command for the application.
pub const CT_COMMAND: u32 = 0x01;
/// Command type: over-the-air update request.
pub const CT_OTA: u32 = 0x02;
/// Command type: the server wants the device to re-run discovery and sync.
pub const CT_FORCE_SYNC: u32 = 0x11;
/// Command type: the server is closing the connection for good.
pub const CT_CLOSE: u32 = 0x99;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Re-provision and reconnect with fresh credentials.
    ForceSync,
    /// Tear the session down; a device restart is required to resume.
    Close,
    /// Application command, payload forwarded untouched.
    Command(Value),
    /// OTA request, payload forwarded untouched.
    OtaRequest(Value),
    /// Any other command type the session layer does not interpret.
    Generic { ct: u32, data: Value },
}

#[derive(Deserialize)]
struct RawEvent {
    ct: u32,
    #[serde(default)]
    data: Value,
}

/// Decode a raw inbound payload into a [`ControlEvent`].
///
/// Malformed input is the caller's problem to log and drop; decoding is never
/// retried.
pub fn decode(payload: &[u8]) -> Result<ControlEvent, serde_json::Error> {
    let raw: RawEvent = serde_json::from_slice(payload)?;
    Ok(match raw.ct {
        CT_COMMAND => ControlEvent::Command(raw.data),
        CT_OTA => ControlEvent::OtaRequest(raw.data),
        CT_FORCE_SYNC => ControlEvent::ForceSync,
        CT_CLOSE => ControlEvent::Close,
        ct => ControlEvent::Generic { ct, data: raw.data },
    })
}
