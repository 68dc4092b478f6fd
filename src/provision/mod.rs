//! The two-stage provisioning handshake
//!
//! Discovery resolves which regional endpoint serves a company/environment
//! pair; sync exchanges the device identity for broker credentials. Both
//! talk HTTP through the [`crate::transport::HttpGateway`] and parse with
//! the wire types in [`crate::protocol`].

use tracing::warn;

pub mod discovery;
pub mod sync;

pub use discovery::{DiscoveryError, DiscoveryResolver};
pub use sync::{SyncError, SyncResolver};

/// Locate the JSON payload inside an HTTP body.
///
/// The provisioning services occasionally prefix chunk framing or whitespace
/// before the JSON document; anything up to the first `{` is tolerated with
/// a warning. Returns `None` when the body contains no JSON at all.
pub(crate) fn json_payload(body: &str) -> Option<&str> {
    let start = body.find('{')?;
    if start != 0 {
        warn!(
            prefix_len = start,
            "expected JSON to start immediately in the response"
        );
    }
    Some(&body[start..])
}
