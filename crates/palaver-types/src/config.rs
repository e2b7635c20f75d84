//! Peer configuration.

use crate::id::PeerId;
use std::time::Duration;

/// How long an outbound call waits for its OK/ERROR before expiring.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for one peer instance.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// This peer's own logical identity.
    pub identity: PeerId,
    /// The peer addressed when a call names no explicit target.
    ///
    /// Direct sockets have exactly one counterpart; router sockets may
    /// leave this unset and address every call explicitly.
    pub default_target: Option<PeerId>,
    /// Timeout applied to every outbound call.
    pub call_timeout: Duration,
}

impl PeerConfig {
    pub fn new(identity: impl Into<PeerId>) -> Self {
        Self {
            identity: identity.into(),
            default_target: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}
