//! Identifiers used across the wire protocol and the dispatch engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable logical identity of a peer.
///
/// Both sides of a connection are addressed by identity, not by connection
/// direction — a "server" may call a "client" by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// The empty identity, used when a sender cannot be attributed.
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    /// The identity a routing id claims to be, before authentication
    /// confirms it. Non-UTF-8 routing ids are replaced lossily.
    pub fn from_routing(routing_id: &RoutingId) -> Self {
        Self(String::from_utf8_lossy(routing_id.as_bytes()).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Transport-level address usable to direct a frame at a specific remote
/// peer over a router-style socket.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RoutingId(Bytes);

impl RoutingId {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The conventional routing id for an identity: its raw bytes.
    pub fn from_identity(identity: &PeerId) -> Self {
        Self(Bytes::copy_from_slice(identity.as_str().as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_frame(&self) -> Bytes {
        self.0.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoutingId({})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Unique per-call token linking a WORK request to its OK/ERROR response.
///
/// 16 random bytes (UUIDv4); never reused while a call is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(Uuid);

impl CallId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_roundtrip() {
        let id = PeerId::from("client1");
        assert_eq!(id.as_str(), "client1");
        assert!(!id.is_anonymous());
        assert!(PeerId::anonymous().is_anonymous());
    }

    #[test]
    fn test_routing_id_from_identity() {
        let id = PeerId::from("server");
        let rid = RoutingId::from_identity(&id);
        assert_eq!(rid.as_bytes(), b"server");
        assert_eq!(PeerId::from_routing(&rid), id);
    }

    #[test]
    fn test_call_id_is_16_bytes_and_unique() {
        let a = CallId::fresh();
        let b = CallId::fresh();
        assert_eq!(a.as_bytes().len(), 16);
        assert_ne!(a, b);
        assert_eq!(CallId::from_slice(a.as_bytes()), Some(a));
        assert_eq!(CallId::from_slice(b"short"), None);
    }
}
