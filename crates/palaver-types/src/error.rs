//! The Palaver error taxonomy.
//!
//! Work-level failures travel over the wire as an ERROR triple
//! `(kind, message, traceback)` and are reconstructed on the caller side:
//! kinds named here rebuild their exact variant, anything else falls back
//! to the generic [`PalaverError::Remote`] carrying the original kind
//! string verbatim.

use thiserror::Error;

/// Top-level error type for the Palaver system.
#[derive(Error, Debug)]
pub enum PalaverError {
    /// The frame carried a protocol version this peer does not speak.
    #[error("protocol version mismatch: expected {expected:?}, got {got:?}")]
    ProtocolVersionMismatch {
        /// The version tag this peer supports.
        expected: Vec<u8>,
        /// The version tag found on the frame.
        got: Vec<u8>,
    },

    /// No registration matched the locator in any consulted scope.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The call received no response within the configured timeout.
    #[error("call timed out")]
    Timeout,

    /// The sender has not completed authentication.
    #[error("peer not authenticated: {0}")]
    Unauthenticated(String),

    /// The authentication backend rejected the peer.
    #[error("unauthorized")]
    Unauthorized,

    /// A resolved callable failed; carries the message it raised.
    #[error("handler error: {0}")]
    Handler(String),

    /// A remote error of a kind this system does not declare itself.
    #[error("remote error {kind}: {message}")]
    Remote {
        /// The remote error kind, verbatim.
        kind: String,
        /// The remote error message.
        message: String,
        /// The formatted remote traceback.
        traceback: String,
    },

    /// The operation has no meaning in synchronous mode.
    #[error("not supported in this mode: {0}")]
    NotSupported(String),

    /// The peer is shutting down; outstanding calls are rejected with this.
    #[error("peer is shutting down")]
    Shutdown,

    /// Sends and calls require a prior connect or bind.
    #[error("not connected: you must connect or bind first")]
    NotConnected,

    /// connect/bind was called on a peer that already has a socket.
    #[error("already connected or bound")]
    AlreadyConnected,

    /// The frame sequence did not match either physical shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The message type tag is outside the known set.
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// No route is known for the addressed peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The remote end closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// A single message exceeded the frame size cap.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Declared size of the offending message.
        size: u32,
        /// The configured cap.
        max: u32,
    },

    /// The endpoint string could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Payload encode/decode failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with PalaverError.
pub type PalaverResult<T> = Result<T, PalaverError>;

impl PalaverError {
    /// The kind string serialized into an ERROR payload for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolVersionMismatch { .. } => "ProtocolVersionMismatch",
            Self::ServiceNotFound(_) => "ServiceNotFound",
            Self::Timeout => "Timeout",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::Unauthorized => "Unauthorized",
            Self::Handler(_) => "Handler",
            Self::Remote { .. } => "Remote",
            Self::NotSupported(_) => "NotSupported",
            Self::Shutdown => "Shutdown",
            Self::NotConnected => "NotConnected",
            Self::AlreadyConnected => "AlreadyConnected",
            Self::MalformedFrame(_) => "MalformedFrame",
            Self::UnknownMessageType(_) => "UnknownMessageType",
            Self::UnknownPeer(_) => "UnknownPeer",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::MessageTooLarge { .. } => "MessageTooLarge",
            Self::InvalidEndpoint(_) => "InvalidEndpoint",
            Self::Codec(_) => "Codec",
            Self::Io(_) => "Io",
        }
    }

    /// Rebuild a native error from a received ERROR triple.
    ///
    /// Kinds this system declares are reconstructed precisely, with the
    /// remote traceback folded into the message; anything else becomes the
    /// generic [`PalaverError::Remote`] so no information is dropped.
    pub fn from_remote(kind: &str, message: &str, traceback: &str) -> Self {
        let full = format!("{}\n{}", format_remote_traceback(traceback), message);
        match kind {
            "ServiceNotFound" => Self::ServiceNotFound(full),
            "Timeout" => Self::Timeout,
            "Unauthenticated" => Self::Unauthenticated(full),
            "Unauthorized" => Self::Unauthorized,
            "Handler" => Self::Handler(full),
            "NotSupported" => Self::NotSupported(full),
            "Shutdown" => Self::Shutdown,
            "UnknownPeer" => Self::UnknownPeer(full),
            _ => Self::Remote {
                kind: kind.to_string(),
                message: message.to_string(),
                traceback: traceback.to_string(),
            },
        }
    }

    /// Whether this error must tear down the connection it occurred on.
    ///
    /// Protocol-level violations are fatal; work-level and codec failures
    /// are not (they are answered or logged and the link keeps running).
    pub fn is_protocol_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolVersionMismatch { .. }
                | Self::UnknownMessageType(_)
                | Self::ConnectionClosed
                | Self::MessageTooLarge { .. }
                | Self::Io(_)
        )
    }
}

/// Set a received remote traceback apart from any local context.
pub fn format_remote_traceback(traceback: &str) -> String {
    let pivot = format!("\n{}", " ".repeat(12));
    format!(
        "\n-- Beginning of remote traceback --\n            {}\n-- End of remote traceback --\n",
        traceback.lines().collect::<Vec<_>>().join(&pivot)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_kind_reconstructs_precisely() {
        let err = PalaverError::from_remote("ServiceNotFound", "no such rpc", "trace line");
        match err {
            PalaverError::ServiceNotFound(msg) => {
                assert!(msg.contains("no such rpc"));
                assert!(msg.contains("remote traceback"));
            }
            other => panic!("expected ServiceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_kinds_reconstruct() {
        assert!(matches!(
            PalaverError::from_remote("Timeout", "", ""),
            PalaverError::Timeout
        ));
        assert!(matches!(
            PalaverError::from_remote("Shutdown", "", ""),
            PalaverError::Shutdown
        ));
    }

    #[test]
    fn test_unknown_kind_falls_back_to_remote() {
        let err = PalaverError::from_remote("ValueError", "bad input", "tb");
        match err {
            PalaverError::Remote {
                kind,
                message,
                traceback,
            } => {
                assert_eq!(kind, "ValueError");
                assert_eq!(message, "bad input");
                assert_eq!(traceback, "tb");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[test]
    fn test_kind_strings_roundtrip_for_internal_kinds() {
        let errs = [
            PalaverError::ServiceNotFound("x".into()),
            PalaverError::Timeout,
            PalaverError::Unauthorized,
            PalaverError::Handler("boom".into()),
            PalaverError::NotSupported("schedule".into()),
            PalaverError::Shutdown,
        ];
        for err in errs {
            let rebuilt = PalaverError::from_remote(err.kind(), &err.to_string(), "");
            assert_eq!(rebuilt.kind(), err.kind());
        }
    }

    #[test]
    fn test_fatality_classification() {
        assert!(PalaverError::ConnectionClosed.is_protocol_fatal());
        assert!(PalaverError::UnknownMessageType(0xff).is_protocol_fatal());
        assert!(!PalaverError::ServiceNotFound("x".into()).is_protocol_fatal());
        assert!(!PalaverError::Timeout.is_protocol_fatal());
    }

    #[test]
    fn test_remote_traceback_banner() {
        let banner = format_remote_traceback("line1\nline2");
        assert!(banner.contains("-- Beginning of remote traceback --"));
        assert!(banner.contains("line1"));
        assert!(banner.contains("-- End of remote traceback --"));
    }
}
