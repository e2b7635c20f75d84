//! Frame layout and message type tags.

use bytes::Bytes;
use palaver_types::{CallId, PalaverError, RoutingId};
use std::fmt;

/// Protocol version tag. Peers reject any frame carrying another value.
pub const VERSION: &[u8] = b"pv1";

/// The empty delimiter frame separating the routing id from the body on
/// router-style sockets.
pub const EMPTY_DELIMITER: &[u8] = b"";

/// Wire message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Authentication opener; payload carries raw identity/credential bytes.
    Hello = 0x01,
    /// A call request; payload is the codec-serialized `(name, args, kwargs)`.
    Work = 0x02,
    /// Successful call response; payload is the codec-serialized result.
    Ok = 0x03,
    /// Failed call response; payload is the codec-serialized error triple.
    Error = 0x04,
    /// Authentication accepted; payload carries the responder's raw credentials.
    Authenticated = 0x05,
    /// Authentication rejected or required.
    Unauthorized = 0x06,
    /// Explicit liveness signal (every frame also counts implicitly).
    Heartbeat = 0x07,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = PalaverError;

    fn try_from(tag: u8) -> Result<Self, PalaverError> {
        match tag {
            0x01 => Ok(Self::Hello),
            0x02 => Ok(Self::Work),
            0x03 => Ok(Self::Ok),
            0x04 => Ok(Self::Error),
            0x05 => Ok(Self::Authenticated),
            0x06 => Ok(Self::Unauthorized),
            0x07 => Ok(Self::Heartbeat),
            other => Err(PalaverError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hello => "HELLO",
            Self::Work => "WORK",
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Authenticated => "AUTHENTICATED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Heartbeat => "HEARTBEAT",
        };
        f.write_str(name)
    }
}

/// Decoded view of one received frame sequence.
///
/// Pure and stateless: detection of the routed vs. direct shape is by frame
/// count alone (6 vs. 4), per the protocol invariant.
#[derive(Debug)]
pub struct Envelope {
    /// Present when the frame arrived on (or is destined for) a router socket.
    pub routing_id: Option<RoutingId>,
    /// The per-call token pairing requests with responses.
    pub correlation_id: CallId,
    /// What the payload means.
    pub message_type: MessageType,
    /// Opaque payload bytes; codec-serialized except for control frames.
    pub payload: Bytes,
}

impl Envelope {
    /// Decode a frame sequence, asserting the protocol version.
    pub fn decode(frames: &[Bytes]) -> Result<Self, PalaverError> {
        let (routing_id, body) = match frames.len() {
            4 => (None, frames),
            6 => (Some(RoutingId::new(frames[0].clone())), &frames[2..]),
            n => {
                return Err(PalaverError::MalformedFrame(format!(
                    "expected 4 or 6 frames, got {n}"
                )))
            }
        };

        if body[0].as_ref() != VERSION {
            return Err(PalaverError::ProtocolVersionMismatch {
                expected: VERSION.to_vec(),
                got: body[0].to_vec(),
            });
        }

        let correlation_id = CallId::from_slice(&body[1]).ok_or_else(|| {
            PalaverError::MalformedFrame(format!(
                "correlation id must be 16 bytes, got {}",
                body[1].len()
            ))
        })?;

        let tag = *body[2]
            .first()
            .ok_or_else(|| PalaverError::MalformedFrame("empty message type frame".into()))?;
        let message_type = MessageType::try_from(tag)?;

        Ok(Self {
            routing_id,
            correlation_id,
            message_type,
            payload: body[3].clone(),
        })
    }

    /// Encode the 4-frame direct shape.
    pub fn encode_direct(
        correlation_id: CallId,
        message_type: MessageType,
        payload: Bytes,
    ) -> Vec<Bytes> {
        vec![
            Bytes::from_static(VERSION),
            Bytes::copy_from_slice(correlation_id.as_bytes()),
            Bytes::copy_from_slice(&[message_type.tag()]),
            payload,
        ]
    }

    /// Encode the 6-frame routed shape addressed at `routing_id`.
    pub fn encode_routed(
        routing_id: &RoutingId,
        correlation_id: CallId,
        message_type: MessageType,
        payload: Bytes,
    ) -> Vec<Bytes> {
        vec![
            routing_id.to_frame(),
            Bytes::from_static(EMPTY_DELIMITER),
            Bytes::from_static(VERSION),
            Bytes::copy_from_slice(correlation_id.as_bytes()),
            Bytes::copy_from_slice(&[message_type.tag()]),
            payload,
        ]
    }
}
