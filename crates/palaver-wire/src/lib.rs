//! Palaver wire protocol — frame layout and payload codecs.
//!
//! All traffic between Palaver peers is a sequence of opaque byte frames.
//! A direct socket carries `[version, correlation_id, message_type,
//! payload]`; a router socket prefixes `[routing_id, delimiter]` so frames
//! can be addressed at a specific remote. Over TCP the whole sequence is
//! written with a 4-byte big-endian length header, then each frame with its
//! own length prefix.
//!
//! ## Architecture
//!
//! - **Envelope**: pure, stateless encode/decode of the two frame shapes
//! - **MessageType**: the fixed single-byte tag set
//! - **Codec**: pluggable payload serialization (msgpack by default)
//! - **framing**: async and blocking multipart readers/writers

pub mod codec;
pub mod frame;
pub mod framing;
pub mod payload;

pub use codec::{Codec, JsonCodec, MsgpackCodec, Value};
pub use frame::{Envelope, MessageType, EMPTY_DELIMITER, VERSION};
pub use framing::{
    read_frames, read_frames_blocking, write_frames, write_frames_blocking, MAX_MESSAGE_SIZE,
};
pub use payload::{ErrorPayload, Kwargs, WorkPayload};
