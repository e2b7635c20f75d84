//! Synchronous mode: a blocking client with no event loop.
//!
//! Suitable inside synchronous host environments. Limited by design: one
//! in-flight call per socket, timeout enforced by the socket's native
//! receive timeout, and no deferred scheduling, proxying, or
//! server-initiated calls — those fail fast with `NotSupported`.

use palaver_types::{CallId, PalaverError, PeerConfig, PeerId, RoutingId};
use palaver_wire::{
    read_frames_blocking, write_frames_blocking, Codec, Envelope, ErrorPayload, Kwargs,
    MessageType, MsgpackCodec, Value, WorkPayload,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Blocking counterpart of `Peer` for the client role.
pub struct SyncClient {
    config: PeerConfig,
    codec: Arc<dyn Codec>,
    // The lock also serializes calls: one in flight per socket.
    stream: Mutex<Option<TcpStream>>,
}

impl SyncClient {
    pub fn builder(identity: impl Into<PeerId>) -> SyncClientBuilder {
        SyncClientBuilder::new(identity)
    }

    pub fn identity(&self) -> &PeerId {
        &self.config.identity
    }

    /// Connect to `tcp://host:port` and announce this client's identity.
    pub fn connect(&self, endpoint: &str) -> Result<(), PalaverError> {
        let addr = crate::transport::parse_endpoint(endpoint)?;
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(self.config.call_timeout))?;
        stream.set_nodelay(true)?;

        let mut writer = &stream;
        let routing_id = RoutingId::from_identity(self.identity());
        write_frames_blocking(&mut writer, &[routing_id.to_frame()])?;

        let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return Err(PalaverError::AlreadyConnected);
        }
        *guard = Some(stream);
        debug!(peer = %self.identity(), %endpoint, "sync client connected");
        Ok(())
    }

    /// Begin a call from a dotted locator.
    pub fn locate(&self, path: &str) -> SyncCall<'_> {
        let mut call = SyncCall {
            client: self,
            segments: Vec::new(),
            args: Vec::new(),
            kwargs: Kwargs::new(),
        };
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            call.segments.push(segment.to_string());
        }
        call
    }

    /// Explicit peer addressing needs a router socket and a loop; the
    /// synchronous client has neither.
    pub fn send_to(&self, _identity: impl Into<PeerId>) -> Result<(), PalaverError> {
        Err(PalaverError::NotSupported(
            "send_to requires reactor mode".into(),
        ))
    }

    /// Close the socket (tolerating an already-closed one).
    pub fn stop(&self) {
        if let Some(stream) = self
            .stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Send one WORK and block until its response or the socket timeout.
    fn send_work(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, PalaverError> {
        let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        let stream = guard.as_mut().ok_or(PalaverError::NotConnected)?;

        let work = WorkPayload::new(name, args, kwargs);
        let payload = Bytes::from(self.codec.encode(&work.to_value())?);
        let correlation_id = CallId::fresh();
        let frames = Envelope::encode_direct(correlation_id, MessageType::Work, payload);

        debug!(peer = %self.config.identity, %name, %correlation_id, "sending work (blocking)");
        write_frames_blocking(&mut &*stream, &frames)?;

        loop {
            let frames = match read_frames_blocking(&mut &*stream) {
                Ok(frames) => frames,
                Err(PalaverError::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Err(PalaverError::Timeout)
                }
                Err(e) => return Err(e),
            };
            let env = Envelope::decode(&frames)?;

            if env.correlation_id != correlation_id
                && matches!(env.message_type, MessageType::Ok | MessageType::Error)
            {
                // A straggler from an earlier, timed-out call.
                warn!(stale = %env.correlation_id, "dropping stale response");
                continue;
            }

            match env.message_type {
                MessageType::Ok => return self.codec.decode(&env.payload),
                MessageType::Error => {
                    let payload = ErrorPayload::from_value(self.codec.decode(&env.payload)?)?;
                    return Err(payload.into_error());
                }
                // Control chatter between request and response is fine.
                MessageType::Authenticated | MessageType::Heartbeat => continue,
                MessageType::Unauthorized => return Err(PalaverError::Unauthorized),
                MessageType::Work | MessageType::Hello => {
                    return Err(PalaverError::NotSupported(
                        "inbound work is not supported in synchronous mode".into(),
                    ))
                }
            }
        }
    }
}

/// Blocking variant of the remote-call builder.
pub struct SyncCall<'a> {
    client: &'a SyncClient,
    segments: Vec<String>,
    args: Vec<Value>,
    kwargs: Kwargs,
}

impl SyncCall<'_> {
    pub fn attr(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn name(&self) -> String {
        self.segments.join(".")
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Send and block until the response arrives or the timeout fires.
    pub fn invoke(self) -> Result<Value, PalaverError> {
        let name = self.name();
        self.client.send_work(&name, self.args, self.kwargs)
    }

    pub fn invoke_as<T: DeserializeOwned>(self) -> Result<T, PalaverError> {
        let value = self.invoke()?;
        serde_json::from_value(value).map_err(|e| PalaverError::Codec(e.to_string()))
    }
}

/// Assembles a [`SyncClient`].
pub struct SyncClientBuilder {
    config: PeerConfig,
    codec: Arc<dyn Codec>,
}

impl SyncClientBuilder {
    pub fn new(identity: impl Into<PeerId>) -> Self {
        Self {
            config: PeerConfig::new(identity),
            codec: Arc::new(MsgpackCodec),
        }
    }

    pub fn target(mut self, identity: impl Into<PeerId>) -> Self {
        self.config.default_target = Some(identity.into());
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn build(self) -> SyncClient {
        SyncClient {
            config: self.config,
            codec: self.codec,
            stream: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_fails_fast() {
        let client = SyncClient::builder("client").build();
        assert!(matches!(
            client.locate("string.upper").arg("x").invoke(),
            Err(PalaverError::NotConnected)
        ));
    }

    #[test]
    fn test_send_to_is_not_supported() {
        let client = SyncClient::builder("client").build();
        assert!(matches!(
            client.send_to("other"),
            Err(PalaverError::NotSupported(_))
        ));
    }

    #[test]
    fn test_locator_accumulation() {
        let client = SyncClient::builder("client").build();
        let call = client.locate("string").attr("upper");
        assert_eq!(call.name(), "string.upper");
    }
}
