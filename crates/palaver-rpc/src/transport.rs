//! Reactor-mode TCP bindings.
//!
//! A **router** binding is a listener with one serve task per inbound
//! connection. Each connection opens with a one-frame preamble announcing
//! the remote's routing id (the moral equivalent of a dealer socket
//! identity); after that, the router prepends `[routing_id, delimiter]` to
//! every inbound message and strips them from outbound ones, so the far
//! side always sees the 4-frame direct shape.
//!
//! A **dealer** binding is a single outbound connection that announces its
//! own routing id and then exchanges direct-shape messages.

use crate::engine::Engine;
use bytes::Bytes;
use dashmap::DashMap;
use palaver_types::{CallId, PalaverError, RoutingId};
use palaver_wire::{read_frames, write_frames, Envelope, MessageType};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outbound frames queued per connection before hitting the socket.
const SEND_QUEUE_DEPTH: usize = 64;

type FrameSender = mpsc::Sender<Vec<Bytes>>;

/// The outbound half of a peer's socket, shared with the engine and the
/// authentication backend.
#[derive(Clone)]
pub enum Link {
    /// Single-counterpart socket; messages use the 4-frame direct shape.
    Direct(FrameSender),
    /// Fan-in/fan-out socket; messages use the 6-frame routed shape and
    /// are demultiplexed onto per-connection queues by routing id.
    Routed(Arc<DashMap<RoutingId, FrameSender>>),
}

impl Link {
    pub fn is_routed(&self) -> bool {
        matches!(self, Self::Routed(_))
    }

    /// Send one already-encoded frame sequence.
    ///
    /// Routed sequences are addressed by their leading routing id frame;
    /// the routing envelope is stripped before the bytes leave, matching
    /// what a direct-socket receiver expects.
    pub async fn send(&self, frames: Vec<Bytes>) -> Result<(), PalaverError> {
        match self {
            Self::Direct(tx) => tx
                .send(frames)
                .await
                .map_err(|_| PalaverError::ConnectionClosed),
            Self::Routed(conns) => {
                if frames.len() != 6 {
                    return Err(PalaverError::MalformedFrame(format!(
                        "routed send expects 6 frames, got {}",
                        frames.len()
                    )));
                }
                let routing_id = RoutingId::new(frames[0].clone());
                let tx = conns
                    .get(&routing_id)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| PalaverError::UnknownPeer(routing_id.to_string()))?;
                tx.send(frames[2..].to_vec())
                    .await
                    .map_err(|_| PalaverError::ConnectionClosed)
            }
        }
    }

    /// Build and send a control frame (HELLO and friends) in this socket's
    /// shape, addressed at `routing_id` when routed.
    pub async fn send_control(
        &self,
        routing_id: Option<&RoutingId>,
        correlation_id: CallId,
        message_type: MessageType,
        payload: Bytes,
    ) -> Result<(), PalaverError> {
        let frames = match (self.is_routed(), routing_id) {
            (true, Some(rid)) => Envelope::encode_routed(rid, correlation_id, message_type, payload),
            (true, None) => {
                return Err(PalaverError::UnknownPeer(
                    "routed control frame needs a routing id".into(),
                ))
            }
            (false, _) => Envelope::encode_direct(correlation_id, message_type, payload),
        };
        self.send(frames).await
    }
}

/// A bound router socket: the listener's address plus its background tasks.
pub struct RouterBinding {
    local_addr: SocketAddr,
    conns: Arc<DashMap<RoutingId, FrameSender>>,
    accept_task: JoinHandle<()>,
}

impl RouterBinding {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Tear down the listener and every connection queue. Best-effort:
    /// already-gone sockets are fine.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.conns.clear();
    }
}

/// A connected dealer socket and its background tasks.
pub struct DealerBinding {
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl DealerBinding {
    pub fn shutdown(&self) {
        self.read_task.abort();
        self.write_task.abort();
    }
}

/// Bind a router socket and start accepting connections.
pub async fn bind_router(
    addr: SocketAddr,
    engine: Arc<Engine>,
) -> Result<(Link, RouterBinding), PalaverError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let conns: Arc<DashMap<RoutingId, FrameSender>> = Arc::new(DashMap::new());

    info!(peer = %engine.identity(), %local_addr, "router listening");

    let accept_conns = Arc::clone(&conns);
    let accept_task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    debug!(%remote, "accepted connection");
                    let conns = Arc::clone(&accept_conns);
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        serve_connection(stream, remote, conns, engine).await;
                    });
                }
                Err(e) => {
                    error!("accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    let link = Link::Routed(Arc::clone(&conns));
    Ok((
        link,
        RouterBinding {
            local_addr,
            conns,
            accept_task,
        },
    ))
}

/// Serve one inbound connection: read the routing preamble, register the
/// write queue, then pump frames into the dispatch engine.
async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    conns: Arc<DashMap<RoutingId, FrameSender>>,
    engine: Arc<Engine>,
) {
    let (mut reader, writer) = stream.into_split();

    let routing_id = match read_preamble(&mut reader).await {
        Ok(rid) => rid,
        Err(e) => {
            warn!(%remote, "dropping connection without preamble: {e}");
            return;
        }
    };
    debug!(%remote, %routing_id, "connection announced routing id");

    let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    conns.insert(routing_id.clone(), tx.clone());
    let write_task = tokio::spawn(write_loop(writer, rx));

    read_loop(&mut reader, &engine, Some(&routing_id)).await;

    // A reconnect under the same routing id replaces our queue; only
    // remove the entry if it is still ours.
    conns.remove_if(&routing_id, |_, current| current.same_channel(&tx));
    write_task.abort();
}

async fn read_preamble(reader: &mut OwnedReadHalf) -> Result<RoutingId, PalaverError> {
    let frames = read_frames(reader).await?;
    match frames.as_slice() {
        [rid] if !rid.is_empty() => Ok(RoutingId::new(rid.clone())),
        _ => Err(PalaverError::MalformedFrame(
            "preamble must be a single non-empty routing id frame".into(),
        )),
    }
}

/// Connect a dealer socket, announce `routing_id`, and start pumping.
pub async fn connect_dealer(
    addr: SocketAddr,
    routing_id: RoutingId,
    engine: Arc<Engine>,
) -> Result<(Link, DealerBinding), PalaverError> {
    let stream = TcpStream::connect(addr).await?;
    let (mut reader, mut writer) = stream.into_split();

    write_frames(&mut writer, &[routing_id.to_frame()]).await?;
    info!(peer = %engine.identity(), %addr, "dealer connected");

    let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
    let write_task = tokio::spawn(write_loop(writer, rx));
    let read_task = tokio::spawn(async move {
        read_loop(&mut reader, &engine, None).await;
    });

    Ok((Link::Direct(tx), DealerBinding { read_task, write_task }))
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<Bytes>>) {
    while let Some(frames) = rx.recv().await {
        if let Err(e) = write_frames(&mut writer, &frames).await {
            warn!("write failed, closing connection: {e}");
            break;
        }
    }
}

/// Pump inbound messages into the engine until the connection dies or a
/// protocol-fatal error tears it down. Router connections prepend the
/// routing envelope so the engine sees the 6-frame shape.
async fn read_loop(reader: &mut OwnedReadHalf, engine: &Arc<Engine>, routing_id: Option<&RoutingId>) {
    loop {
        let frames = match read_frames(reader).await {
            Ok(frames) => frames,
            Err(PalaverError::ConnectionClosed) => {
                debug!("connection closed by remote");
                break;
            }
            Err(e) => {
                warn!("read failed, closing connection: {e}");
                break;
            }
        };

        let frames = match routing_id {
            Some(rid) => {
                let mut full = Vec::with_capacity(frames.len() + 2);
                full.push(rid.to_frame());
                full.push(Bytes::new());
                full.extend(frames);
                full
            }
            None => frames,
        };

        if let Err(e) = engine.dispatch(frames).await {
            if e.is_protocol_fatal() {
                error!("protocol violation, dropping connection: {e}");
                break;
            }
            warn!("frame dropped: {e}");
        }
    }
}

/// Parse a `tcp://host:port` endpoint.
pub fn parse_endpoint(endpoint: &str) -> Result<SocketAddr, PalaverError> {
    let rest = endpoint
        .strip_prefix("tcp://")
        .ok_or_else(|| PalaverError::InvalidEndpoint(format!("expected tcp:// scheme: {endpoint}")))?;
    rest.parse()
        .map_err(|_| PalaverError::InvalidEndpoint(endpoint.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let addr = parse_endpoint("tcp://127.0.0.1:4567").unwrap();
        assert_eq!(addr.port(), 4567);

        assert!(matches!(
            parse_endpoint("ipc:///tmp/sock"),
            Err(PalaverError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            parse_endpoint("tcp://nonsense"),
            Err(PalaverError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_routed_send_requires_known_peer() {
        let conns: Arc<DashMap<RoutingId, FrameSender>> = Arc::new(DashMap::new());
        let link = Link::Routed(conns);
        let frames = Envelope::encode_routed(
            &RoutingId::new(&b"ghost"[..]),
            CallId::fresh(),
            MessageType::Work,
            Bytes::new(),
        );
        assert!(matches!(
            link.send(frames).await,
            Err(PalaverError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_routed_send_strips_envelope() {
        let conns: Arc<DashMap<RoutingId, FrameSender>> = Arc::new(DashMap::new());
        let rid = RoutingId::new(&b"client1"[..]);
        let (tx, mut rx) = mpsc::channel(4);
        conns.insert(rid.clone(), tx);

        let link = Link::Routed(conns);
        let frames = Envelope::encode_routed(&rid, CallId::fresh(), MessageType::Ok, Bytes::new());
        link.send(frames).await.unwrap();

        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].as_ref(), palaver_wire::VERSION);
    }
}
