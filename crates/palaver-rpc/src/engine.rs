//! The peer dispatch engine — the state machine every inbound frame runs
//! through, and the send path every outbound call leaves by.
//!
//! One engine is owned by one peer instance. It never touches a socket
//! directly: frames come in through [`Engine::dispatch`] (driven by the
//! transport's read loops) and leave through the [`Link`] installed at
//! connect/bind time.

use crate::auth::{AuthBackend, HelloOutcome};
use crate::heartbeat::HeartbeatBackend;
use crate::pending::{CallReceiver, PendingCalls};
use crate::scheduler::Scheduler;
use crate::service::{resolve, Registry, ServiceRegistration};
use crate::transport::Link;
use bytes::Bytes;
use dashmap::DashMap;
use palaver_types::{CallId, PalaverError, PeerConfig, PeerId, RoutingId};
use palaver_wire::{Codec, Envelope, ErrorPayload, Kwargs, MessageType, Value, WorkPayload};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Protocol core shared by the client and server roles.
pub struct Engine {
    config: PeerConfig,
    codec: Arc<dyn Codec>,
    auth: Arc<dyn AuthBackend>,
    heartbeat: Arc<dyn HeartbeatBackend>,
    scheduler: Arc<dyn Scheduler>,
    pending: Arc<PendingCalls>,
    registry: Registry,
    /// Routing id → authenticated identity; the identity side-channel.
    identities: DashMap<RoutingId, PeerId>,
    /// Peer consulted for locators unresolved here. One level only.
    proxy_to: Option<Arc<Engine>>,
    link: OnceLock<Link>,
}

impl Engine {
    pub fn new(
        config: PeerConfig,
        codec: Arc<dyn Codec>,
        auth: Arc<dyn AuthBackend>,
        heartbeat: Arc<dyn HeartbeatBackend>,
        scheduler: Arc<dyn Scheduler>,
        proxy_to: Option<Arc<Engine>>,
    ) -> Self {
        let registry = Registry::new(config.identity.to_string());
        Self {
            config,
            codec,
            auth,
            heartbeat,
            scheduler,
            pending: Arc::new(PendingCalls::new()),
            registry,
            identities: DashMap::new(),
            proxy_to,
            link: OnceLock::new(),
        }
    }

    pub fn identity(&self) -> &PeerId {
        &self.config.identity
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pending(&self) -> &Arc<PendingCalls> {
        &self.pending
    }

    pub fn auth(&self) -> &Arc<dyn AuthBackend> {
        &self.auth
    }

    pub fn heartbeat(&self) -> &Arc<dyn HeartbeatBackend> {
        &self.heartbeat
    }

    /// Install the outbound link. Exactly once per engine.
    pub(crate) fn set_link(&self, link: Link) -> Result<(), PalaverError> {
        self.link
            .set(link)
            .map_err(|_| PalaverError::AlreadyConnected)
    }

    fn link(&self) -> Result<&Link, PalaverError> {
        self.link.get().ok_or(PalaverError::NotConnected)
    }

    /// Announce this peer to its counterpart if the auth backend wants to.
    pub(crate) async fn send_hello(&self) -> Result<(), PalaverError> {
        let Some(payload) = self.auth.hello_payload() else {
            return Ok(());
        };
        let link = self.link()?;
        if link.is_routed() {
            // A router has nobody to announce itself to.
            warn!(peer = %self.identity(), "skipping HELLO on a router socket");
            return Ok(());
        }
        debug!(peer = %self.identity(), "announcing HELLO");
        link.send_control(None, CallId::fresh(), MessageType::Hello, Bytes::from(payload))
            .await
    }

    /// Serialize and send a WORK message, registering the pending call.
    ///
    /// Returns immediately with the receiver the response will arrive on.
    pub async fn send_work(
        &self,
        target: Option<&PeerId>,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<CallReceiver, PalaverError> {
        let link = self.link()?;
        let work = WorkPayload::new(name, args, kwargs);
        let payload = Bytes::from(self.codec.encode(&work.to_value())?);
        let correlation_id = CallId::fresh();

        let frames = if link.is_routed() {
            let target = target
                .or(self.config.default_target.as_ref())
                .ok_or_else(|| PalaverError::UnknownPeer("no target for routed call".into()))?;
            let routing_id = self
                .auth
                .get_routing_id(target)
                .unwrap_or_else(|| RoutingId::from_identity(target));
            Envelope::encode_routed(&routing_id, correlation_id, MessageType::Work, payload)
        } else {
            Envelope::encode_direct(correlation_id, MessageType::Work, payload)
        };

        let (tx, rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);
        let guard = self
            .scheduler
            .schedule_later(
                self.config.call_timeout,
                Box::new(move || pending.expire(correlation_id)),
            )?;
        self.pending.register(correlation_id, tx, Some(guard));

        debug!(peer = %self.identity(), %name, %correlation_id, "sending work");
        if let Err(e) = link.send(frames).await {
            self.pending.discard(correlation_id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Run one inbound frame sequence through the state machine.
    ///
    /// Errors returned here are classified by the transport read loop:
    /// protocol-fatal ones tear the connection down, the rest drop the
    /// frame and keep the link alive.
    pub async fn dispatch(&self, frames: Vec<Bytes>) -> Result<(), PalaverError> {
        let env = Envelope::decode(&frames).map_err(|e| {
            error!(peer = %self.identity(), "undecodable frame: {e}");
            e
        })?;
        let identity = self.sender_identity(env.routing_id.as_ref());
        debug!(
            peer = %self.identity(),
            sender = %identity,
            kind = %env.message_type,
            id = %env.correlation_id,
            "frame received"
        );

        if !self.auth.is_authenticated(&identity) {
            return match env.message_type {
                MessageType::Hello => self.handle_hello(&env, &identity).await,
                _ => {
                    self.auth
                        .handle_authentication(
                            self.link()?,
                            &identity,
                            env.routing_id.as_ref(),
                            env.correlation_id,
                        )
                        .await
                }
            };
        }

        // Every frame from an authenticated sender counts as a heartbeat,
        // and refreshes its route.
        self.heartbeat
            .handle_heartbeat(&identity, env.routing_id.as_ref());
        if let Some(rid) = &env.routing_id {
            self.auth.register_routing_id(identity.clone(), rid.clone());
        }

        match env.message_type {
            MessageType::Work => self.handle_work(&env, &identity).await,
            MessageType::Ok => {
                let value = self.codec.decode(&env.payload)?;
                self.pending.resolve(env.correlation_id, value);
                Ok(())
            }
            MessageType::Error => {
                let payload = ErrorPayload::from_value(self.codec.decode(&env.payload)?)?;
                self.pending.reject(env.correlation_id, payload.into_error());
                Ok(())
            }
            MessageType::Authenticated => {
                self.auth.handle_authenticated(&env.payload);
                Ok(())
            }
            MessageType::Unauthorized => {
                self.auth
                    .handle_authentication(
                        self.link()?,
                        &identity,
                        env.routing_id.as_ref(),
                        env.correlation_id,
                    )
                    .await
            }
            MessageType::Heartbeat => Ok(()),
            MessageType::Hello => self.handle_hello(&env, &identity).await,
        }
    }

    /// Who sent a frame: the authenticated identity recorded for its
    /// route, else the identity its routing id claims, else the direct
    /// socket's configured counterpart.
    fn sender_identity(&self, routing_id: Option<&RoutingId>) -> PeerId {
        match routing_id {
            Some(rid) => self
                .identities
                .get(rid)
                .map(|entry| entry.value().clone())
                .unwrap_or_else(|| PeerId::from_routing(rid)),
            None => self
                .config
                .default_target
                .clone()
                .unwrap_or_else(PeerId::anonymous),
        }
    }

    async fn handle_hello(&self, env: &Envelope, identity: &PeerId) -> Result<(), PalaverError> {
        let outcome = self
            .auth
            .handle_hello(
                self.link()?,
                identity,
                env.routing_id.as_ref(),
                env.correlation_id,
                &env.payload,
            )
            .await?;
        match outcome {
            HelloOutcome::Authenticated(peer) => {
                if let Some(rid) = &env.routing_id {
                    self.identities.insert(rid.clone(), peer.clone());
                    self.auth.register_routing_id(peer, rid.clone());
                }
                Ok(())
            }
            HelloOutcome::Unauthorized => Ok(()),
        }
    }

    /// Resolve and run a WORK request, then reply OK or ERROR. The reply
    /// is mandatory; failing to send it is fatal to this peer's link.
    async fn handle_work(&self, env: &Envelope, caller: &PeerId) -> Result<(), PalaverError> {
        let work = WorkPayload::from_value(self.codec.decode(&env.payload)?)?;

        let (status, body) = match self.perform_work(&work, caller).await {
            Ok(value) => (MessageType::Ok, value),
            Err(err) => {
                warn!(peer = %self.identity(), name = %work.name, "work failed: {err}");
                (MessageType::Error, ErrorPayload::capture(&err).to_value())
            }
        };

        let payload = Bytes::from(self.codec.encode(&body)?);
        let frames = match &env.routing_id {
            Some(rid) => Envelope::encode_routed(rid, env.correlation_id, status, payload),
            None => Envelope::encode_direct(env.correlation_id, status, payload),
        };
        self.link()?.send(frames).await.map_err(|e| {
            error!(peer = %self.identity(), "failed to send work reply: {e}");
            e
        })
    }

    /// Local resolution, then one hop into the proxy peer's scopes.
    async fn perform_work(&self, work: &WorkPayload, caller: &PeerId) -> Result<Value, PalaverError> {
        match self.handle_work_local(work, caller).await {
            Err(PalaverError::ServiceNotFound(_)) if self.proxy_to.is_some() => {
                let proxy = self.proxy_to.as_ref().expect("checked above");
                debug!(
                    peer = %self.identity(),
                    proxy = %proxy.identity(),
                    name = %work.name,
                    "delegating unresolved locator to proxy"
                );
                proxy.handle_work_local(work, caller).await
            }
            other => other,
        }
    }

    /// Resolve through this engine's local + process-wide scopes and
    /// invoke. Never consults this engine's own proxy — that is what caps
    /// proxy chains at one level.
    async fn handle_work_local(
        &self,
        work: &WorkPayload,
        caller: &PeerId,
    ) -> Result<Value, PalaverError> {
        let attrs = self.auth.get_predicate_arguments(caller);
        let registration: ServiceRegistration = resolve(&work.name, &attrs, &self.registry)?;

        let mut args = work.args.clone();
        if registration.expects_identity() {
            args.insert(0, Value::String(caller.to_string()));
        }
        registration.handler().call(args, work.kwargs.clone()).await
    }
}
