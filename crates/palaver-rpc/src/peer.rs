//! The public surface of a peer instance.
//!
//! Both roles share this type: a peer that binds becomes the router side,
//! a peer that connects becomes the direct side. Either may register
//! callables and either may initiate calls once started.

use crate::auth::{AuthBackend, NoopAuth};
use crate::builder::RemoteCall;
use crate::engine::Engine;
use crate::heartbeat::{HeartbeatBackend, NoopHeartbeat};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::service::{Registry, ServiceRegistration};
use crate::transport::{
    bind_router, connect_dealer, parse_endpoint, DealerBinding, RouterBinding,
};
use palaver_types::{PalaverError, PeerConfig, PeerId, RoutingId};
use palaver_wire::{Codec, MsgpackCodec};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

enum Binding {
    Router(RouterBinding),
    Dealer(DealerBinding),
}

/// One instance of the RPC engine, bound or connected to one endpoint.
pub struct Peer {
    engine: Arc<Engine>,
    binding: Mutex<Option<Binding>>,
}

impl Peer {
    pub fn builder(identity: impl Into<PeerId>) -> PeerBuilder {
        PeerBuilder::new(identity)
    }

    /// This peer's own identity.
    pub fn identity(&self) -> &PeerId {
        self.engine.identity()
    }

    /// The peer's local registry scope.
    pub fn registry(&self) -> &Registry {
        self.engine.registry()
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Bind the router side of the protocol to `tcp://host:port`.
    pub async fn bind(&self, endpoint: &str) -> Result<(), PalaverError> {
        let addr = parse_endpoint(endpoint)?;
        let (link, binding) = bind_router(addr, Arc::clone(&self.engine)).await?;
        if let Err(e) = self.engine.set_link(link) {
            binding.shutdown();
            return Err(e);
        }
        *self.binding.lock().unwrap_or_else(|e| e.into_inner()) = Some(Binding::Router(binding));
        Ok(())
    }

    /// Connect the direct side of the protocol to `tcp://host:port`.
    pub async fn connect(&self, endpoint: &str) -> Result<(), PalaverError> {
        let addr = parse_endpoint(endpoint)?;
        let routing_id = RoutingId::from_identity(self.identity());
        let (link, binding) = connect_dealer(addr, routing_id, Arc::clone(&self.engine)).await?;
        if let Err(e) = self.engine.set_link(link) {
            binding.shutdown();
            return Err(e);
        }
        *self.binding.lock().unwrap_or_else(|e| e.into_inner()) = Some(Binding::Dealer(binding));
        Ok(())
    }

    /// The actual bound address, once bound (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.binding.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(Binding::Router(router)) => Some(router.local_addr()),
            _ => None,
        }
    }

    /// Start the backends and announce this peer if its auth backend
    /// wants to.
    pub async fn start(&self) -> Result<(), PalaverError> {
        self.engine.auth().configure();
        self.engine.heartbeat().configure();
        self.engine.send_hello().await?;
        info!(peer = %self.identity(), "peer started");
        Ok(())
    }

    /// Shut the peer down: close the socket (best-effort), stop both
    /// backends, and reject every outstanding call with `Shutdown`.
    pub async fn stop(&self) {
        if let Some(binding) = self
            .binding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            match binding {
                Binding::Router(router) => router.shutdown(),
                Binding::Dealer(dealer) => dealer.shutdown(),
            }
        }
        self.engine.auth().stop();
        self.engine.heartbeat().stop();
        self.engine
            .pending()
            .reject_all(|| PalaverError::Shutdown);
        info!(peer = %self.identity(), "peer stopped");
    }

    /// Begin a call against the default target: `peer.rpc().attr("string")
    /// .attr("upper").arg("hello").invoke()`.
    pub fn rpc(&self) -> RemoteCall {
        RemoteCall::new(Arc::clone(&self.engine), None)
    }

    /// Begin a call from a dotted locator: `peer.locate("string.upper")`.
    pub fn locate(&self, path: &str) -> RemoteCall {
        RemoteCall::with_path(Arc::clone(&self.engine), None, path)
    }

    /// Begin a call explicitly addressed at `identity`, for sockets that
    /// can route to more than one peer.
    pub fn send_to(&self, identity: impl Into<PeerId>) -> RemoteCall {
        RemoteCall::new(Arc::clone(&self.engine), Some(identity.into()))
    }

    /// Add a callable to this peer's local registry scope.
    pub fn register_rpc(&self, registration: ServiceRegistration) {
        self.engine.registry().register(registration);
    }
}

/// Assembles a [`Peer`] with its collaborators.
pub struct PeerBuilder {
    config: PeerConfig,
    codec: Arc<dyn Codec>,
    auth: Arc<dyn AuthBackend>,
    heartbeat: Arc<dyn HeartbeatBackend>,
    scheduler: Arc<dyn Scheduler>,
    proxy_to: Option<Arc<Engine>>,
}

impl PeerBuilder {
    pub fn new(identity: impl Into<PeerId>) -> Self {
        Self {
            config: PeerConfig::new(identity),
            codec: Arc::new(MsgpackCodec),
            auth: Arc::new(NoopAuth::new()),
            heartbeat: Arc::new(NoopHeartbeat),
            scheduler: Arc::new(TokioScheduler),
            proxy_to: None,
        }
    }

    /// The peer addressed when a call names no explicit target.
    pub fn target(mut self, identity: impl Into<PeerId>) -> Self {
        self.config.default_target = Some(identity.into());
        self
    }

    /// Timeout applied to every outbound call.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn auth_backend(mut self, auth: Arc<dyn AuthBackend>) -> Self {
        self.auth = auth;
        self
    }

    pub fn heartbeat_backend(mut self, heartbeat: Arc<dyn HeartbeatBackend>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Consult `proxy` for locators unresolved in this peer's own scopes.
    /// One level only — the proxy's proxy is never reached.
    pub fn proxy_to(mut self, proxy: &Peer) -> Self {
        self.proxy_to = Some(Arc::clone(proxy.engine()));
        self
    }

    pub fn build(self) -> Peer {
        let engine = Engine::new(
            self.config,
            self.codec,
            self.auth,
            self.heartbeat,
            self.scheduler,
            self.proxy_to,
        );
        Peer {
            engine: Arc::new(engine),
            binding: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_types::DEFAULT_CALL_TIMEOUT;

    #[test]
    fn test_builder_defaults() {
        let peer = Peer::builder("server").build();
        assert_eq!(peer.identity(), &PeerId::from("server"));
        assert_eq!(peer.engine().config().call_timeout, DEFAULT_CALL_TIMEOUT);
        assert!(peer.engine().config().default_target.is_none());
        assert!(peer.local_addr().is_none());
    }

    #[test]
    fn test_builder_target_and_timeout() {
        let peer = Peer::builder("client")
            .target("server")
            .call_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(
            peer.engine().config().default_target,
            Some(PeerId::from("server"))
        );
        assert_eq!(
            peer.engine().config().call_timeout,
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_endpoint() {
        let peer = Peer::builder("server").build();
        assert!(matches!(
            peer.bind("udp://127.0.0.1:0").await,
            Err(PalaverError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_double_bind_refused() {
        let peer = Peer::builder("server").build();
        peer.bind("tcp://127.0.0.1:0").await.unwrap();
        assert!(matches!(
            peer.bind("tcp://127.0.0.1:0").await,
            Err(PalaverError::AlreadyConnected)
        ));
        peer.stop().await;
    }
}
