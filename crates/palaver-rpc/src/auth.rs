//! Authentication backend contract and the two bundled backends.
//!
//! The dispatch engine owns *when* authentication happens; backends own
//! *how*. A backend answers HELLO frames, challenges unauthenticated
//! senders, and keeps the identity → routing-id table used to address
//! outbound work.

use crate::service::PredicateArgs;
use crate::transport::Link;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use palaver_types::{CallId, PalaverError, PeerId, RoutingId};
use palaver_wire::MessageType;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};

/// Authentication progress for one remote identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

/// What a HELLO led to.
#[derive(Debug)]
pub enum HelloOutcome {
    /// The sender proved this identity; the engine records its route.
    Authenticated(PeerId),
    /// The sender was refused (and told so).
    Unauthorized,
}

/// Pluggable authentication strategy.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// One-time setup at peer start.
    fn configure(&self) {}

    /// Whether frames from this identity may be processed as work/results.
    fn is_authenticated(&self, identity: &PeerId) -> bool;

    /// Raw HELLO payload this peer should announce at start, if any.
    fn hello_payload(&self) -> Option<Vec<u8>> {
        None
    }

    /// Answer a HELLO frame. The backend replies on `link` (AUTHENTICATED
    /// or UNAUTHORIZED) and reports the outcome.
    async fn handle_hello(
        &self,
        link: &Link,
        identity: &PeerId,
        routing_id: Option<&RoutingId>,
        correlation_id: CallId,
        payload: &[u8],
    ) -> Result<HelloOutcome, PalaverError>;

    /// Run the challenge flow: either scold an unauthenticated sender or,
    /// when this peer is the one being challenged, re-announce itself.
    async fn handle_authentication(
        &self,
        link: &Link,
        identity: &PeerId,
        routing_id: Option<&RoutingId>,
        correlation_id: CallId,
    ) -> Result<(), PalaverError>;

    /// The remote confirmed us; `payload` carries its credentials.
    fn handle_authenticated(&self, payload: &[u8]);

    /// Route last seen for this identity.
    fn get_routing_id(&self, identity: &PeerId) -> Option<RoutingId>;

    /// Record the route an authenticated frame arrived on.
    fn register_routing_id(&self, identity: PeerId, routing_id: RoutingId);

    /// Caller attributes for predicate filtering.
    fn get_predicate_arguments(&self, identity: &PeerId) -> PredicateArgs;

    /// One-time teardown at peer stop.
    fn stop(&self) {}
}

/// No-op backend: every sender is authenticated and identities double as
/// routing ids.
#[derive(Default)]
pub struct NoopAuth {
    routing: DashMap<PeerId, RoutingId>,
}

impl NoopAuth {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthBackend for NoopAuth {
    fn is_authenticated(&self, _identity: &PeerId) -> bool {
        true
    }

    async fn handle_hello(
        &self,
        link: &Link,
        identity: &PeerId,
        routing_id: Option<&RoutingId>,
        correlation_id: CallId,
        payload: &[u8],
    ) -> Result<HelloOutcome, PalaverError> {
        // Trust whatever the payload claims, or fall back to the claimed
        // sender identity.
        let peer = if payload.is_empty() {
            identity.clone()
        } else {
            PeerId::from(String::from_utf8_lossy(payload).into_owned())
        };
        if let Some(rid) = routing_id {
            self.register_routing_id(peer.clone(), rid.clone());
        }
        link.send_control(routing_id, correlation_id, MessageType::Authenticated, Bytes::new())
            .await?;
        Ok(HelloOutcome::Authenticated(peer))
    }

    async fn handle_authentication(
        &self,
        _link: &Link,
        identity: &PeerId,
        _routing_id: Option<&RoutingId>,
        _correlation_id: CallId,
    ) -> Result<(), PalaverError> {
        // Unreachable in practice: nobody is ever unauthenticated here.
        debug!(%identity, "noop auth challenge ignored");
        Ok(())
    }

    fn handle_authenticated(&self, _payload: &[u8]) {}

    fn get_routing_id(&self, identity: &PeerId) -> Option<RoutingId> {
        self.routing.get(identity).map(|entry| entry.value().clone())
    }

    fn register_routing_id(&self, identity: PeerId, routing_id: RoutingId) {
        self.routing.insert(identity, routing_id);
    }

    fn get_predicate_arguments(&self, _identity: &PeerId) -> PredicateArgs {
        PredicateArgs::new()
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Generate the hex HMAC-SHA256 signature over `data`.
fn hmac_sign(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature using constant-time comparison.
fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    let expected = hmac_sign(secret, data);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

/// Which side of the handshake this backend plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecretRole {
    /// Verifies every HELLO and challenges strangers.
    Verifier,
    /// Announces credentials at start and trusts its configured peer.
    Announcer,
}

/// Pre-shared-secret backend: HELLO carries
/// `identity\nnonce\nHMAC-SHA256(secret, nonce + identity)` in hex.
///
/// Acceptance is answered with AUTHENTICATED carrying the responder's own
/// credentials, so authentication is mutual; rejection is answered with
/// UNAUTHORIZED, and the challenged side re-announces itself.
pub struct SharedSecretAuth {
    identity: PeerId,
    secret: String,
    role: SecretRole,
    status: DashMap<PeerId, AuthStatus>,
    routing: DashMap<PeerId, RoutingId>,
}

impl SharedSecretAuth {
    /// Backend for the binding side: verifies every HELLO.
    pub fn server(identity: impl Into<PeerId>, secret: impl Into<String>) -> Self {
        Self::with_role(identity, secret, SecretRole::Verifier)
    }

    /// Backend for the connecting side: announces credentials at start
    /// and treats its single configured peer as trusted.
    pub fn client(identity: impl Into<PeerId>, secret: impl Into<String>) -> Self {
        Self::with_role(identity, secret, SecretRole::Announcer)
    }

    fn with_role(identity: impl Into<PeerId>, secret: impl Into<String>, role: SecretRole) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            role,
            status: DashMap::new(),
            routing: DashMap::new(),
        }
    }

    /// Authentication progress for one identity, as this backend saw it.
    pub fn status(&self, identity: &PeerId) -> AuthStatus {
        self.status
            .get(identity)
            .map(|entry| *entry.value())
            .unwrap_or(AuthStatus::Unauthenticated)
    }

    fn credentials(&self) -> Vec<u8> {
        let nonce = uuid::Uuid::new_v4().to_string();
        let signature = hmac_sign(
            &self.secret,
            format!("{nonce}{}", self.identity).as_bytes(),
        );
        format!("{}\n{nonce}\n{signature}", self.identity).into_bytes()
    }

    /// Check a credential payload and return the identity it proves.
    fn verify(&self, payload: &[u8]) -> Option<PeerId> {
        let text = std::str::from_utf8(payload).ok()?;
        let mut lines = text.splitn(3, '\n');
        let identity = lines.next()?;
        let nonce = lines.next()?;
        let signature = lines.next()?;
        if identity.is_empty() {
            return None;
        }
        hmac_verify(
            &self.secret,
            format!("{nonce}{identity}").as_bytes(),
            signature,
        )
        .then(|| PeerId::from(identity))
    }
}

#[async_trait]
impl AuthBackend for SharedSecretAuth {
    fn is_authenticated(&self, identity: &PeerId) -> bool {
        match self.role {
            // The announcer talks to exactly one peer it already trusts.
            SecretRole::Announcer => true,
            SecretRole::Verifier => self.status(identity) == AuthStatus::Authenticated,
        }
    }

    fn hello_payload(&self) -> Option<Vec<u8>> {
        (self.role == SecretRole::Announcer).then(|| self.credentials())
    }

    async fn handle_hello(
        &self,
        link: &Link,
        identity: &PeerId,
        routing_id: Option<&RoutingId>,
        correlation_id: CallId,
        payload: &[u8],
    ) -> Result<HelloOutcome, PalaverError> {
        match self.verify(payload) {
            Some(peer) => {
                info!(%peer, "peer authenticated");
                self.status.insert(peer.clone(), AuthStatus::Authenticated);
                if let Some(rid) = routing_id {
                    self.register_routing_id(peer.clone(), rid.clone());
                }
                link.send_control(
                    routing_id,
                    correlation_id,
                    MessageType::Authenticated,
                    Bytes::from(self.credentials()),
                )
                .await?;
                Ok(HelloOutcome::Authenticated(peer))
            }
            None => {
                warn!(claimed = %identity, "rejected HELLO with bad credentials");
                self.status
                    .insert(identity.clone(), AuthStatus::Unauthenticated);
                link.send_control(routing_id, correlation_id, MessageType::Unauthorized, Bytes::new())
                    .await?;
                Ok(HelloOutcome::Unauthorized)
            }
        }
    }

    async fn handle_authentication(
        &self,
        link: &Link,
        identity: &PeerId,
        routing_id: Option<&RoutingId>,
        correlation_id: CallId,
    ) -> Result<(), PalaverError> {
        match routing_id {
            // Router side: an unauthenticated sender tried something other
            // than HELLO. Tell it to authenticate.
            Some(rid) => {
                debug!(%identity, "challenging unauthenticated sender");
                self.status
                    .insert(identity.clone(), AuthStatus::Unauthenticated);
                link.send_control(
                    Some(rid),
                    correlation_id,
                    MessageType::Unauthorized,
                    Bytes::new(),
                )
                .await
            }
            // Direct side: we are the one being challenged. Re-announce,
            // unless the previous announcement was itself just refused —
            // credentials will not get better by repetition.
            None => {
                if self.status(identity) == AuthStatus::Authenticating {
                    warn!(%identity, "credentials refused twice, giving up");
                    self.status
                        .insert(identity.clone(), AuthStatus::Unauthenticated);
                    return Ok(());
                }
                debug!("re-announcing credentials after challenge");
                self.status
                    .insert(identity.clone(), AuthStatus::Authenticating);
                link.send_control(
                    None,
                    correlation_id,
                    MessageType::Hello,
                    Bytes::from(self.credentials()),
                )
                .await
            }
        }
    }

    fn handle_authenticated(&self, payload: &[u8]) {
        match self.verify(payload) {
            Some(peer) => {
                info!(%peer, "peer confirmed us and proved itself");
                self.status.insert(peer, AuthStatus::Authenticated);
            }
            None => warn!("AUTHENTICATED carried credentials that do not verify"),
        }
    }

    fn get_routing_id(&self, identity: &PeerId) -> Option<RoutingId> {
        self.routing.get(identity).map(|entry| entry.value().clone())
    }

    fn register_routing_id(&self, identity: PeerId, routing_id: RoutingId) {
        self.routing.insert(identity, routing_id);
    }

    fn get_predicate_arguments(&self, identity: &PeerId) -> PredicateArgs {
        // Authenticated callers carry their identity as an attribute,
        // usable by predicate-gated registrations.
        let mut attrs = PredicateArgs::new();
        if self.is_authenticated(identity) && !identity.is_anonymous() {
            attrs.insert("authenticated_id".into(), Value::String(identity.to_string()));
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sign_verify() {
        let sig = hmac_sign("secret", b"nonce-client");
        assert!(hmac_verify("secret", b"nonce-client", &sig));
        assert!(!hmac_verify("other", b"nonce-client", &sig));
        assert!(!hmac_verify("secret", b"tampered", &sig));
    }

    #[test]
    fn test_credentials_verify_with_shared_secret() {
        let client = SharedSecretAuth::client("client1", "hunter2");
        let server = SharedSecretAuth::server("server", "hunter2");

        let creds = client.credentials();
        assert_eq!(server.verify(&creds), Some(PeerId::from("client1")));
    }

    #[test]
    fn test_credentials_fail_across_secrets() {
        let client = SharedSecretAuth::client("client1", "hunter2");
        let server = SharedSecretAuth::server("server", "different");
        assert_eq!(server.verify(&client.credentials()), None);
    }

    #[test]
    fn test_garbage_payload_fails_verification() {
        let server = SharedSecretAuth::server("server", "hunter2");
        assert_eq!(server.verify(b""), None);
        assert_eq!(server.verify(b"no-newlines-here"), None);
        assert_eq!(server.verify(&[0xff, 0xfe, 0x0a, 0x0a]), None);
    }

    #[test]
    fn test_verifier_gates_until_authenticated() {
        let server = SharedSecretAuth::server("server", "s3cret");
        let client_id = PeerId::from("client1");
        assert!(!server.is_authenticated(&client_id));

        server
            .status
            .insert(client_id.clone(), AuthStatus::Authenticated);
        assert!(server.is_authenticated(&client_id));
    }

    #[test]
    fn test_announcer_trusts_and_announces() {
        let client = SharedSecretAuth::client("client1", "s3cret");
        assert!(client.is_authenticated(&PeerId::from("server")));
        assert!(client.hello_payload().is_some());

        let server = SharedSecretAuth::server("server", "s3cret");
        assert!(server.hello_payload().is_none());
    }

    #[test]
    fn test_handle_authenticated_records_status() {
        let client = SharedSecretAuth::client("client1", "s3cret");
        let server = SharedSecretAuth::server("server", "s3cret");

        client.handle_authenticated(&server.credentials());
        assert_eq!(client.status(&PeerId::from("server")), AuthStatus::Authenticated);
    }

    #[test]
    fn test_noop_routing_defaults() {
        let auth = NoopAuth::new();
        let id = PeerId::from("client1");
        assert!(auth.get_routing_id(&id).is_none());

        auth.register_routing_id(id.clone(), RoutingId::from_identity(&id));
        assert_eq!(
            auth.get_routing_id(&id).unwrap().as_bytes(),
            b"client1".as_slice()
        );
        assert!(auth.is_authenticated(&PeerId::anonymous()));
    }
}
