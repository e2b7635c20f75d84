//! Palaver RPC runtime — bidirectional calls over message-passing sockets.
//!
//! Either peer of a connection may initiate calls toward the other; peers
//! are addressed by stable logical identity, not by who dialed whom. The
//! runtime pairs every WORK request with its OK/ERROR response through a
//! correlation-id-keyed pending-call registry, resolves incoming locators
//! through local and process-wide service registries (with one level of
//! proxy fallback), and gates everything behind pluggable authentication
//! and heartbeat backends.
//!
//! ## Architecture
//!
//! - **Engine**: per-frame dispatch state machine shared by both roles
//! - **Peer**: the reactor-mode public surface (bind/connect/start/stop,
//!   dynamic call builder, registration)
//! - **SyncClient**: the blocking, loop-less counterpart
//! - **PendingCalls**: in-flight calls with atomic resolve/expire races
//! - **Registry**: dotted-name service scopes with predicate filtering
//! - **AuthBackend / HeartbeatBackend / Scheduler**: pluggable seams
//!
//! ```no_run
//! use palaver_rpc::{Peer, ServiceRegistration};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), palaver_types::PalaverError> {
//! let server = Peer::builder("server").build();
//! server.register_rpc(ServiceRegistration::new("string.upper", |args, _| {
//!     let s = args[0].as_str().unwrap_or_default();
//!     Ok(json!(s.to_uppercase()))
//! }));
//! server.bind("tcp://127.0.0.1:9090").await?;
//! server.start().await?;
//!
//! let client = Peer::builder("client").target("server").build();
//! client.connect("tcp://127.0.0.1:9090").await?;
//! client.start().await?;
//!
//! let result = client.locate("string.upper").arg("hello").invoke().await?;
//! assert_eq!(result, json!("HELLO"));
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod builder;
pub mod engine;
pub mod heartbeat;
pub mod pending;
pub mod peer;
pub mod scheduler;
pub mod service;
pub mod sync;
pub mod transport;

pub use auth::{AuthBackend, AuthStatus, HelloOutcome, NoopAuth, SharedSecretAuth};
pub use builder::RemoteCall;
pub use engine::Engine;
pub use heartbeat::{HeartbeatBackend, NoopHeartbeat, WatchdogHeartbeat};
pub use pending::{CallReceiver, CallResult, PendingCalls};
pub use peer::{Peer, PeerBuilder};
pub use scheduler::{Scheduler, SyncScheduler, TokioScheduler};
pub use service::{
    global_registry, register_global, PredicateArgs, Registry, ServiceHandler,
    ServiceRegistration,
};
pub use sync::{SyncCall, SyncClient, SyncClientBuilder};
pub use transport::Link;

// The types a consumer needs alongside the runtime.
pub use palaver_types::{CallId, PalaverError, PeerConfig, PeerId, RoutingId};
pub use palaver_wire::{Codec, JsonCodec, Kwargs, MsgpackCodec, Value};
