//! Shared-secret authentication over real sockets: the handshake, the
//! challenge flow, and predicate-gated visibility.

use palaver_rpc::{
    AuthBackend, PalaverError, Peer, PeerId, ServiceRegistration, SharedSecretAuth, Value,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn upper_rpc(name: &str) -> ServiceRegistration {
    ServiceRegistration::new(name, |args, _| {
        let s = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| PalaverError::Handler("expected a string".into()))?;
        Ok(json!(s.to_uppercase()))
    })
}

#[tokio::test]
async fn test_handshake_then_work() {
    let server_auth = Arc::new(SharedSecretAuth::server("server", "hunter2"));
    let server = Peer::builder("server")
        .auth_backend(Arc::clone(&server_auth) as Arc<dyn palaver_rpc::AuthBackend>)
        .build();
    server.register_rpc(upper_rpc("auth.upper"));
    server.bind("tcp://127.0.0.1:0").await.unwrap();
    let endpoint = format!("tcp://{}", server.local_addr().unwrap());
    server.start().await.unwrap();

    let client = Peer::builder("client")
        .target("server")
        .auth_backend(Arc::new(SharedSecretAuth::client("client", "hunter2")))
        .build();
    client.connect(&endpoint).await.unwrap();
    // start() announces the HELLO; the same connection carries it before
    // any WORK, so no settling sleep is needed for ordering.
    client.start().await.unwrap();

    let result = client
        .locate("auth.upper")
        .arg("hello")
        .invoke()
        .await
        .unwrap();
    assert_eq!(result, json!("HELLO"));

    assert!(server_auth.is_authenticated(&PeerId::from("client")));

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_wrong_secret_is_refused() {
    let server_auth = Arc::new(SharedSecretAuth::server("server", "right-secret"));
    let server = Peer::builder("server")
        .auth_backend(Arc::clone(&server_auth) as Arc<dyn palaver_rpc::AuthBackend>)
        .build();
    server.register_rpc(upper_rpc("auth.gated.upper"));
    server.bind("tcp://127.0.0.1:0").await.unwrap();
    let endpoint = format!("tcp://{}", server.local_addr().unwrap());
    server.start().await.unwrap();

    let client = Peer::builder("mallory")
        .target("server")
        .auth_backend(Arc::new(SharedSecretAuth::client("mallory", "wrong-secret")))
        .call_timeout(Duration::from_millis(150))
        .build();
    client.connect(&endpoint).await.unwrap();
    client.start().await.unwrap();

    // The WORK is challenged, never processed; the call expires.
    let err = client
        .locate("auth.gated.upper")
        .arg("hello")
        .invoke()
        .await
        .unwrap_err();
    assert!(matches!(err, PalaverError::Timeout), "got {err:?}");

    assert!(!server_auth.is_authenticated(&PeerId::from("mallory")));

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_predicates_gate_visibility_by_caller() {
    let server = Peer::builder("server")
        .auth_backend(Arc::new(SharedSecretAuth::server("server", "hunter2")))
        .build();
    // Visible only to the caller authenticated as "admin".
    server.register_rpc(
        ServiceRegistration::new("auth.admin.reset", |_, _| Ok(json!("reset done")))
            .require("authenticated_id", "admin"),
    );
    server.bind("tcp://127.0.0.1:0").await.unwrap();
    let endpoint = format!("tcp://{}", server.local_addr().unwrap());
    server.start().await.unwrap();

    let admin = Peer::builder("admin")
        .target("server")
        .auth_backend(Arc::new(SharedSecretAuth::client("admin", "hunter2")))
        .build();
    admin.connect(&endpoint).await.unwrap();
    admin.start().await.unwrap();

    let bob = Peer::builder("bob")
        .target("server")
        .auth_backend(Arc::new(SharedSecretAuth::client("bob", "hunter2")))
        .build();
    bob.connect(&endpoint).await.unwrap();
    bob.start().await.unwrap();

    assert_eq!(
        admin.locate("auth.admin.reset").invoke().await.unwrap(),
        json!("reset done")
    );

    // Authenticated, but the predicate does not match: reads as absent.
    let err = bob.locate("auth.admin.reset").invoke().await.unwrap_err();
    assert!(matches!(err, PalaverError::ServiceNotFound(_)));

    admin.stop().await;
    bob.stop().await;
    server.stop().await;
}
