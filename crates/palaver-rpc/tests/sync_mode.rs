//! The blocking client against a reactor-mode server.

use async_trait::async_trait;
use palaver_rpc::{
    Kwargs, PalaverError, Peer, ServiceHandler, ServiceRegistration, SyncClient, Value,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct SlowEcho(Duration);

#[async_trait]
impl ServiceHandler for SlowEcho {
    async fn call(&self, args: Vec<Value>, _kwargs: Kwargs) -> Result<Value, PalaverError> {
        tokio::time::sleep(self.0).await;
        Ok(args.into_iter().next().unwrap_or(Value::Null))
    }
}

async fn bound_server() -> (Peer, String) {
    let server = Peer::builder("server").build();
    server.register_rpc(ServiceRegistration::new("sync.upper", |args, _| {
        let s = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| PalaverError::Handler("expected a string".into()))?;
        Ok(json!(s.to_uppercase()))
    }));
    server.register_rpc(ServiceRegistration::with_handler(
        "sync.slow.echo",
        Arc::new(SlowEcho(Duration::from_secs(2))),
    ));
    server.bind("tcp://127.0.0.1:0").await.unwrap();
    let endpoint = format!("tcp://{}", server.local_addr().unwrap());
    server.start().await.unwrap();
    (server, endpoint)
}

#[tokio::test]
async fn test_blocking_call_roundtrip() {
    let (server, endpoint) = bound_server().await;

    let result = tokio::task::spawn_blocking(move || {
        let client = SyncClient::builder("sync-client").target("server").build();
        client.connect(&endpoint)?;
        let result = client.locate("sync.upper").arg("hello").invoke();
        client.stop();
        result
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(result, json!("HELLO"));

    server.stop().await;
}

#[tokio::test]
async fn test_blocking_error_reconstruction() {
    let (server, endpoint) = bound_server().await;

    let err = tokio::task::spawn_blocking(move || {
        let client = SyncClient::builder("sync-client").target("server").build();
        client.connect(&endpoint)?;
        let result = client.locate("sync.no.such.name").invoke();
        client.stop();
        result
    })
    .await
    .unwrap()
    .unwrap_err();
    assert!(
        matches!(err, PalaverError::ServiceNotFound(_)),
        "got {err:?}"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_blocking_timeout_from_socket() {
    let (server, endpoint) = bound_server().await;

    let err = tokio::task::spawn_blocking(move || {
        let client = SyncClient::builder("sync-client")
            .target("server")
            .call_timeout(Duration::from_millis(150))
            .build();
        client.connect(&endpoint)?;
        let result = client.locate("sync.slow.echo").arg("too slow").invoke();
        client.stop();
        result
    })
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, PalaverError::Timeout), "got {err:?}");

    server.stop().await;
}

#[tokio::test]
async fn test_stop_tolerates_missing_socket() {
    // Stopping an unconnected client is a no-op, not a panic.
    let client = SyncClient::builder("sync-client").build();
    client.stop();
    client.stop();
}
