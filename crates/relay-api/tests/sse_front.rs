//! Integration tests for the streaming front
//!
//! The first group drives the axum router in-process. The end-to-end group
//! serves a mock-backed gateway on a real socket and talks to it with the
//! relay's own stream backend client, the same way an upstream gateway
//! would.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use relay_api::{create_router, serve_sse, AppState, AuthGate};
use relay_backend::DefaultConnector;
use relay_core::{
    BackendConnector, BackendDescriptor, CapabilityKind, GatewayError, Secret, StreamConfig,
    StreamHeaders, TransportConfig,
};
use relay_gateway::mock::{MockBackend, MockConnector, MockHandle, RecordingTimer};
use relay_gateway::Gateway;

const TOKEN: &str = "test-token";

// =============================================================================
// Helpers
// =============================================================================

async fn mock_gateway() -> (Gateway, MockHandle) {
    let backend = MockBackend::new("files")
        .with_tools(&["read_file", "write_file"])
        .with_resources(&["file:///notes.txt"]);
    let handle = backend.handle();

    let gateway = Gateway::with_timer(
        Arc::new(MockConnector::new().with_backend(backend)),
        Arc::new(RecordingTimer::new()),
    );
    gateway.start(&[MockConnector::descriptor("files")]).await;
    (gateway, handle)
}

fn gate() -> AuthGate {
    AuthGate::new(Some(Secret::new(TOKEN)))
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn stream_descriptor(url: String, token: &str) -> BackendDescriptor {
    BackendDescriptor {
        name: "upstream".to_string(),
        transport: TransportConfig::Stream(StreamConfig {
            url,
            headers: StreamHeaders {
                authorization: Some(Secret::new(format!("Bearer {}", token))),
            },
        }),
        namespace: false,
    }
}

// =============================================================================
// Router tests
// =============================================================================

#[tokio::test]
async fn test_health_needs_no_token() {
    let (gateway, _) = mock_gateway().await;
    let app = create_router(AppState::new(gateway.router().clone()), gate());

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let (gateway, _) = mock_gateway().await;
    let app = create_router(AppState::new(gateway.router().clone()), gate());

    let response = app
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_string(response).await, "Unauthorized");
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (gateway, _) = mock_gateway().await;
    let app = create_router(AppState::new(gateway.router().clone()), gate());

    let response = app
        .oneshot(
            Request::post("/message?sessionId=abc")
                .header(header::AUTHORIZATION, "Bearer not-the-token")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unconfigured_gate_rejects_everything() {
    let (gateway, _) = mock_gateway().await;
    let app = create_router(AppState::new(gateway.router().clone()), AuthGate::new(None));

    let response = app
        .oneshot(
            Request::get("/sse")
                .header(header::AUTHORIZATION, "Bearer ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (gateway, _) = mock_gateway().await;
    let app = create_router(AppState::new(gateway.router().clone()), gate());

    let response = app
        .oneshot(
            Request::post("/message?sessionId=does-not-exist")
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// End-to-end over a real socket
// =============================================================================

struct Served {
    url: String,
    stop: tokio::sync::oneshot::Sender<()>,
    task: tokio::task::JoinHandle<std::io::Result<()>>,
    state: AppState,
}

async fn serve(gateway: &Gateway) -> Served {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(gateway.router().clone());
    let (stop, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let task = tokio::spawn(serve_sse(listener, state.clone(), gate(), async move {
        let _ = stop_rx.await;
    }));

    Served {
        url: format!("http://{}/sse", addr),
        stop,
        task,
        state,
    }
}

#[tokio::test]
async fn test_stream_client_lists_and_invokes_through_front() {
    let (gateway, files) = mock_gateway().await;
    let served = serve(&gateway).await;

    let connector = DefaultConnector::new().with_init_timeout(Duration::from_secs(10));
    let client = connector
        .prepare(&stream_descriptor(served.url.clone(), TOKEN))
        .unwrap()
        .connect()
        .await
        .unwrap();
    assert_eq!(served.state.sessions.len(), 1);

    let tools = client.list(CapabilityKind::Tool).await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["read_file", "write_file"]);

    let result = client
        .invoke(
            CapabilityKind::Tool,
            "read_file",
            serde_json::json!({"path": "/tmp/a"}),
        )
        .await
        .unwrap();
    assert_eq!(result["backend"], "files");
    assert_eq!(files.calls().len(), 1);
    assert_eq!(files.calls()[0].args["path"], "/tmp/a");

    let err = client
        .invoke(CapabilityKind::Tool, "delete_everything", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BackendReported { code: -32602, .. }));

    client.close().await.unwrap();
    served.stop.send(()).unwrap();
    served.task.await.unwrap().unwrap();
    assert!(served.state.sessions.is_empty());
}

#[tokio::test]
async fn test_concurrent_streams_are_isolated() {
    let (gateway, files) = mock_gateway().await;
    let served = serve(&gateway).await;
    let connector = DefaultConnector::new().with_init_timeout(Duration::from_secs(10));

    let first = connector
        .prepare(&stream_descriptor(served.url.clone(), TOKEN))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let second = connector
        .prepare(&stream_descriptor(served.url.clone(), TOKEN))
        .unwrap()
        .connect()
        .await
        .unwrap();
    assert_eq!(served.state.sessions.len(), 2);

    // closing one caller leaves the other serving
    first.close().await.unwrap();
    let result = second
        .invoke(CapabilityKind::Tool, "write_file", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result["name"], "write_file");
    assert_eq!(files.calls().len(), 1);

    second.close().await.unwrap();
    served.stop.send(()).unwrap();
    served.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_wrong_token_fails_connect() {
    let (gateway, _) = mock_gateway().await;
    let served = serve(&gateway).await;

    let err = DefaultConnector::new()
        .with_init_timeout(Duration::from_secs(10))
        .prepare(&stream_descriptor(served.url.clone(), "wrong"))
        .unwrap()
        .connect()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GatewayError::Connection { .. }));
    assert!(served.state.sessions.is_empty());

    served.stop.send(()).unwrap();
    served.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_listener_serves_health_and_rejects_bare_stream() {
    let (gateway, _) = mock_gateway().await;
    let served = serve(&gateway).await;
    let base = served.url.trim_end_matches("/sse").to_string();
    let http = reqwest::Client::new();

    let health = http.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK");

    let sse = http.get(&served.url).send().await.unwrap();
    assert_eq!(sse.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(sse.text().await.unwrap(), "Unauthorized");

    served.stop.send(()).unwrap();
    served.task.await.unwrap().unwrap();
}
