//! HTTP API driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use thermolink::discovery::{DiscoveryRelay, IdleScanner};
use thermolink::gate::{AccessGate, AlwaysGranted};
use thermolink::protocol::EscPosEncoder;
use thermolink::server::{self, AppState};
use thermolink::transport::{MockTransport, event_channel};
use thermolink::{ConnectionRegistry, EventHub, SessionId, TransportEventRouter};
use tokio_stream::StreamExt;
use tower::ServiceExt;

const PRINTER: &str = "66:22:B3:4C:1D:0E";

struct Denied;

#[async_trait]
impl AccessGate for Denied {
    async fn is_granted(&self) -> bool {
        false
    }

    async fn request(&self) -> bool {
        false
    }
}

fn app_with_gate(gate: Arc<dyn AccessGate>) -> (Router, Arc<MockTransport>) {
    let (tx, rx) = event_channel();
    let mock = Arc::new(MockTransport::new(tx).with_auto_connect());
    mock.set_device_name(PRINTER, "P58");
    let events = EventHub::new();
    let registry = Arc::new(ConnectionRegistry::new(
        mock.clone(),
        Arc::new(EscPosEncoder),
        events.clone(),
    ));
    TransportEventRouter::new(registry.clone(), rx).spawn();

    let discovery = Arc::new(DiscoveryRelay::new(Arc::new(IdleScanner), events));
    let state = Arc::new(AppState::new(registry, discovery, gate));
    (server::router(state), mock)
}

fn app() -> (Router, Arc<MockTransport>) {
    app_with_gate(Arc::new(AlwaysGranted))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn connect(app: &Router) -> String {
    let (status, body) = call(app, "POST", "/api/connections", Some(json!({ "address": PRINTER }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], PRINTER);
    assert_eq!(body["name"], "P58");
    body["connectionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_print_job_over_http() {
    let (app, mock) = app();
    let id = connect(&app).await;

    let (status, body) = call(&app, "GET", "/api/connections", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(&app, "GET", &format!("/api/connections/{}/status", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);

    let (status, _) = call(&app, "POST", &format!("/api/connections/{}/begin", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let ops = json!([
        { "op": "align", "alignment": "center" },
        { "op": "bold" },
        { "op": "double_height", "enabled": "default" },
        { "op": "text", "text": "Hello\n" },
        { "op": "barcode", "type": "CODE128", "data": "12345" },
        { "op": "qr", "data": "https://example.com" },
        { "op": "raw", "data": "G0A=" },
        { "op": "feed_cut_paper" }
    ]);
    let (status, body) = call(&app, "POST", &format!("/api/connections/{}/ops", id), Some(ops)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);

    let (status, _) = call(&app, "POST", &format!("/api/connections/{}/write", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let handle = mock.handle_for(PRINTER).unwrap();
    let writes = mock.writes(handle);
    assert_eq!(writes.len(), 1);
    assert_eq!(&writes[0][..2], &[0x1B, 0x40]);
}

#[tokio::test]
async fn test_bad_operation_is_400() {
    let (app, _) = app();
    let id = connect(&app).await;

    let ops = json!([{ "op": "align", "alignment": "middle" }]);
    let (status, body) = call(&app, "POST", &format!("/api/connections/{}/ops", id), Some(ops)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("alignment"));
}

#[tokio::test]
async fn test_unknown_connection() {
    let (app, _) = app();
    let missing = SessionId::new();

    let (status, body) = call(&app, "POST", &format!("/api/connections/{}/write", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, "POST", "/api/connections/not-an-id/begin", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, "GET", "/api/connections/not-an-id/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], false);
}

#[tokio::test]
async fn test_disconnect_over_http() {
    let (app, mock) = app();
    let id = connect(&app).await;

    let (status, _) = call(&app, "DELETE", &format!("/api/connections/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let handle = mock.handle_for(PRINTER).unwrap();
    for _ in 0..100 {
        if mock.is_released(handle) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(mock.is_released(handle));

    let (status, _) = call(&app, "DELETE", &format!("/api/connections/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_denied_gate() {
    let (app, _) = app_with_gate(Arc::new(Denied));

    let (status, body) = call(&app, "POST", "/api/connections", Some(json!({ "address": PRINTER }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, "POST", "/api/scan/start", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_scan_endpoints() {
    let (app, _) = app();

    let (status, body) = call(&app, "POST", "/api/scan/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = call(&app, "POST", "/api/scan/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["stopped"].is_boolean());
}

#[tokio::test]
async fn test_sole_session_routes() {
    let (app, mock) = app();

    let (status, _) = call(&app, "POST", "/api/connection/begin", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    connect(&app).await;
    let (status, body) = call(&app, "GET", "/api/connection/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);

    let (status, _) = call(&app, "POST", "/api/connection/begin", None).await;
    assert_eq!(status, StatusCode::OK);
    let ops = json!([{ "op": "text", "text": "only one\n" }]);
    let (status, _) = call(&app, "POST", "/api/connection/ops", Some(ops)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/api/connection/write", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mock.writes(mock.handle_for(PRINTER).unwrap()).len(), 1);

    let other = "66:22:B3:4C:1D:0F";
    let (status, _) = call(&app, "POST", "/api/connections", Some(json!({ "address": other }))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "POST", "/api/connection/write", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_event_stream_reports_connect() {
    let (app, _) = app();

    let request = Request::builder()
        .method("GET")
        .uri("/api/events")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));
    let mut body = response.into_body().into_data_stream();

    let id = connect(&app).await;

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        let mut text = String::new();
        while let Some(chunk) = body.next().await {
            text.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if text.contains("\n\n") {
                break;
            }
        }
        text
    })
    .await
    .unwrap();

    assert!(frame.contains("event: connected"), "{}", frame);
    let data = frame
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let event: Value = serde_json::from_str(data).unwrap();
    assert_eq!(event["event"], "connected");
    assert_eq!(event["connectionId"], id.as_str());
    assert_eq!(event["address"], PRINTER);
}
