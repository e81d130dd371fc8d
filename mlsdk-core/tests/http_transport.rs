//! Integration tests for the HTTP transport against a loopback server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use mlsdk_core::delivery::{HttpTransport, Method, Request, Transport, EVENTS_PATH};
use mlsdk_core::logging::LogHandle;
use mlsdk_core::{Client, ClientConfig, SessionConfig, TrackEvent};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Requests seen by the test server
#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

impl Captured {
    fn bodies(&self) -> Vec<Value> {
        self.requests.lock().iter().map(|(_, b)| b.clone()).collect()
    }

    fn header(&self, index: usize, name: &str) -> Option<String> {
        self.requests.lock()[index]
            .0
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

async fn accept(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    captured.requests.lock().push((headers, body));
    Json(json!({"errored": false, "status": 200, "message": "Event accepted"}))
}

async fn plain_text(State(captured): State<Captured>, Json(body): Json<Value>) -> &'static str {
    captured.requests.lock().push((HeaderMap::new(), body));
    "ok"
}

async fn reject(
    State(captured): State<Captured>,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    captured.requests.lock().push((HeaderMap::new(), body));
    (
        StatusCode::FORBIDDEN,
        "Unauthorized: No organization found for given apikey",
    )
}

async fn server_error(
    State(captured): State<Captured>,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    captured.requests.lock().push((HeaderMap::new(), body));
    (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable")
}

/// Accept connections and close them without answering
///
/// Returns the base URL and the number of connections accepted so far.
async fn hang_up_server() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (format!("http://{}", addr), accepted)
}

/// Serve `router` on an ephemeral port, returning its base URL
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn server_with(
    handler: axum::routing::MethodRouter<Captured>,
) -> (String, Captured) {
    let captured = Captured::default();
    let router = Router::new()
        .route(EVENTS_PATH, handler)
        .with_state(captured.clone());
    (serve(router).await, captured)
}

fn config_for(base_url: &str) -> ClientConfig {
    mlsdk_core::logging::init_test();
    let mut config = ClientConfig::new("test_api_key");
    config.project_id = Some("test_project".to_string());
    config.server_endpoint = Some(base_url.to_string());
    config.max_retry_secs = 1;
    config.initial_backoff_ms = 20;
    config.max_backoff_ms = 100;
    config
}

async fn post_once(transport: &HttpTransport, body: &Value) -> mlsdk_core::DeliveryOutcome {
    transport
        .send(Request {
            method: &Method::POST,
            path: EVENTS_PATH,
            app_id: "test_project",
            body,
        })
        .await
}

// ============================================
// Single requests
// ============================================

#[tokio::test]
async fn test_success_body_passed_through() {
    let (base_url, captured) = server_with(post(accept)).await;
    let transport = HttpTransport::new(&config_for(&base_url), LogHandle::quiet()).unwrap();

    let outcome = post_once(&transport, &json!({"type": "track", "event": "e"})).await;

    assert!(!outcome.errored);
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.message, "Event accepted");
    assert_eq!(captured.bodies(), vec![json!({"type": "track", "event": "e"})]);
}

#[tokio::test]
async fn test_auth_and_project_headers_sent() {
    let (base_url, captured) = server_with(post(accept)).await;
    let transport = HttpTransport::new(&config_for(&base_url), LogHandle::quiet()).unwrap();

    post_once(&transport, &json!({})).await;

    assert_eq!(
        captured.header(0, "authorization").as_deref(),
        Some("Bearer test_api_key")
    );
    assert_eq!(
        captured.header(0, "x-app-id").as_deref(),
        Some("test_project")
    );
    assert_eq!(
        captured.header(0, "content-type").as_deref(),
        Some("application/json")
    );
}

#[tokio::test]
async fn test_non_json_success_body_kept_as_message() {
    let (base_url, _) = server_with(post(plain_text)).await;
    let transport = HttpTransport::new(&config_for(&base_url), LogHandle::quiet()).unwrap();

    let outcome = post_once(&transport, &json!({})).await;

    assert!(!outcome.errored);
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.message, "ok");
}

#[tokio::test]
async fn test_http_error_formatted_and_not_retried() {
    let (base_url, captured) = server_with(post(reject)).await;
    let transport = HttpTransport::new(&config_for(&base_url), LogHandle::quiet()).unwrap();

    let outcome = post_once(&transport, &json!({"foo": "bar"})).await;

    assert!(outcome.errored);
    assert_eq!(outcome.status, 403);
    assert_eq!(
        outcome.message,
        "Error: 403 - Unauthorized: No organization found for given apikey"
    );
    assert_eq!(captured.bodies().len(), 1);
}

#[tokio::test]
async fn test_unreachable_server_exhausts_retries() {
    // bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = config_for(&format!("http://{}", addr));
    let transport = HttpTransport::new(&config, LogHandle::quiet()).unwrap();

    let started = Instant::now();
    let outcome = post_once(&transport, &json!({})).await;
    let elapsed = started.elapsed();

    assert!(outcome.errored);
    assert_eq!(outcome.status, 0);
    assert!(outcome.message.starts_with("Error: request failed"));
    // backoff keeps retrying until the 1s budget is nearly spent
    assert!(elapsed >= Duration::from_millis(500), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_dropped_connections_are_retried() {
    let (base_url, accepted) = hang_up_server().await;
    let transport = HttpTransport::new(&config_for(&base_url), LogHandle::quiet()).unwrap();

    let outcome = post_once(&transport, &json!({})).await;

    assert!(outcome.errored);
    assert_eq!(outcome.status, 0);
    let attempts = accepted.load(Ordering::SeqCst);
    assert!(attempts >= 3, "expected several attempts, got {}", attempts);
}

#[tokio::test]
async fn test_server_error_makes_single_attempt() {
    let (base_url, captured) = server_with(post(server_error)).await;
    let transport = HttpTransport::new(&config_for(&base_url), LogHandle::quiet()).unwrap();

    let started = Instant::now();
    let outcome = post_once(&transport, &json!({"type": "track"})).await;

    assert!(outcome.errored);
    assert_eq!(outcome.status, 500);
    assert_eq!(outcome.message, "Error: 500 - database unavailable");
    assert_eq!(captured.bodies().len(), 1);
    assert!(started.elapsed() < Duration::from_millis(500));
}

// ============================================
// Full client
// ============================================

#[tokio::test]
async fn test_client_session_end_to_end() {
    let (base_url, captured) = server_with(post(accept)).await;
    let client = Client::new(config_for(&base_url)).unwrap();
    let mut session = client
        .create_session(SessionConfig::new("test_project").with_user_id("u-1"))
        .unwrap();

    session
        .track_event(TrackEvent::new("e").with_property("k", "v"))
        .unwrap();
    session.end_session(None).await.unwrap();

    let bodies = captured.bodies();
    let types: Vec<&str> = bodies.iter().map(|b| b["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["start_session", "track", "end_session"]);
    assert_eq!(bodies[0]["attributes"]["user_id"], "u-1");
    assert_eq!(bodies[1]["event"], "e");
    assert_eq!(bodies[1]["properties"], json!({"k": "v"}));

    let session_id = session.session_id().unwrap();
    assert!(bodies.iter().all(|b| b["session_id"] == session_id));
    assert!(!session.has_errors());
    assert_eq!(session.history().len(), 3);
}

#[tokio::test]
async fn test_client_with_rejected_key_records_errors() {
    let (base_url, _) = server_with(post(reject)).await;
    let client = Client::new(config_for(&base_url)).unwrap();
    let mut session = client.create_session(SessionConfig::default()).unwrap();

    session
        .scoped(|s| {
            Box::pin(async move {
                s.enqueue_raw(json!({"foo": "bar"}))?;
                Ok::<_, mlsdk_core::Error>(())
            })
        })
        .await
        .unwrap();

    assert!(session.has_errors());
    let errors = session.errors();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| e.status == 403));
    assert_eq!(
        errors[1].message,
        "Error: 403 - Unauthorized: No organization found for given apikey"
    );
}
