/// Integration tests for request capture through the axum middleware
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{Html, Redirect},
    routing::{get, post},
    Extension, Json, Router,
};
use request_inspector::{
    capture::{RequestProbe, TOKEN_HEADER},
    collector::RouteInfo,
    config::Config,
    server,
    snapshot::{ResponsePayload, StoredSnapshot},
    store::{FixedBasePath, SnapshotStore, StoreKind},
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.base_path = Some(dir.path().to_path_buf());
    config.storage.unique_tokens = true;
    config
}

fn store_for(dir: &TempDir) -> SnapshotStore {
    SnapshotStore::open(&FixedBasePath(dir.path().to_path_buf()), StoreKind::Inspector).unwrap()
}

fn sample_app() -> Router {
    Router::new()
        .route("/users/:id", get(|| async { Json(json!({"id": 42, "name": "ada"})) }))
        .route("/old", get(|| async { Redirect::to("/login") }))
        .route("/page", get(|| async { Html("<h1>Hello</h1>") }))
        .route("/health", get(|| async { "ok" }))
        .route("/upload", post(|| async { "stored" }))
        .route(
            "/export",
            get(|| async { Json(json!({"blob": "x".repeat(4096)})) }),
        )
        .route(
            "/report",
            get(|| async { Json(Value::Array(vec![json!("x".repeat(100)); 20])) }),
        )
        .route(
            "/orders",
            get(|probe: Extension<RequestProbe>| async move {
                probe.set_route(RouteInfo {
                    action: "OrderController@index".to_string(),
                    middleware: vec!["auth".to_string()],
                });
                probe.start("db.query", "db");
                probe.event("orders.loaded", json!({"count": 3}));
                probe.stop("db.query").unwrap();
                Json(json!([]))
            }),
        )
}

async fn captured(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let token = response
        .headers()
        .get(TOKEN_HEADER)
        .map(|value| value.to_str().unwrap().to_string());
    (response.status(), token)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn resolve(dir: &TempDir, token: &str) -> StoredSnapshot {
    store_for(dir).resolve(token).unwrap()
}

#[tokio::test]
async fn test_json_response_is_captured() {
    let dir = TempDir::new().unwrap();
    let app = server::attach(sample_app(), &test_config(&dir)).unwrap();

    let (status, token) = captured(&app, get_request("/users/42?expand=roles")).await;
    assert_eq!(status, StatusCode::OK);
    let token = token.expect("token header should be set");

    let stored = resolve(&dir, &token);
    assert_eq!(stored.timestamp, token);

    let request = stored.snapshot.request.unwrap();
    assert_eq!(request.method, "GET");
    assert_eq!(request.uri, "/users/42?expand=roles");
    assert_eq!(request.query["expand"], "roles");
    assert_eq!(request.controller_action.as_deref(), Some("GET /users/:id"));
    assert_eq!(request.attributes["matched_path"], json!("/users/:id"));

    let response = stored.snapshot.response.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(
        response.payload,
        ResponsePayload::Json(json!({"id": 42, "name": "ada"}))
    );

    let timeline = &stored.snapshot.timeline.timeline;
    assert_eq!(timeline["route.matched"].category, "routing");
    assert!(timeline.contains_key("request.handled"));
}

#[tokio::test]
async fn test_handler_events_and_route_override() {
    let dir = TempDir::new().unwrap();
    let app = server::attach(sample_app(), &test_config(&dir)).unwrap();

    let (_, token) = captured(&app, get_request("/orders")).await;
    let stored = resolve(&dir, &token.unwrap());

    let request = stored.snapshot.request.unwrap();
    assert_eq!(request.controller_action.as_deref(), Some("OrderController@index"));
    assert_eq!(request.middleware, Some(vec!["auth".to_string()]));

    let events = &stored.snapshot.events;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "orders.loaded");
    assert_eq!(events[0].payload, json!({"count": 3}));
    assert!(!events[0].core);

    let timeline = &stored.snapshot.timeline.timeline;
    assert_eq!(timeline["db.query"].category, "db");
    assert_eq!(timeline["orders.loaded"].category, "events");
}

#[tokio::test]
async fn test_demo_echo_records_body() {
    let dir = TempDir::new().unwrap();
    let app = server::attach(server::demo_routes(), &test_config(&dir)).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"message":"hi"}"#))
        .unwrap();
    let (status, token) = captured(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let stored = resolve(&dir, &token.unwrap());
    let request = stored.snapshot.request.unwrap();
    assert_eq!(request.request, json!({"message": "hi"}));
    assert_eq!(request.payload, json!({"message": "hi"}));

    assert_eq!(stored.snapshot.events[0].name, "echo.received");
    assert_eq!(
        stored.snapshot.response.unwrap().payload,
        ResponsePayload::Json(json!({"echo": {"message": "hi"}}))
    );
}

#[tokio::test]
async fn test_response_classification() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.capture.size_limit_kb = 1;
    let app = server::attach(sample_app(), &config).unwrap();

    let (status, token) = captured(&app, get_request("/old")).await;
    assert!(status.is_redirection());
    let response = resolve(&dir, &token.unwrap()).snapshot.response.unwrap();
    assert_eq!(response.payload, ResponsePayload::Redirected("/login".to_string()));

    let (_, token) = captured(&app, get_request("/page")).await;
    let response = resolve(&dir, &token.unwrap()).snapshot.response.unwrap();
    assert_eq!(response.payload, ResponsePayload::Html);

    let (_, token) = captured(&app, get_request("/report")).await;
    let response = resolve(&dir, &token.unwrap()).snapshot.response.unwrap();
    assert_eq!(response.payload, ResponsePayload::Purged);
}

#[tokio::test]
async fn test_excluded_routes_are_not_persisted() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.capture.routes_to_exclude = vec!["/health".to_string()];
    let app = server::attach(sample_app(), &config).unwrap();

    let (status, token) = captured(&app, get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(token.is_none());

    let (status, token) = captured(&app, get_request("/_inspector/api")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(token.is_none());

    assert!(store_for(&dir).list_tokens().unwrap().is_empty());
}

#[tokio::test]
async fn test_capture_disabled() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.capture.enabled = false;
    let app = server::attach(sample_app(), &config).unwrap();

    let (status, token) = captured(&app, get_request("/users/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(token.is_none());
    assert!(store_for(&dir).list_tokens().unwrap().is_empty());
}

#[tokio::test]
async fn test_json_larger_than_buffer_cap_is_purged() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.capture.max_body_bytes = 1024;
    let app = server::attach(sample_app(), &config).unwrap();

    let response = app.clone().oneshot(get_request("/export")).await.unwrap();
    let token = response
        .headers()
        .get(TOKEN_HEADER)
        .map(|value| value.to_str().unwrap().to_string())
        .unwrap();

    // The client still receives the full body
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.len() > 4096);

    let response = resolve(&dir, &token).snapshot.response.unwrap();
    assert_eq!(response.payload, ResponsePayload::Purged);
}

#[tokio::test]
async fn test_multipart_upload_is_described() {
    let dir = TempDir::new().unwrap();
    let app = server::attach(sample_app(), &test_config(&dir)).unwrap();

    let body = format!(
        "--FORMBOUNDARY\r\n\
         Content-Disposition: form-data; name=\"title\"\r\n\r\n\
         Portrait\r\n\
         --FORMBOUNDARY\r\n\
         Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n\
         Content-Type: image/png\r\n\r\n\
         {}\r\n\
         --FORMBOUNDARY--\r\n",
        "p".repeat(1500)
    );
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", "multipart/form-data; boundary=FORMBOUNDARY")
        .body(Body::from(body))
        .unwrap();

    let (status, token) = captured(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let request = resolve(&dir, &token.unwrap()).snapshot.request.unwrap();
    assert_eq!(request.request, json!({"title": "Portrait"}));
    assert_eq!(
        request.payload,
        json!({
            "title": "Portrait",
            "avatar": {"name": "me.png", "size": "1.5KB"}
        })
    );
}
