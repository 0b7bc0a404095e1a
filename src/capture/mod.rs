//! Request capture middleware
//!
//! Wires the collector into axum: every request gets its own `Collector` and
//! `Stopwatch`, handlers reach them through the `RequestProbe` extension, and
//! the finished snapshot is written to the store before the response leaves.

pub mod describe;

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{HeaderValue, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::collector::{Collector, RouteInfo};
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::stopwatch::Stopwatch;
use crate::store::SnapshotStore;

pub use describe::{describe_request, describe_response, multipart_input, BodyCapture};

/// Response header carrying the token of the stored snapshot
pub const TOKEN_HEADER: &str = "x-inspector-token";

/// Shared state for the capture middleware
#[derive(Clone)]
pub struct CaptureState {
    pub config: Arc<CaptureConfig>,
    pub store: Arc<SnapshotStore>,
}

impl CaptureState {
    pub fn new(config: CaptureConfig, store: SnapshotStore) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
        }
    }
}

/// Attach the capture middleware to every route of `app`
pub fn instrument(app: Router, state: CaptureState) -> Router {
    app.layer(middleware::from_fn_with_state(state, capture_middleware))
}

/// Per-request decisions, carried from request start to teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureContext {
    /// Request must not be persisted (inspector traffic, excluded routes)
    pub excluded: bool,
}

impl CaptureContext {
    /// Decide from the request target; an absolute-form URI is reduced to its
    /// path and query first
    pub fn for_request(uri: &Uri, config: &CaptureConfig) -> Self {
        let request_uri = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        Self::for_uri(request_uri, config)
    }

    pub fn for_uri(uri: &str, config: &CaptureConfig) -> Self {
        let excluded = uri.starts_with(&config.route_prefix)
            || config
                .routes_to_exclude
                .iter()
                .any(|fragment| uri.contains(fragment.as_str()));
        Self { excluded }
    }
}

struct ProbeState {
    collector: Collector,
    stopwatch: Stopwatch,
    route: Option<RouteInfo>,
}

/// Handle to the current request's collector and stopwatch.
///
/// Inserted as a request extension by the capture middleware; handlers take
/// it with `Extension<RequestProbe>`.
#[derive(Clone)]
pub struct RequestProbe {
    inner: Arc<Mutex<ProbeState>>,
}

impl RequestProbe {
    pub fn new(collector: Collector, stopwatch: Stopwatch) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProbeState {
                collector,
                stopwatch,
                route: None,
            })),
        }
    }

    /// Record a named event and mark it on the timeline
    pub fn event(&self, name: &str, payload: Value) {
        let mut state = self.lock();
        // A fresh start/stop pair cannot fail
        let _ = state.stopwatch.mark(name, Some("events"));
        state.collector.record_event(name, payload);
    }

    /// Record an event named after its type
    pub fn typed_event<E: Serialize>(&self, event: &E) -> Result<()> {
        let name = std::any::type_name::<E>();
        let mut state = self.lock();
        let _ = state.stopwatch.mark(name, Some("events"));
        state.collector.record_typed_event(event)
    }

    pub fn start(&self, name: &str, category: &str) {
        self.lock().stopwatch.start(name, Some(category));
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.lock().stopwatch.stop(name).map(|_| ())
    }

    pub fn lap(&self, name: &str) -> Result<()> {
        self.lock().stopwatch.lap(name).map(|_| ())
    }

    pub fn open_section(&self, id: Option<&str>) {
        self.lock().stopwatch.open_section(id);
    }

    pub fn stop_section(&self, id: &str) -> Result<()> {
        self.lock().stopwatch.stop_section(id)
    }

    /// Override the route metadata derived from the matched path
    pub fn set_route(&self, route: RouteInfo) {
        self.lock().route = Some(route);
    }

    /// Snapshot of everything recorded so far
    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        state.collector.finalize(&state.stopwatch)
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Capture middleware
///
/// Records the request when routing is done and again once the handler
/// returned (the second capture replaces the first), then the response, and
/// persists the snapshot unless the request is excluded.
pub async fn capture_middleware(
    State(state): State<CaptureState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.enabled {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let context = CaptureContext::for_request(&parts.uri, &state.config);

    let (request_body, body) = match buffer_body(body, state.config.max_body_bytes).await {
        Ok(buffered) => buffered,
        Err(e) => {
            tracing::warn!(error = %e, uri = %parts.uri, "Failed to read request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let probe = RequestProbe::new(
        Collector::with_size_limit(state.config.size_limit_kb),
        Stopwatch::new(),
    );

    let mut descriptor = describe_request(&parts, request_body.bytes());
    if let Some(bytes) = request_body.bytes() {
        if let Some((fields, files)) = multipart_input(&parts.headers, bytes.clone()).await {
            descriptor.body = fields;
            descriptor.files = files;
        }
    }
    {
        let mut probe_state = probe.lock();
        probe_state.collector.record_request(&descriptor);
        let _ = probe_state.stopwatch.mark("route.matched", Some("routing"));
    }

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(probe.clone());

    let response = next.run(req).await;

    let (mut parts, body) = response.into_parts();
    let (response_body, body) = match buffer_body(body, state.config.max_body_bytes).await {
        Ok(buffered) => buffered,
        Err(e) => {
            tracing::error!(error = %e, uri = %descriptor.path, "Failed to read response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    {
        let mut probe_state = probe.lock();
        if let Some(route) = probe_state.route.clone() {
            descriptor.route = Some(route);
        }
        probe_state.collector.record_request(&descriptor);
        probe_state
            .collector
            .record_response(&describe_response(&parts, &response_body));
        let _ = probe_state.stopwatch.mark("request.handled", Some("routing"));
    }

    if context.excluded {
        tracing::trace!(uri = %descriptor.path, "Request excluded from capture");
        return Response::from_parts(parts, body);
    }

    let snapshot = probe.snapshot();
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || store.persist(&snapshot)).await {
        Ok(Ok(token)) => {
            tracing::debug!(token = %token, uri = %descriptor.path, "Request captured");
            if let Ok(value) = HeaderValue::from_str(token.as_str()) {
                parts.headers.insert(TOKEN_HEADER, value);
            }
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, uri = %descriptor.path, "Failed to persist snapshot");
        }
        Err(e) => {
            tracing::error!(error = %e, "Snapshot writer task panicked");
        }
    }

    Response::from_parts(parts, body)
}

/// Buffer a body whose size is known to fit under `limit`.
///
/// A body declaring more than `limit` bytes is left unread and reported as
/// too large; one of unknown size passes through untouched.
async fn buffer_body(
    body: Body,
    limit: usize,
) -> std::result::Result<(BodyCapture, Body), axum::Error> {
    let hint = body.size_hint();
    if hint.lower() > limit as u64 {
        return Ok((BodyCapture::TooLarge, body));
    }

    match hint.upper() {
        Some(upper) if upper <= limit as u64 => {
            let bytes = axum::body::to_bytes(body, limit).await?;
            Ok((BodyCapture::Buffered(bytes.clone()), Body::from(bytes)))
        }
        _ => Ok((BodyCapture::Streaming, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_excludes_inspector_routes() {
        let config = CaptureConfig::default();
        assert!(CaptureContext::for_uri("/_inspector", &config).excluded);
        assert!(CaptureContext::for_uri("/_inspector/api/latest", &config).excluded);
        assert!(!CaptureContext::for_uri("/users", &config).excluded);
    }

    #[test]
    fn test_context_uses_path_of_absolute_form_uri() {
        let config = CaptureConfig::default();
        let absolute: Uri = "http://example.test/_inspector/api?last=5".parse().unwrap();
        assert!(CaptureContext::for_request(&absolute, &config).excluded);

        let origin: Uri = "/_inspector/api/latest".parse().unwrap();
        assert!(CaptureContext::for_request(&origin, &config).excluded);

        let app: Uri = "https://example.test/users?next=/_inspector".parse().unwrap();
        assert!(!CaptureContext::for_request(&app, &config).excluded);
    }

    #[test]
    fn test_context_excludes_configured_fragments() {
        let config = CaptureConfig {
            routes_to_exclude: vec!["health".to_string()],
            ..Default::default()
        };
        assert!(CaptureContext::for_uri("/internal/health?deep=1", &config).excluded);
        assert!(!CaptureContext::for_uri("/orders", &config).excluded);
    }

    #[test]
    fn test_probe_records_events_on_timeline() {
        let probe = RequestProbe::new(Collector::new(), Stopwatch::new());
        probe.event("cache.miss", json!(["users:1"]));
        probe.event("cache.miss", json!(["users:2"]));

        let snapshot = probe.snapshot();
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events[1].payload, json!(["users:2"]));

        let entry = &snapshot.timeline.timeline["cache.miss"];
        assert_eq!(entry.category, "events");
        assert_eq!(entry.periods.len(), 2);
    }

    #[test]
    fn test_probe_timers() {
        let probe = RequestProbe::new(Collector::new(), Stopwatch::new());
        probe.start("db.query", "db");
        probe.lap("db.query").unwrap();
        probe.stop("db.query").unwrap();
        assert!(probe.stop("db.query").is_err());

        probe.open_section(None);
        probe.start("render", "view");
        probe.stop("render").unwrap();
        probe.stop_section("view").unwrap();

        let timeline = probe.snapshot().timeline;
        assert_eq!(timeline.timeline["db.query"].periods.len(), 2);
        assert_eq!(timeline.timeline["render"].section, "view");
    }

    #[tokio::test]
    async fn test_buffer_body_respects_limit() {
        let (capture, body) = buffer_body(Body::from("hello"), 16).await.unwrap();
        assert_eq!(capture, BodyCapture::Buffered(axum::body::Bytes::from_static(b"hello")));
        assert_eq!(axum::body::to_bytes(body, 16).await.unwrap(), "hello");

        let (capture, body) = buffer_body(Body::from("too long for the limit"), 4).await.unwrap();
        assert_eq!(capture, BodyCapture::TooLarge);
        assert_eq!(
            axum::body::to_bytes(body, 64).await.unwrap(),
            "too long for the limit"
        );
    }
}
