//! Per-request snapshot collector
//!
//! A `Collector` lives for exactly one request. The capture middleware feeds it
//! the normalized request and response, handlers feed it events, and at the end
//! `finalize` merges everything with the request's stopwatch timeline.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use std::time::Instant;

use crate::error::Result;
use crate::snapshot::{
    EventRecord, HeaderBag, RequestSnapshot, ResponsePayload, ResponseSnapshot, Snapshot,
    StringMap,
};
use crate::stopwatch::Stopwatch;
use crate::timeline::build_timeline;

/// Default response size limit in KB
pub const DEFAULT_SIZE_LIMIT_KB: u64 = 64;

/// Event name prefixes flagged as framework-internal
const CORE_EVENT_PREFIXES: [&str; 6] = [
    "Illuminate\\",
    "eloquent",
    "bootstrapped",
    "bootstrapping",
    "creating",
    "composing",
];

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Record the moment the application started; request and response durations
/// are measured from here. Later calls keep the first marker.
pub fn mark_process_start() {
    PROCESS_START.get_or_init(Instant::now);
}

/// Whole milliseconds since `mark_process_start`, if it was called
fn duration_from_start() -> Option<f64> {
    PROCESS_START
        .get()
        .map(|start| (start.elapsed().as_secs_f64() * 1000.0).floor())
}

/// Whether an event name belongs to the framework itself
pub fn is_core_event(name: &str) -> bool {
    CORE_EVENT_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Route resolution data, present once a route matched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteInfo {
    /// Handler identifier (e.g. "GET /users/:id")
    pub action: String,
    pub middleware: Vec<String>,
}

/// A file received with the request
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub client_name: String,
    pub size: u64,
    /// False for uploads that did not produce a regular file
    pub is_file: bool,
}

impl UploadedFile {
    fn descriptor(&self) -> Value {
        let size = if self.is_file {
            format!("{}KB", self.size as f64 / 1000.0)
        } else {
            "0".to_string()
        };
        json!({ "name": self.client_name, "size": size })
    }
}

/// Uploaded files, possibly nested under form field groups
#[derive(Debug, Clone, PartialEq)]
pub enum UploadedFiles {
    File(UploadedFile),
    Group(IndexMap<String, UploadedFiles>),
}

impl UploadedFiles {
    fn descriptors(&self) -> Value {
        match self {
            Self::File(file) => file.descriptor(),
            Self::Group(group) => Value::Object(
                group
                    .iter()
                    .map(|(key, files)| (key.clone(), files.descriptors()))
                    .collect(),
            ),
        }
    }
}

/// Normalized description of an inbound request
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    pub query_string: Option<String>,
    pub client_ip: Option<String>,
    pub headers: HeaderBag,
    pub cookies: StringMap,
    pub query: StringMap,
    /// Decoded body fields
    pub body: Value,
    pub files: IndexMap<String, UploadedFiles>,
    pub server: StringMap,
    pub attributes: IndexMap<String, Value>,
    pub route: Option<RouteInfo>,
}

impl RequestDescriptor {
    /// Path plus `?query` when a non-empty query string is present
    pub fn uri(&self) -> String {
        match self.query_string.as_deref() {
            Some(qs) if !qs.is_empty() => format!("{}?{}", self.path, qs),
            _ => self.path.clone(),
        }
    }

    /// Body fields with uploaded-file descriptors merged on top
    pub fn input(&self) -> Value {
        if self.files.is_empty() {
            return self.body.clone();
        }

        let mut input = match &self.body {
            Value::Object(_) => self.body.clone(),
            _ => Value::Object(Map::new()),
        };
        for (key, files) in &self.files {
            replace_recursive(&mut input, key, files.descriptors());
        }
        input
    }
}

/// Replace `key` in `base`, descending when both sides are objects
fn replace_recursive(base: &mut Value, key: &str, replacement: Value) {
    let Value::Object(map) = base else {
        return;
    };

    match replacement {
        Value::Object(fields) if matches!(map.get(key), Some(Value::Object(_))) => {
            if let Some(existing) = map.get_mut(key) {
                for (child, value) in fields {
                    replace_recursive(existing, &child, value);
                }
            }
        }
        replacement => {
            map.insert(key.to_string(), replacement);
        }
    }
}

/// Normalized description of an outbound response
#[derive(Debug, Clone, Default)]
pub struct ResponseDescriptor {
    pub status: u16,
    pub headers: HeaderBag,
    /// Body text; `None` for streamed or binary bodies
    pub body: Option<String>,
    /// Target URL when the response is a redirect
    pub redirect_target: Option<String>,
    /// JSON body too large to buffer, so only known by its content type
    pub oversized_json: bool,
}

/// Accumulates one request's snapshot
#[derive(Debug, Clone)]
pub struct Collector {
    size_limit_kb: u64,
    request: Option<RequestSnapshot>,
    response: Option<ResponseSnapshot>,
    events: Vec<EventRecord>,
}

impl Collector {
    pub fn new() -> Self {
        Self::with_size_limit(DEFAULT_SIZE_LIMIT_KB)
    }

    pub fn with_size_limit(size_limit_kb: u64) -> Self {
        Self {
            size_limit_kb,
            request: None,
            response: None,
            events: Vec::new(),
        }
    }

    /// Capture the request, replacing any earlier capture in full
    pub fn record_request(&mut self, request: &RequestDescriptor) {
        let (controller_action, middleware) = match &request.route {
            Some(route) => (Some(route.action.clone()), Some(route.middleware.clone())),
            None => (None, None),
        };

        self.request = Some(RequestSnapshot {
            uri: request.uri(),
            method: request.method.clone(),
            ip: request.client_ip.clone(),
            headers: request.headers.clone(),
            cookies: request.cookies.clone(),
            payload: request.input(),
            duration: duration_from_start(),
            server: request.server.clone(),
            query: request.query.clone(),
            request: request.body.clone(),
            attributes: request.attributes.clone(),
            controller_action,
            middleware,
        });
    }

    /// Capture the response
    pub fn record_response(&mut self, response: &ResponseDescriptor) {
        self.response = Some(ResponseSnapshot {
            status: response.status,
            headers: response.headers.clone(),
            payload: self.classify(response),
            duration: duration_from_start(),
        });
    }

    /// Append an event with its payload stored as-is
    pub fn record_event(&mut self, name: impl Into<String>, payload: Value) {
        let name = name.into();
        let core = is_core_event(&name);

        self.events.push(EventRecord {
            name,
            payload,
            core,
            timestamp: epoch_seconds(),
        });
    }

    /// Append an event named after its Rust type, payload `{class, properties}`
    pub fn record_typed_event<E: Serialize>(&mut self, event: &E) -> Result<()> {
        let class = std::any::type_name::<E>();
        let properties = serde_json::to_value(event)?;

        self.record_event(class, json!({ "class": class, "properties": properties }));
        Ok(())
    }

    /// Whether a response body is small enough to embed
    pub fn content_within_limits(&self, content: &str) -> bool {
        content.chars().count() as f64 / 1000.0 <= self.size_limit_kb as f64
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Merge captured data with the stopwatch timeline. Does not consume
    /// anything, so it can be called repeatedly.
    pub fn finalize(&self, stopwatch: &Stopwatch) -> Snapshot {
        Snapshot {
            request: self.request.clone(),
            response: self.response.clone(),
            events: self.events.clone(),
            timeline: build_timeline(stopwatch),
        }
    }

    fn classify(&self, response: &ResponseDescriptor) -> ResponsePayload {
        if let Some(content) = response.body.as_deref() {
            if let Ok(parsed) = serde_json::from_str::<Value>(content) {
                if parsed.is_object() || parsed.is_array() {
                    return if self.content_within_limits(content) {
                        ResponsePayload::Json(parsed)
                    } else {
                        ResponsePayload::Purged
                    };
                }
            }
        }

        if response.oversized_json {
            return ResponsePayload::Purged;
        }

        match &response.redirect_target {
            Some(target) => ResponsePayload::Redirected(target.clone()),
            None => ResponsePayload::Html,
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
