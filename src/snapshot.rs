//! Captured request data model
//!
//! Field names on the wire match the stored file format, so snapshots written
//! by older builds remain readable.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Ordered header multimap (name -> values in arrival order)
pub type HeaderBag = IndexMap<String, Vec<String>>;

/// Ordered string map used for cookies, query parameters and server variables
pub type StringMap = IndexMap<String, String>;

/// Everything captured for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub request: Option<RequestSnapshot>,

    #[serde(default)]
    pub response: Option<ResponseSnapshot>,

    #[serde(default)]
    pub events: Vec<EventRecord>,

    #[serde(default)]
    pub timeline: Timeline,
}

/// A snapshot read back from the store, tagged with its token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    #[serde(flatten)]
    pub snapshot: Snapshot,

    /// Token the snapshot was resolved from
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub uri: String,
    pub method: String,
    pub ip: Option<String>,
    #[serde(default)]
    pub headers: HeaderBag,
    #[serde(default)]
    pub cookies: StringMap,
    /// Body fields merged with uploaded-file descriptors
    #[serde(default)]
    pub payload: Value,
    /// Milliseconds since process start
    pub duration: Option<f64>,
    #[serde(default)]
    pub server: StringMap,
    #[serde(default)]
    pub query: StringMap,
    /// Body fields as received
    #[serde(default)]
    pub request: Value,
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,
    #[serde(rename = "controllerAction", default, skip_serializing_if = "Option::is_none")]
    pub controller_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderBag,
    pub payload: ResponsePayload,
    pub duration: Option<f64>,
}

/// What was kept of a response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// JSON body within the size limit
    Json(Value),
    /// JSON body over the size limit
    Purged,
    /// Redirect, with its target URL
    Redirected(String),
    /// Anything else
    Html,
}

const PURGED: &str = "Purged";
const REDIRECTED_PREFIX: &str = "Redirected to ";
const HTML_RESPONSE: &str = "HTML Response";

impl From<Value> for ResponsePayload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) if text == PURGED => Self::Purged,
            Value::String(text) if text == HTML_RESPONSE => Self::Html,
            Value::String(text) => match text.strip_prefix(REDIRECTED_PREFIX) {
                Some(target) => Self::Redirected(target.to_string()),
                None => Self::Json(Value::String(text)),
            },
            other => Self::Json(other),
        }
    }
}

impl From<&ResponsePayload> for Value {
    fn from(payload: &ResponsePayload) -> Self {
        match payload {
            ResponsePayload::Json(value) => value.clone(),
            ResponsePayload::Purged => Value::String(PURGED.to_string()),
            ResponsePayload::Redirected(target) => {
                Value::String(format!("{REDIRECTED_PREFIX}{target}"))
            }
            ResponsePayload::Html => Value::String(HTML_RESPONSE.to_string()),
        }
    }
}

impl Serialize for ResponsePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Json(value) => value.serialize(serializer),
            other => Value::from(other).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ResponsePayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

/// One fired event, in firing order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    /// Framework-internal event
    pub core: bool,
    /// Unix epoch seconds, microsecond precision
    pub timestamp: f64,
}

/// Flattened timer data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Entries keyed by timer name
    #[serde(default)]
    pub timeline: IndexMap<String, TimelineEntry>,
    #[serde(rename = "timeMin")]
    pub time_min: f64,
    #[serde(rename = "timeMax")]
    pub time_max: f64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            timeline: IndexMap::new(),
            time_min: f64::MAX,
            time_max: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(rename = "sect")]
    pub section: String,
    #[serde(rename = "cat")]
    pub category: String,
    #[serde(rename = "mem")]
    pub memory: u64,
    #[serde(rename = "orig")]
    pub origin: f64,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    /// Per-lap data, only kept when the timer ran more than once
    #[serde(default)]
    pub periods: Vec<TimelinePeriod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelinePeriod {
    #[serde(rename = "mem")]
    pub memory: u64,
    pub start: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_payload_sentinels_serialize_as_strings() {
        assert_eq!(Value::from(&ResponsePayload::Purged), json!("Purged"));
        assert_eq!(Value::from(&ResponsePayload::Html), json!("HTML Response"));
        assert_eq!(
            Value::from(&ResponsePayload::Redirected("/login".to_string())),
            json!("Redirected to /login")
        );
        assert_eq!(
            serde_json::to_value(ResponsePayload::Json(json!({"ok": true}))).unwrap(),
            json!({"ok": true})
        );
    }

    #[test]
    fn test_response_payload_reads_sentinels_back() {
        let payload: ResponsePayload = serde_json::from_value(json!("Redirected to /home")).unwrap();
        assert_eq!(payload, ResponsePayload::Redirected("/home".to_string()));

        let payload: ResponsePayload = serde_json::from_value(json!([1, 2])).unwrap();
        assert_eq!(payload, ResponsePayload::Json(json!([1, 2])));
    }

    #[test]
    fn test_stored_snapshot_flattens_timestamp() {
        let stored = StoredSnapshot {
            snapshot: Snapshot::default(),
            timestamp: "1700000000_0042".to_string(),
        };
        let value = serde_json::to_value(&stored).unwrap();

        assert_eq!(value["timestamp"], "1700000000_0042");
        assert!(value["request"].is_null());
        assert_eq!(value["events"], json!([]));
        assert_eq!(value["timeline"]["timeMax"], json!(0.0));
    }

    #[test]
    fn test_request_route_fields_omitted_when_absent() {
        let request = RequestSnapshot {
            uri: "/".to_string(),
            method: "GET".to_string(),
            ip: None,
            headers: HeaderBag::new(),
            cookies: StringMap::new(),
            payload: json!({}),
            duration: None,
            server: StringMap::new(),
            query: StringMap::new(),
            request: json!({}),
            attributes: IndexMap::new(),
            controller_action: None,
            middleware: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        let object = value.as_object().unwrap();

        assert!(!object.contains_key("controllerAction"));
        assert!(!object.contains_key("middleware"));
        assert!(object.contains_key("ip"));
    }
}
