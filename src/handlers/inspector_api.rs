//! Inspector HTTP API handlers
//!
//! Read-only JSON views over the snapshot store. Every request opens its own
//! `SnapshotStore`, so the directory listing is cached per request only.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::InspectorError;
use crate::snapshot::{EventRecord, Snapshot, StoredSnapshot};
use crate::store::{SnapshotStore, Token};

/// Shared state for the inspector API
#[derive(Clone)]
pub struct InspectorApiState {
    pub storage: Arc<StorageConfig>,
}

impl InspectorApiState {
    pub fn new(storage: StorageConfig) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    fn open_store(&self) -> Result<SnapshotStore, InspectorError> {
        SnapshotStore::with_options(
            self.storage.base_path().as_ref(),
            self.storage.kind,
            self.storage.options(),
        )
    }
}

/// Query parameters for the activity list
#[derive(Debug, Deserialize)]
pub struct ActivityQueryParams {
    /// Number of newest snapshots to return, 0 for all
    #[serde(default = "default_last")]
    pub last: usize,
}

fn default_last() -> usize {
    10
}

/// Query parameters for a single snapshot
#[derive(Debug, Deserialize)]
pub struct ShowQueryParams {
    /// Only return one part: request, response, events or timeline
    pub panel: Option<String>,
}

/// One line of a condensed activity listing
#[derive(Debug, Serialize)]
pub struct ActivitySummary {
    pub token: String,
    /// UTC date rendered from the token
    pub date: Option<String>,
    pub method: Option<String>,
    pub uri: Option<String>,
    pub status: Option<u16>,
    pub duration: Option<f64>,
    pub events: usize,
}

impl From<&StoredSnapshot> for ActivitySummary {
    fn from(stored: &StoredSnapshot) -> Self {
        let request = stored.snapshot.request.as_ref();
        let response = stored.snapshot.response.as_ref();

        Self {
            token: stored.timestamp.clone(),
            date: token_date(&stored.timestamp),
            method: request.map(|r| r.method.clone()),
            uri: request.map(|r| r.uri.clone()),
            status: response.map(|r| r.status),
            duration: response.and_then(|r| r.duration),
            events: stored.snapshot.events.len(),
        }
    }
}

/// Response for the activity list
#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    /// Number of stored snapshots
    pub total: usize,
    pub last: usize,
    /// Tokens of the returned snapshots, newest first
    pub tokens: Vec<String>,
    pub activities: IndexMap<String, Snapshot>,
}

/// Render a token as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn token_date(token: &str) -> Option<String> {
    let seconds = Token::to_epoch_seconds(token)?;
    chrono::DateTime::from_timestamp(seconds as i64, 0)
        .map(|date| date.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// GET {prefix}/api - Newest captured requests
///
/// Example: GET /_inspector/api?last=20
pub async fn list_activity(
    State(state): State<InspectorApiState>,
    Query(params): Query<ActivityQueryParams>,
) -> Result<Json<ActivityResponse>, InspectorError> {
    let store = state.open_store()?;
    let total = store.list_tokens()?.len();

    let mut tokens = Vec::new();
    let mut activities = IndexMap::new();
    for stored in store.recent(params.last)? {
        tokens.push(stored.timestamp.clone());
        activities.insert(stored.timestamp, stored.snapshot);
    }

    Ok(Json(ActivityResponse {
        total,
        last: params.last,
        tokens,
        activities,
    }))
}

/// GET {prefix}/api/{token} - One snapshot, `latest` for the newest
///
/// Example: GET /_inspector/api/1700000000_0042?panel=timeline
pub async fn show_activity(
    State(state): State<InspectorApiState>,
    Path(token): Path<String>,
    Query(params): Query<ShowQueryParams>,
) -> Result<Json<Value>, InspectorError> {
    let stored = state.open_store()?.resolve(&token)?;

    let Some(panel) = params.panel else {
        return Ok(Json(serde_json::to_value(&stored)?));
    };

    let section = match panel.as_str() {
        "request" => serde_json::to_value(&stored.snapshot.request)?,
        "response" => serde_json::to_value(&stored.snapshot.response)?,
        "events" => serde_json::to_value(&stored.snapshot.events)?,
        "timeline" => serde_json::to_value(&stored.snapshot.timeline)?,
        other => {
            tracing::debug!(panel = %other, "Unknown panel requested");
            return Ok(Json(serde_json::to_value(&stored)?));
        }
    };

    let mut body = Map::new();
    body.insert("timestamp".to_string(), Value::String(stored.timestamp));
    body.insert(panel, section);
    Ok(Json(Value::Object(body)))
}

/// GET {prefix}/health - Inspector health check
pub async fn health(State(state): State<InspectorApiState>) -> impl IntoResponse {
    match state.open_store().and_then(|store| store.latest_token()) {
        Ok(latest) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "latest": latest,
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Snapshot store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "error": e.to_string(),
                })),
            )
        }
    }
}

/// GET {prefix}/api/{token}/events/{n} - The n-th event of a snapshot
pub async fn show_event(
    State(state): State<InspectorApiState>,
    Path((token, index)): Path<(String, usize)>,
) -> Result<Json<EventRecord>, InspectorError> {
    let store = state.open_store()?;
    let stored = store.resolve(&token)?;

    stored
        .snapshot
        .events
        .into_iter()
        .nth(index)
        .map(Json)
        .ok_or_else(|| {
            InspectorError::SnapshotNotFound(store.dir().join(format!("{}#event{}", token, index)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_last() {
        assert_eq!(default_last(), 10);
    }

    #[test]
    fn test_activity_query_defaults() {
        let params: ActivityQueryParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.last, 10);
    }

    #[test]
    fn test_token_date() {
        assert_eq!(
            token_date("1700000000_0042").as_deref(),
            Some("2023-11-14 22:13:20")
        );
        assert_eq!(token_date("garbage"), None);
    }
}
