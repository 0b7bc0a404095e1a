use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;

/// Inspector error types
#[derive(Debug, thiserror::Error)]
pub enum InspectorError {
    /// The storage directory could not be created and still does not exist
    #[error("Directory \"{}\" was not created: {source}", path.display())]
    StorageDirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No stored snapshot matches the requested token
    #[error("Snapshot not found: {}", .0.display())]
    SnapshotNotFound(PathBuf),

    /// A stored snapshot file is not valid JSON
    #[error("Malformed snapshot file '{token}': {source}")]
    MalformedSnapshotFile {
        token: String,
        #[source]
        source: serde_json::Error,
    },

    /// Stopping a timer that is not running
    #[error("Timer '{0}' is not started")]
    TimerNotStarted(String),

    /// Closing a stopwatch section when only the root section is open
    #[error("There is no started section to stop")]
    NoStartedSection,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, InspectorError>;

impl IntoResponse for InspectorError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::SnapshotNotFound(_) => StatusCode::NOT_FOUND,
            Self::TimerNotStarted(_) | Self::NoStartedSection => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Never leak absolute storage paths to API clients
        let message = match &self {
            Self::SnapshotNotFound(path) => format!(
                "Snapshot not found: {}",
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &InspectorError) -> &'static str {
    match error {
        InspectorError::StorageDirectoryCreationFailed { .. } => "storage_directory_creation_failed",
        InspectorError::SnapshotNotFound(_) => "snapshot_not_found",
        InspectorError::MalformedSnapshotFile { .. } => "malformed_snapshot_file",
        InspectorError::TimerNotStarted(_) => "timer_not_started",
        InspectorError::NoStartedSection => "no_started_section",
        InspectorError::Config(_) => "config_error",
        InspectorError::Serialization(_) => "serialization_error",
        InspectorError::Io(_) => "io_error",
    }
}
