use anyhow::Result;
use axum::{
    extract::Extension,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    capture::{self, CaptureState, RequestProbe},
    collector,
    config::Config,
    handlers::inspector_api::{self, InspectorApiState},
    signals::setup_signal_handlers,
    store::SnapshotStore,
};

/// Start the inspector server
///
/// This function:
/// 1. Opens the snapshot store (creating its directory)
/// 2. Sets up signal handlers for graceful shutdown
/// 3. Wraps the demo app with the capture middleware and inspector routes
/// 4. Binds to the configured address
/// 5. Serves requests with graceful shutdown support
pub async fn start_server(config: Config) -> Result<()> {
    collector::mark_process_start();

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = attach(demo_routes(), &config)?;

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting request inspector on {}", addr);
    info!(
        "Snapshots: {} ({} excluded route fragments, capture {})",
        config.storage.base_path().base_path().join(config.storage.kind.cache_dir()).display(),
        config.capture.routes_to_exclude.len(),
        if config.capture.enabled { "enabled" } else { "disabled" },
    );
    info!("Inspector API available under {}/api", config.capture.route_prefix);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Instrument `app` with request capture and mount the inspector API under
/// the configured route prefix
pub fn attach(app: Router, config: &Config) -> Result<Router> {
    let store = SnapshotStore::with_options(
        config.storage.base_path().as_ref(),
        config.storage.kind,
        config.storage.options(),
    )?;

    let capture_state = CaptureState::new(config.capture.clone(), store);
    let app = capture::instrument(app, capture_state);

    Ok(app
        .nest(
            &config.capture.route_prefix,
            inspector_routes(InspectorApiState::new(config.storage.clone())),
        )
        .layer(TraceLayer::new_for_http()))
}

/// Read-only inspector routes, relative to the route prefix
pub fn inspector_routes(state: InspectorApiState) -> Router {
    Router::new()
        .route("/health", get(inspector_api::health))
        .route("/api", get(inspector_api::list_activity))
        .route("/api/:token", get(inspector_api::show_activity))
        .route("/api/:token/events/:index", get(inspector_api::show_event))
        .with_state(state)
}

/// Small app served by `inspector serve` so there is traffic to inspect
pub fn demo_routes() -> Router {
    Router::new()
        .route("/", get(demo_index))
        .route("/echo", post(demo_echo))
}

async fn demo_index() -> Json<Value> {
    Json(json!({
        "service": "request-inspector",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn demo_echo(
    probe: Option<Extension<RequestProbe>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    if let Some(Extension(probe)) = probe {
        probe.start("echo.render", "view");
        probe.event("echo.received", body.clone());
        let _ = probe.stop("echo.render");
    }
    Json(json!({ "echo": body }))
}
