//! `QuibblerServer`: the axum hook server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use quibbler_core::{EventType, InboundEvent};
use quibbler_runtime::{Dispatcher, FeedbackSink, ReviewEngine};
use quibbler_settings::QuibblerSettings;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Background event dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Body of `POST /hook/{session_id}`.
#[derive(Debug, Deserialize)]
struct HookEnvelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    source_path: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default, rename = "receivedAt")]
    received_at: Option<Value>,
}

/// Body of `POST /rules/invalidate`.
#[derive(Debug, Deserialize)]
struct InvalidateRequest {
    #[serde(default)]
    project_path: Option<String>,
}

/// The hook server.
pub struct QuibblerServer {
    bind_addr: String,
    shutdown_timeout: Duration,
    sweep_interval: Duration,
    engine: Arc<ReviewEngine>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl QuibblerServer {
    /// Create a server that binds `settings.server.host:port` when run.
    pub fn new(
        settings: &QuibblerSettings,
        engine: Arc<ReviewEngine>,
        sink: Arc<dyn FeedbackSink>,
    ) -> Self {
        Self {
            bind_addr: format!("{}:{}", settings.server.host, settings.server.port),
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
            sweep_interval: Duration::from_secs(settings.sessions.sweep_interval_secs.max(1)),
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&engine), sink)),
            engine,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/hook/{session_id}", post(hook_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/rules/invalidate", post(invalidate_rules_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind, serve until a shutdown signal, then drain.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.bind_addr.clone(),
                source,
            })?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn run_on(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        info!(addr = %local, "quibbler hook server listening");
        info!("hook endpoint: http://{local}/hook/{{session_id}}");

        let sweeper = self
            .engine
            .registry()
            .spawn_sweeper(self.sweep_interval, self.shutdown.token());
        let signals = {
            let shutdown = Arc::clone(&self.shutdown);
            tokio::spawn(async move { shutdown.wait_for_signal().await })
        };

        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        let handles: Vec<JoinHandle<()>> = vec![sweeper, signals];
        let drained = self
            .shutdown
            .graceful_shutdown(&self.dispatcher, handles, self.shutdown_timeout)
            .await;
        self.engine.close();
        info!(drained, "quibbler hook server stopped");
        Ok(())
    }

    /// Engine behind the server.
    pub fn engine(&self) -> &Arc<ReviewEngine> {
        &self.engine
    }

    /// Background dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Configured `host:port`.
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

/// POST /hook/{session_id}
async fn hook_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return detail(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }
    let envelope: HookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(error) => return detail(StatusCode::BAD_REQUEST, &format!("invalid JSON body: {error}")),
    };
    if session_id.trim().is_empty() {
        return detail(StatusCode::BAD_REQUEST, "session_id is required");
    }
    let Some(source_path) = envelope.source_path.filter(|p| !p.trim().is_empty()) else {
        return detail(StatusCode::BAD_REQUEST, "source_path is required");
    };

    let event_name = envelope.event.as_deref().unwrap_or("UnknownEvent");
    let mut event = InboundEvent::new(
        EventType::from_hook_name(event_name),
        session_id.clone(),
        PathBuf::from(&source_path),
        envelope.payload,
    );
    let timestamp = envelope
        .timestamp
        .as_ref()
        .or(envelope.received_at.as_ref())
        .and_then(Value::as_str)
        .and_then(parse_timestamp);
    if let Some(timestamp) = timestamp {
        event = event.with_timestamp(timestamp);
    }
    info!(
        event_type = %event.event_type,
        session = %short_id(&session_id),
        source_path = %source_path,
        "hook event received"
    );

    // The ticket is not awaited; the file sink is the delivery channel.
    let _ticket = state.dispatcher.submit(event);
    Json(json!({ "status": "ok", "session_id": session_id })).into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.dispatcher.engine().registry().snapshot();
    Json(health::health_check(state.start_time, &sessions))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => detail(StatusCode::NOT_FOUND, "metrics recorder not installed"),
    }
}

/// POST /rules/invalidate
async fn invalidate_rules_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: InvalidateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => return detail(StatusCode::BAD_REQUEST, &format!("invalid JSON body: {error}")),
    };
    let Some(project_path) = request.project_path.filter(|p| !p.trim().is_empty()) else {
        return detail(StatusCode::BAD_REQUEST, "project_path is required");
    };
    let generation = state
        .dispatcher
        .engine()
        .rules()
        .invalidate(std::path::Path::new(&project_path));
    info!(project = %project_path, generation, "project rules invalidated");
    Json(json!({ "status": "ok", "generation": generation })).into_response()
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(error) => {
            debug!(%error, text, "ignoring unparseable event timestamp");
            None
        }
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
