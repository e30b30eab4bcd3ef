//! HTTP and WebSocket surface
//!
//! Thin request-handling layer over the orchestrator: command endpoints,
//! history queries, and a WebSocket pushing run events to observers.

use crate::orchestrator::Orchestrator;
use crate::resolver;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::BTreeMap;
use testdeck_common::{Error, RunRecord, RunRequest};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Build the daemon's HTTP router.
pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/runner/config", get(runner_config))
        .route("/api/runner/scripts", get(scripts))
        .route("/api/runner/execute", post(execute))
        .route("/api/runner/stop", post(stop))
        .route("/api/runner/status", get(status))
        .route("/api/runner/runs", get(list_runs))
        .route("/api/runner/runs/latest", get(latest_run))
        .route("/api/runner/runs/:id", get(get_run))
        .route("/api/runner/runs/:id/rerun", post(rerun))
        .route("/api/runner/events", get(events))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Error wrapper mapping the core taxonomy onto HTTP status codes.
///
/// Every rejected command carries its specific reason; the dashboard
/// decides what to disable or display based on which invariant tripped.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::AlreadyRunning { .. } => StatusCode::CONFLICT,
            Error::InvalidRequest(_) | Error::NotRunning => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": testdeck_common::VERSION }))
}

/// What the dashboard needs to render its controls.
async fn runner_config(State(orchestrator): State<Orchestrator>) -> impl IntoResponse {
    let config = orchestrator.config();
    Json(json!({
        "project_name": config.project_name,
        "inputs": config.inputs,
        "primary_input": config.discovery.primary_input,
    }))
}

async fn scripts(
    State(orchestrator): State<Orchestrator>,
    Query(selection): Query<BTreeMap<String, String>>,
) -> impl IntoResponse {
    let scripts = resolver::available_scripts(orchestrator.config(), &selection);
    Json(json!({ "scripts": scripts }))
}

async fn execute(
    State(orchestrator): State<Orchestrator>,
    Json(request): Json<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = orchestrator.start(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "status": "started" })),
    ))
}

async fn stop(State(orchestrator): State<Orchestrator>) -> Result<impl IntoResponse, ApiError> {
    orchestrator.stop()?;
    Ok(Json(json!({ "success": true })))
}

async fn rerun(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = orchestrator.rerun(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "rerun_of": id, "status": "started" })),
    ))
}

async fn status(State(orchestrator): State<Orchestrator>) -> impl IntoResponse {
    Json(orchestrator.status())
}

async fn list_runs(
    State(orchestrator): State<Orchestrator>,
) -> Result<Json<Vec<RunRecord>>, ApiError> {
    Ok(Json(orchestrator.history()?))
}

async fn latest_run(State(orchestrator): State<Orchestrator>) -> Result<Response, ApiError> {
    match orchestrator.latest()? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no runs found" })),
        )
            .into_response()),
    }
}

async fn get_run(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    Ok(Json(orchestrator.get(&id)?))
}

/// WebSocket event stream: every run event as one JSON text frame, in
/// publish order, from the moment of connection onward.
async fn events(
    ws: WebSocketUpgrade,
    State(orchestrator): State<Orchestrator>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, orchestrator))
}

async fn stream_events(mut socket: WebSocket, orchestrator: Orchestrator) {
    let (observer, mut events) = orchestrator.subscribe();
    debug!("Event observer connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to encode event: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    // Observers only listen; anything but a close is ignored
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    orchestrator.unsubscribe(observer);
    debug!("Event observer disconnected");
}
