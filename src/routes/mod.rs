use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ApiError;
use crate::events::ChannelRegistry;
use crate::middleware;
use crate::models::run::{ParameterError, RunOverview, RunRecord, StartTestRequest};
use crate::runner::Orchestrator;
use crate::store::RunStore;

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub registry: ChannelRegistry,
    pub store: Arc<dyn RunStore>,
    pub config: Arc<Config>,
}

/// Build the application with all routes and middleware
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(api_routes(state))
        .layer(middleware::cors_layer())
        .layer(middleware::trace_layer())
}

/// Graceful shutdown future for `axum::serve`.
///
/// Waits for `signal`, then closes every open event stream; an open stream
/// otherwise keeps its connection alive indefinitely.
pub async fn close_streams_on<F>(registry: ChannelRegistry, signal: F)
where
    F: std::future::Future<Output = ()>,
{
    signal.await;
    registry.close_all();
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Test control, event stream and history routes
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/start-test", post(start_test_handler))
        .route("/api/events/:client_id", get(events_handler))
        .route("/api/history", get(history_list_handler))
        .route("/api/history/:test_id", get(history_detail_handler))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "GPT Limit Tester is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
///
/// Returns status, timestamp and version for load balancers.
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// POST /api/start-test - Validate parameters and start a run
///
/// Answers 202 as soon as the parameters are valid. The run itself starts in
/// the background once the client's event stream is open, or once the
/// subscriber wait elapses, whichever comes first.
async fn start_test_handler(
    State(state): State<AppState>,
    body: Result<Json<StartTestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Unreadable start-test body");
            return Err(ParameterError::Missing.into());
        }
    };

    let parameters = request.into_parameters().inspect_err(|e| {
        tracing::warn!(error = %e, "Rejected start-test request");
    })?;

    let client_id = parameters.subscriber_id.clone();
    tracing::info!(
        client_id = %client_id,
        model = %parameters.model,
        num_requests = parameters.num_requests,
        max_tokens = parameters.max_tokens,
        "Received test request"
    );

    let orchestrator = state.orchestrator.clone();
    let registry = state.registry.clone();
    let wait = state.config.subscriber_wait;
    let subscriber_id = client_id.clone();

    tokio::spawn(async move {
        if !registry.wait_for(&subscriber_id, wait).await {
            tracing::warn!(
                client_id = %subscriber_id,
                wait_ms = wait.as_millis() as u64,
                "No event subscriber connected, starting test anyway"
            );
        }
        if orchestrator.start(parameters).join().await.is_none() {
            tracing::warn!(client_id = %subscriber_id, "Test run ended without a record");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Test initiated successfully.",
            "clientId": client_id
        })),
    ))
}

/// GET /api/events/:client_id - Server-sent event stream for one client
///
/// Opening the stream registers the client; closing it unregisters the
/// client. Opening a second stream for the same id replaces the first.
async fn events_handler(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state.registry.open(&client_id).map(|event| {
        let data = event.payload().unwrap_or_else(|e| {
            tracing::error!(event = event.name(), error = %e, "Failed to serialize event");
            "{}".to_string()
        });
        Ok(Event::default().event(event.name()).data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.registry.keep_alive_interval())
            .text("keep-alive"),
    )
}

/// GET /api/history - Overviews of all stored runs, newest first
async fn history_list_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<RunOverview>>, ApiError> {
    let overviews = state.store.list().await?;
    tracing::debug!(count = overviews.len(), "Listing test history");
    Ok(Json(overviews))
}

/// GET /api/history/:test_id - One full run record
async fn history_detail_handler(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    let record = state.store.load(&test_id).await?;
    Ok(Json(record))
}
