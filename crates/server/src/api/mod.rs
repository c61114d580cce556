//! # Pipeline API
//!
//! HTTP surface over one `PipelineOrchestrator`.

pub mod error;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use foundry_core::config::FoundryConfig;
use foundry_core::skills::artifact_registry::{DeploymentConfig, GenerationOptions};
use foundry_core::state::CreationRequest;
use foundry_core::swarm::{
    AgentStatusSnapshot, CancelToken, ChannelStatusSink, PipelineEvent, PipelineOrchestrator,
};

use error::ApiError;

const EVENT_CAPACITY: usize = 256;

/// Application state
pub struct AppState {
    pub orchestrator: PipelineOrchestrator,
    pub events: broadcast::Sender<PipelineEvent>,
    pub status: ChannelStatusSink,
    /// Cancelled on shutdown; every in-flight stage call observes it
    pub shutdown: CancelToken,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire an orchestrator to the event and status channels
    pub fn new(orchestrator: PipelineOrchestrator) -> SharedState {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let status = ChannelStatusSink::new(EVENT_CAPACITY);
        let orchestrator = orchestrator
            .with_event_channel(events.clone())
            .with_status_sink(Arc::new(status.clone()));
        Arc::new(Self {
            orchestrator,
            events,
            status,
            shutdown: CancelToken::new(),
        })
    }

    pub fn from_config(config: &FoundryConfig) -> anyhow::Result<SharedState> {
        Ok(Self::new(PipelineOrchestrator::from_config(config)?))
    }
}

pub fn router(state: SharedState) -> Router {
    let pipeline_routes = Router::new()
        .route("/concepts", post(create_concept))
        .route("/concepts/:id/generate", post(generate))
        .route("/generations/:id/deploy", post(deploy))
        .route("/requests/:id", get(get_request))
        .route("/status", get(get_status))
        .route("/events", get(events))
        .route("/schema/requirements", get(requirements_schema));

    Router::new()
        .nest("/api/v1", pipeline_routes)
        .with_state(state)
}

/// JSON schemas of every caller-supplied input
pub fn input_schemas() -> serde_json::Value {
    serde_json::json!({
        "requirements": schemars::schema_for!(CreationRequest),
        "generation_options": schemars::schema_for!(GenerationOptions),
        "deployment_config": schemars::schema_for!(DeploymentConfig),
    })
}

// === Handlers ===

/// Parse a JSON body; malformed bodies become `bad_request` responses
fn parse_body<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid {}: {}", what, e)))
}

/// Missing or mistyped requirement fields are reported by name
async fn create_concept(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request = CreationRequest::from_json(parse_body(&body, "JSON body")?)?;
    let concept = state
        .orchestrator
        .conceptualize(request, &state.shutdown)
        .await?;
    Ok((StatusCode::CREATED, Json(concept)))
}

/// Body is optional; an empty body means default options
async fn generate(
    State(state): State<SharedState>,
    Path(concept_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let options = if body.iter().all(u8::is_ascii_whitespace) {
        GenerationOptions::default()
    } else {
        parse_body(&body, "generation options")?
    };

    let generation = state
        .orchestrator
        .generate(&concept_id, options, &state.shutdown)
        .await?;
    Ok((StatusCode::CREATED, Json(generation)))
}

async fn deploy(
    State(state): State<SharedState>,
    Path(generation_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let config: DeploymentConfig = parse_body(&body, "deployment config")?;
    let deployment = state
        .orchestrator
        .deploy(&generation_id, config, &state.shutdown)
        .await?;
    Ok((StatusCode::CREATED, Json(deployment)))
}

/// Accepts a request id or any stage id
async fn get_request(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.find_by_stage_id(&id)?))
}

async fn get_status(State(state): State<SharedState>) -> Json<AgentStatusSnapshot> {
    Json(state.orchestrator.get_status())
}

async fn requirements_schema() -> Json<serde_json::Value> {
    Json(serde_json::to_value(schemars::schema_for!(CreationRequest)).unwrap_or_default())
}

/// SSE stream of pipeline events (`pipeline`) and status changes (`status`)
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Lagged receivers skip what they missed
    let pipeline = BroadcastStream::new(state.events.subscribe()).filter_map(|msg| async move {
        let event = msg.ok()?;
        let json = serde_json::to_string(&event).unwrap_or_default();
        Some(Ok(Event::default().event("pipeline").data(json)))
    });
    let status = BroadcastStream::new(state.status.subscribe()).filter_map(|msg| async move {
        let update = msg.ok()?;
        let json = serde_json::to_string(&update).unwrap_or_default();
        Some(Ok(Event::default().event("status").data(json)))
    });

    Sse::new(stream::select(pipeline, status)).keep_alive(KeepAlive::default())
}
