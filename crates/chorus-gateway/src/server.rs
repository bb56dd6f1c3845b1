//! Gateway REST server — Axum-based JSON API over the orchestrator

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use chorus_core::{
    AggregateReply, AggregateRequest, AskRequest, ChorusError, Completion, ExchangeReply,
    ExchangeStore, FanoutRequest, Orchestrator, Prompt, StatusProbe, validate,
};

use crate::protocol::{ApiError, HealthReply, HistoryReply, SearchReply, StatusReply};

const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;

/// Shared state for all routes
#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub probe: Arc<StatusProbe>,
    pub store: Arc<dyn ExchangeStore>,
    pub start_time: std::time::Instant,
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(
        bind: SocketAddr,
        orchestrator: Arc<Orchestrator>,
        probe: Arc<StatusProbe>,
        store: Arc<dyn ExchangeStore>,
    ) -> Self {
        let state = GatewayState {
            orchestrator,
            probe,
            store,
            start_time: std::time::Instant::now(),
        };
        Self { state, bind }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/ask", post(ask_handler))
            .route("/api/ask/multi", post(ask_multi_handler))
            .route("/api/ask/aggregate", post(ask_aggregate_handler))
            .route("/api/prompts/{id}", get(prompt_handler))
            .route("/api/prompts/{id}/completions", get(completions_handler))
            .route("/api/history/{chat_id}", get(history_handler))
            .route("/api/search", get(search_handler))
            .route("/api/providers/status", get(providers_status_handler))
            .route("/api/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Start the server (blocks until shutdown)
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", self.bind);

        axum::serve(listener, router).await?;

        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(self) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

// ── Completion handlers ──

async fn ask_handler(
    State(state): State<GatewayState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<ExchangeReply>, ApiError> {
    let reply = state.orchestrator.ask(&request).await?;
    Ok(Json(reply))
}

async fn ask_multi_handler(
    State(state): State<GatewayState>,
    Json(request): Json<FanoutRequest>,
) -> Result<Json<ExchangeReply>, ApiError> {
    let reply = state.orchestrator.ask_multi(&request).await?;
    Ok(Json(reply))
}

async fn ask_aggregate_handler(
    State(state): State<GatewayState>,
    Json(request): Json<AggregateRequest>,
) -> Result<Json<AggregateReply>, ApiError> {
    let reply = state.orchestrator.ask_aggregate(&request).await?;
    Ok(Json(reply))
}

// ── Record handlers ──

async fn prompt_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Prompt>, ApiError> {
    validate::validate_record_id(&id)?;
    let prompt = state
        .store
        .prompt_by_id(&id)
        .await
        .map_err(ChorusError::from)?
        .ok_or_else(|| ChorusError::NotFound(format!("prompt '{id}'")))?;
    Ok(Json(prompt))
}

async fn completions_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Completion>>, ApiError> {
    validate::validate_record_id(&id)?;
    // A prompt that settled with no rows yet is an empty list; an id nobody
    // ever recorded is a 404.
    if state
        .store
        .prompt_by_id(&id)
        .await
        .map_err(ChorusError::from)?
        .is_none()
    {
        return Err(ChorusError::NotFound(format!("prompt '{id}'")).into());
    }
    let completions = state
        .store
        .completions_for_prompt(&id)
        .await
        .map_err(ChorusError::from)?;
    Ok(Json(completions))
}

async fn history_handler(
    State(state): State<GatewayState>,
    Path(chat_id): Path<String>,
) -> Result<Json<HistoryReply>, ApiError> {
    validate::validate_chat_id(Some(&chat_id))?;
    let prompts = state
        .store
        .prompts_for_chat(&chat_id)
        .await
        .map_err(ChorusError::from)?;

    let mut exchanges = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let completions = state
            .store
            .completions_for_prompt(&prompt.id)
            .await
            .map_err(ChorusError::from)?;
        exchanges.push(ExchangeReply {
            prompt,
            completions,
        });
    }

    Ok(Json(HistoryReply { chat_id, exchanges }))
}

/// Query string for GET /api/search
#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
    limit: Option<usize>,
}

async fn search_handler(
    State(state): State<GatewayState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchReply>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .min(MAX_SEARCH_LIMIT);
    let hits = state
        .store
        .search(&params.q, limit)
        .await
        .map_err(ChorusError::from)?;
    Ok(Json(SearchReply {
        query: params.q,
        hits,
    }))
}

// ── Status handlers ──

async fn providers_status_handler(State(state): State<GatewayState>) -> Json<StatusReply> {
    let providers = state.probe.check_all().await;
    Json(StatusReply { providers })
}

async fn health_handler(State(state): State<GatewayState>) -> Json<HealthReply> {
    Json(HealthReply {
        status: "ok".to_string(),
        providers: state.orchestrator.provider_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
