//! HTTP transport over [`AgenticEngine`].
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/health` | liveness |
//! | POST | `/query` | [`FinalResponse`] |
//! | POST | `/query/stream` | SSE, one event per [`StreamEvent`] |
//! | GET | `/providers` | current selection and catalogue |
//! | PUT | `/providers/current` | change provider/model |
//! | DELETE | `/sessions/{id}` | forget a conversation |
//! | GET | `/usage` | ledger totals |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{
    AgenticEngine, FinalResponse, ProviderInfo, Query, Selection, StreamEvent, UsageTotals,
};
use crate::error::{AgentError, ProviderError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<AgenticEngine>,
}

impl AppState {
    /// Wraps an engine.
    #[must_use]
    pub const fn new(engine: Arc<AgenticEngine>) -> Self {
        Self { engine }
    }
}

/// [`AgentError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AgentError::InvalidQuery { .. }
            | AgentError::UnsupportedProvider { .. }
            | AgentError::Config { .. } => StatusCode::BAD_REQUEST,
            AgentError::NoProvider { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Provider(ProviderError::RateLimited { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AgentError::Provider(ProviderError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AgentError::Provider(_) => StatusCode::BAD_GATEWAY,
            AgentError::Store(_)
            | AgentError::Tool(_)
            | AgentError::Cancelled
            | AgentError::Orchestration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let body = Json(json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        (status, body).into_response()
    }
}

/// Body of `PUT /providers/current`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetProviderRequest {
    /// Provider name.
    pub provider: String,
    /// Model; the provider default when absent.
    #[serde(default)]
    pub model: Option<String>,
}

/// Body of `GET /providers`.
#[derive(Debug, Clone, Serialize)]
pub struct ProvidersResponse {
    /// Current default.
    pub current: Option<Selection>,
    /// Every known provider.
    pub providers: Vec<ProviderInfo>,
}

/// Body of `GET /usage`.
#[derive(Debug, Clone, Serialize)]
pub struct UsageResponse {
    /// Totals over every call.
    pub totals: UsageTotals,
    /// Totals per provider.
    pub by_provider: std::collections::BTreeMap<String, UsageTotals>,
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/query/stream", post(query_stream))
        .route("/providers", get(providers))
        .route("/providers/current", put(set_provider))
        .route("/sessions/{id}", delete(clear_session))
        .route("/usage", get(usage))
        .with_state(state)
}

/// Serves until ctrl-c.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(engine: Arc<AgenticEngine>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, router(AppState::new(engine)))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        })
        .await
        .context("server error")
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.engine.current_provider(),
        "tools": state.engine.tool_names(),
    }))
}

async fn query(
    State(state): State<AppState>,
    Json(request): Json<Query>,
) -> Result<Json<FinalResponse>, ApiError> {
    Ok(Json(state.engine.query(&request).await?))
}

async fn query_stream(
    State(state): State<AppState>,
    Json(request): Json<Query>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = state
        .engine
        .query_stream(request, CancellationToken::new())
        .map(|event| Ok(sse_event(&event)));
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .json_data(event)
        .unwrap_or_else(|e| {
            Event::default()
                .event("error")
                .data(json!({ "type": "error", "message": e.to_string() }).to_string())
        })
}

async fn providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        current: state.engine.current_provider(),
        providers: state.engine.providers(),
    })
}

async fn set_provider(
    State(state): State<AppState>,
    Json(request): Json<SetProviderRequest>,
) -> Result<Json<Selection>, ApiError> {
    Ok(Json(
        state
            .engine
            .set_provider(&request.provider, request.model.as_deref())?,
    ))
}

async fn clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    Json(json!({ "session_id": id, "cleared": state.engine.clear_session(&id) }))
}

async fn usage(State(state): State<AppState>) -> Json<UsageResponse> {
    let ledger = state.engine.usage();
    Json(UsageResponse {
        totals: ledger.totals(),
        by_provider: ledger.by_provider(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::EngineConfig;
    use crate::tools::ToolRegistry;

    fn state() -> AppState {
        let engine = AgenticEngine::builder(EngineConfig::default())
            .tools(ToolRegistry::new())
            .build()
            .unwrap_or_else(|_| unreachable!());
        AppState::new(Arc::new(engine))
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: AgentError| ApiError(e).status();
        assert_eq!(
            status(AgentError::InvalidQuery {
                message: String::new()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(AgentError::NoProvider {
                hint: String::new()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(AgentError::Provider(ProviderError::RateLimited {
                provider: "groq",
                message: String::new(),
            })),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_empty_question_is_bad_request() {
        let result = query(State(state()), Json(Query::new(""))).await;
        let response = result.err().map(IntoResponse::into_response);
        assert_eq!(
            response.map(|r| r.status()),
            Some(StatusCode::BAD_REQUEST)
        );
    }

    #[tokio::test]
    async fn test_health_reports_tools() {
        let Json(body) = health(State(state())).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_clear_unknown_session() {
        let Json(body) = clear_session(State(state()), Path("nope".to_string())).await;
        assert_eq!(body["cleared"], false);
    }

    #[tokio::test]
    async fn test_query_runs_on_a_spawned_task() {
        let task = tokio::spawn(query(State(state()), Json(Query::new("Explain tides"))));
        let result = task.await.unwrap_or_else(|_| unreachable!());
        let response = result.err().map(IntoResponse::into_response);
        assert_eq!(
            response.map(|r| r.status()),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }
}
