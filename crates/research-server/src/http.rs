use std::net::SocketAddr;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::facade::{ServiceFacade, StartRunRequest};

#[derive(Clone)]
pub struct AppState {
    pub facade: ServiceFacade,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    session_id: Option<i64>,
    cursor: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/runs", post(start_run))
        .route("/runs/status", get(get_run_status))
        .route("/runs/cancel", post(cancel_run))
        .route("/runs/events", get(get_run_events_page))
        .route("/runs/result", get(get_run_result))
        .route("/presets", get(list_presets))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "research server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

struct ApiError(research_types::ResearchError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            research_types::ResearchError::Config(_) => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<research_types::ResearchError> for ApiError {
    fn from(e: research_types::ResearchError) -> Self {
        Self(e)
    }
}

async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRunRequest>,
) -> Result<Json<impl serde::Serialize>, ApiError> {
    Ok(Json(state.facade.start_run(request).await?))
}

async fn get_run_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    match state.facade.get_run_status(query.session_id).await? {
        Some(status) => Ok(Json(status).into_response()),
        None => Ok(axum::http::StatusCode::NOT_FOUND.into_response()),
    }
}

async fn cancel_run(State(state): State<AppState>) -> Result<Json<impl serde::Serialize>, ApiError> {
    Ok(Json(state.facade.cancel_run().await?))
}

async fn get_run_events_page(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    match state
        .facade
        .get_run_events_page(query.session_id, query.cursor, query.limit)
        .await?
    {
        Some(page) => Ok(Json(page).into_response()),
        None => Ok(axum::http::StatusCode::NOT_FOUND.into_response()),
    }
}

async fn get_run_result(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    match state.facade.get_run_result(query.session_id).await? {
        Some(result) => Ok(Json(result).into_response()),
        None => Ok(axum::http::StatusCode::NOT_FOUND.into_response()),
    }
}

async fn list_presets(State(state): State<AppState>) -> Json<Vec<&'static str>> {
    Json(state.facade.list_presets())
}
