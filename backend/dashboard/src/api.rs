//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::actions::{self, FeeQuote, Submission, VoteOutcome};
use crate::dashboard::{Dashboard, PayoutPreview, Snapshot};
use crate::estimator::balance_to_units;
use crate::errors::{DashboardError, FieldError, Result};
use crate::types::ProcessedProject;
use crate::validation::{parse_form_date, today, ProjectForm};
use crate::wallet::{Session, SessionView};

#[derive(Clone)]
pub struct ApiState {
    pub dashboard: Arc<Dashboard>,
    pub session: Arc<Session>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dashboard", get(get_dashboard))
        .route("/refresh", post(refresh))
        .route("/preview", get(get_preview))
        .route("/fee", get(get_fee))
        .route("/projects", post(submit_project))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/vote", post(vote))
        .route("/wallet", get(get_wallet))
        .route("/wallet/connect", post(connect_wallet))
        .route("/wallet/disconnect", post(disconnect_wallet))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

#[derive(Deserialize)]
pub struct ViewerQuery {
    pub voter: Option<String>,
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    /// Hypothetical fund balance in whole tokens.
    pub balance: f64,
}

#[derive(Deserialize)]
pub struct FeeQuery {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub percent: u32,
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = match &self {
            DashboardError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DashboardError::Wallet(_) => StatusCode::CONFLICT,
            DashboardError::NotFound(_) => StatusCode::NOT_FOUND,
            DashboardError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DashboardError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DashboardError::Network(_)
            | DashboardError::Rpc { .. }
            | DashboardError::Json(_)
            | DashboardError::Parse(_)
            | DashboardError::Contract(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            warn!("Request failed: {self}");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
            fields: match self {
                DashboardError::Validation(fields) => fields,
                _ => Vec::new(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /dashboard`
///
/// Latest snapshot: payout preview for active projects, upcoming projects
/// and fund variables, each with its fetch state.
pub async fn get_dashboard(State(state): State<Arc<ApiState>>) -> Json<Snapshot> {
    Json(state.dashboard.snapshot().await)
}

/// `POST /refresh`
pub async fn refresh(State(state): State<Arc<ApiState>>) -> Result<Json<Snapshot>> {
    state.dashboard.refresh().await?;
    Ok(Json(state.dashboard.snapshot().await))
}

/// `GET /preview?balance=`
///
/// Payout estimate for the loaded active projects at another fund balance.
pub async fn get_preview(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PayoutPreview>> {
    let balance = balance_to_units(query.balance)?;
    Ok(Json(state.dashboard.preview_with_balance(balance).await?))
}

/// `GET /projects/:id?voter=`
///
/// Falls back to the connected account when no voter is given. The payout
/// estimate is omitted for active projects outside the loaded preview page.
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<u32>,
    Query(query): Query<ViewerQuery>,
) -> Result<Json<ProcessedProject>> {
    let voter = match query.voter {
        Some(voter) => Some(voter),
        None => state.session.address().await,
    };
    let project = state
        .dashboard
        .project_detail(project_id, voter.as_deref())
        .await?;
    Ok(Json(project))
}

/// `GET /fee?start_date=YYYY-MM-DD&end_date=YYYY-MM-DD`
pub async fn get_fee(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<FeeQuery>,
) -> Result<Json<FeeQuote>> {
    let start = parse_form_date(&query.start_date);
    let end = parse_form_date(&query.end_date);
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        (start, end) => {
            let mut fields = Vec::new();
            if start.is_none() {
                fields.push(FieldError::new("start_date", "Start date is not a valid date"));
            }
            if end.is_none() {
                fields.push(FieldError::new("end_date", "End date is not a valid date"));
            }
            return Err(DashboardError::Validation(fields));
        }
    };
    Ok(Json(actions::quote_fee(state.dashboard.client(), start, end).await?))
}

/// `POST /projects`
pub async fn submit_project(
    State(state): State<Arc<ApiState>>,
    Json(form): Json<ProjectForm>,
) -> Result<(StatusCode, Json<Submission>)> {
    let submission =
        actions::submit_project(&state.dashboard, &state.session, &form, today()).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// `POST /projects/:id/vote`
pub async fn vote(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<u32>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<VoteOutcome>> {
    let outcome =
        actions::cast_vote(&state.dashboard, &state.session, project_id, request.percent).await?;
    Ok(Json(outcome))
}

/// `GET /wallet`
pub async fn get_wallet(State(state): State<Arc<ApiState>>) -> Json<SessionView> {
    Json(state.session.view().await)
}

/// `POST /wallet/connect`
///
/// A new address changes which votes are attached, so the dashboard is
/// refetched.
pub async fn connect_wallet(State(state): State<Arc<ApiState>>) -> Result<Json<SessionView>> {
    let address = state.session.connect().await?;
    if let Err(e) = state.dashboard.set_viewer(Some(address)).await {
        warn!("Refresh after wallet connect failed: {e}");
    }
    Ok(Json(state.session.view().await))
}

/// `POST /wallet/disconnect`
pub async fn disconnect_wallet(State(state): State<Arc<ApiState>>) -> Json<SessionView> {
    state.session.disconnect().await;
    if let Err(e) = state.dashboard.set_viewer(None).await {
        warn!("Refresh after wallet disconnect failed: {e}");
    }
    Json(state.session.view().await)
}
