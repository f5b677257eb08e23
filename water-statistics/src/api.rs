//! HTTP surface: the backfill action, meter settings and metrics.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use meter_client::domain::MeterState;
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use chrono::Utc;
use chrono_tz::Tz;
use time::Date;

use crate::{
    orchestrator::{CycleOutcome, OrchestratorHandle},
    pipeline::PipelineError,
    scheduler::local_date,
    state::MeterStateManager,
};

#[derive(Clone)]
pub struct ApiState {
    pub handle: OrchestratorHandle,
    pub meter_state: MeterStateManager,
    pub timezone: Tz,
    pub auth_bearer_token: Option<String>,
    pub metrics: Option<PrometheusHandle>,
}

pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::InvalidRequest(_) | PipelineError::InvalidState(_) | PipelineError::InvalidDelta(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::Regression { .. } => StatusCode::CONFLICT,
            PipelineError::Auth(_) | PipelineError::Transport(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "kind": self.0.kind(),
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(serde::Deserialize)]
struct FillHistoricalRequest {
    start_date: Date,
    #[serde(default)]
    end_date: Option<Date>,
}

#[derive(serde::Deserialize)]
struct InitialReadingRequest {
    value: Decimal,
    #[serde(default)]
    date: Option<Date>,
}

#[derive(serde::Deserialize)]
struct PriceRequest {
    value: Decimal,
}

pub fn router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/actions/fill_historical_data", post(fill_historical_data))
        .route("/settings", get(get_settings))
        .route("/settings/initial_reading", put(set_initial_reading))
        .route("/settings/price_per_unit", put(set_price_per_unit))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .merge(protected)
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

async fn require_bearer(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.auth_bearer_token.as_deref() else {
        return next.run(request).await;
    };
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected);

    if authorized {
        next.run(request).await
    } else {
        metrics::counter!("api_unauthorized_total").increment(1);
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn fill_historical_data(
    State(state): State<ApiState>,
    Json(req): Json<FillHistoricalRequest>,
) -> Result<Json<CycleOutcome>, ApiError> {
    tracing::info!(start = %req.start_date, end = ?req.end_date, "fill_historical_data requested");
    let outcome = state.handle.fill_historical_data(req.start_date, req.end_date).await?;
    Ok(Json(outcome))
}

async fn get_settings(State(state): State<ApiState>) -> Result<Json<MeterState>, ApiError> {
    Ok(Json(state.meter_state.get().await?))
}

async fn set_initial_reading(
    State(state): State<ApiState>,
    Json(req): Json<InitialReadingRequest>,
) -> Result<Json<MeterState>, ApiError> {
    let date = match req.date {
        Some(date) => date,
        None => local_date(Utc::now(), state.timezone)?,
    };
    state.meter_state.set(req.value, date).await?;
    Ok(Json(state.meter_state.get().await?))
}

async fn set_price_per_unit(
    State(state): State<ApiState>,
    Json(req): Json<PriceRequest>,
) -> Result<Json<MeterState>, ApiError> {
    state.meter_state.set_price(req.value).await?;
    Ok(Json(state.meter_state.get().await?))
}

async fn render_metrics(State(state): State<ApiState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
