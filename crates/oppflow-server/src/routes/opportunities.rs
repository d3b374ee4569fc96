use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use oppflow_core::opportunity::{NewOpportunity, Opportunity};
use oppflow_core::report::{PipelineStage, PipelineStats, TimelineEntry};
use oppflow_core::types::OpportunityStatus;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// GET /api/opportunities: list opportunities, optionally filtered by `?status=`.
pub async fn list_opportunities(
    State(app): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Opportunity>>, AppError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<OpportunityStatus>)
        .transpose()?;
    let list = app.call(move |e| e.list_opportunities(status)).await?;
    Ok(Json(list))
}

/// POST /api/opportunities: create an opportunity and its pipeline.
pub async fn create_opportunity(
    State(app): State<AppState>,
    Json(body): Json<NewOpportunity>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let (opp, stages) = app.call(move |e| e.create_opportunity(body)).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "opportunity": opp, "stages": stages })),
    ))
}

/// GET /api/opportunities/:id
pub async fn get_opportunity(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Opportunity>, AppError> {
    Ok(Json(app.call(move |e| e.opportunity(id)).await?))
}

/// DELETE /api/opportunities/:id: administrative cascade delete.
pub async fn delete_opportunity(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    app.call(move |e| e.delete_opportunity(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct CloseBody {
    pub status: OpportunityStatus,
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/opportunities/:id/close: close as WON or LOST.
pub async fn close_opportunity(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CloseBody>,
) -> Result<Json<Opportunity>, AppError> {
    let opp = app
        .call(move |e| e.close_opportunity(id, body.status, &body.actor, body.reason))
        .await?;
    Ok(Json(opp))
}

/// GET /api/opportunities/:id/pipeline
pub async fn get_pipeline(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PipelineStage>>, AppError> {
    Ok(Json(app.call(move |e| e.list_pipeline(id)).await?))
}

/// GET /api/opportunities/:id/stats
pub async fn get_stats(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PipelineStats>, AppError> {
    Ok(Json(app.call(move |e| e.pipeline_stats(id)).await?))
}

/// GET /api/opportunities/:id/history
pub async fn get_history(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TimelineEntry>>, AppError> {
    Ok(Json(app.call(move |e| e.history(id)).await?))
}
