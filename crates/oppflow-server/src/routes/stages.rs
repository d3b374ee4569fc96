use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use oppflow_core::ledger::{MissingDeliverable, NewAction, StageAction};
use oppflow_core::risk::RiskAssessment;
use oppflow_core::stage::StageInstance;
use oppflow_core::TransitionRequest;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/opportunities/:id/stages
pub async fn list_stages(
    State(app): State<AppState>,
    Path(opportunity_id): Path<Uuid>,
) -> Result<Json<Vec<StageInstance>>, AppError> {
    Ok(Json(app.call(move |e| e.list_stages(opportunity_id)).await?))
}

/// GET /api/stages/:id
pub async fn get_stage(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StageInstance>, AppError> {
    Ok(Json(app.call(move |e| e.stage(id)).await?))
}

/// POST /api/stages/:id/transition: move a stage to `target`.
pub async fn transition_stage(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<StageInstance>, AppError> {
    Ok(Json(app.call(move |e| e.transition(id, body)).await?))
}

#[derive(Deserialize)]
pub struct ValidateBody {
    pub validator: String,
}

/// POST /api/stages/:id/validate: countersign a stage awaiting validation.
pub async fn validate_stage(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ValidateBody>,
) -> Result<Json<StageInstance>, AppError> {
    Ok(Json(
        app.call(move |e| e.validate_stage(id, &body.validator))
            .await?,
    ))
}

/// GET /api/stages/:id/risk: fresh assessment, never the cached one.
pub async fn get_risk(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RiskAssessment>, AppError> {
    Ok(Json(app.call(move |e| e.evaluate_stage(id)).await?))
}

/// GET /api/stages/:id/deliverables: what still blocks completion.
pub async fn get_deliverables(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MissingDeliverable>>, AppError> {
    Ok(Json(app.call(move |e| e.missing_deliverables(id)).await?))
}

/// GET /api/stages/:id/actions
pub async fn list_actions(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StageAction>>, AppError> {
    Ok(Json(app.call(move |e| e.list_actions(id)).await?))
}

/// POST /api/stages/:id/actions: append to the stage's action ledger.
pub async fn log_action(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<NewAction>,
) -> Result<(StatusCode, Json<StageAction>), AppError> {
    let action = app.call(move |e| e.log_action(id, body)).await?;
    Ok((StatusCode::CREATED, Json(action)))
}
