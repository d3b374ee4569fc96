use axum::extract::{Path, State};
use axum::Json;
use oppflow_core::risk::RiskThresholds;
use oppflow_core::template::OpportunityType;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/types: every opportunity type, active or not.
pub async fn list_types(State(app): State<AppState>) -> Json<Vec<OpportunityType>> {
    Json(app.engine.templates().list_types().to_vec())
}

/// GET /api/types/:id
pub async fn get_type(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OpportunityType>, AppError> {
    let ty = app.engine.templates().get_type(&id)?;
    Ok(Json(ty.clone()))
}

/// GET /api/risk: thresholds resolved from the active risk parameters.
pub async fn get_thresholds(State(app): State<AppState>) -> Json<RiskThresholds> {
    Json(*app.engine.thresholds())
}
