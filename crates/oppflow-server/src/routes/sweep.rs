use axum::extract::State;
use axum::Json;
use oppflow_core::sweep::SweepReport;

use crate::error::AppError;
use crate::state::AppState;

/// POST /api/sweep: run one risk sweep now.
pub async fn run_sweep(State(app): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(app.call(|e| e.sweep(e.now())).await?))
}
