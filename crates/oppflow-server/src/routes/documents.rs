use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use oppflow_core::ledger::{NewDocument, StageDocument};
use oppflow_core::types::ValidationStatus;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/stages/:id/documents
pub async fn list_documents(
    State(app): State<AppState>,
    Path(stage_id): Path<Uuid>,
) -> Result<Json<Vec<StageDocument>>, AppError> {
    Ok(Json(app.call(move |e| e.list_documents(stage_id)).await?))
}

/// POST /api/stages/:id/documents: add an ad-hoc document.
pub async fn add_document(
    State(app): State<AppState>,
    Path(stage_id): Path<Uuid>,
    Json(body): Json<NewDocument>,
) -> Result<(StatusCode, Json<StageDocument>), AppError> {
    let doc = app.call(move |e| e.record_document(stage_id, body)).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// GET /api/documents/:id
pub async fn get_document(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StageDocument>, AppError> {
    Ok(Json(app.call(move |e| e.document(id)).await?))
}

#[derive(Deserialize)]
pub struct ProvideBody {
    pub actor: String,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// POST /api/documents/:id/provide
pub async fn provide_document(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ProvideBody>,
) -> Result<Json<StageDocument>, AppError> {
    Ok(Json(
        app.call(move |e| e.mark_provided(id, &body.actor, body.at))
            .await?,
    ))
}

#[derive(Deserialize)]
pub struct ReviewBody {
    pub actor: String,
    pub verdict: ValidationStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// POST /api/documents/:id/review: approve or reject a provided document.
pub async fn review_document(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<StageDocument>, AppError> {
    let doc = app
        .call(move |e| e.validate_document(id, &body.actor, body.verdict, body.reason, body.at))
        .await?;
    Ok(Json(doc))
}
