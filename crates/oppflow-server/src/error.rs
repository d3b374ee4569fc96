use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use oppflow_core::error::OppflowError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(OppflowError::InvalidInput(msg.into()).into())
    }
}

fn status_for(err: &OppflowError) -> StatusCode {
    match err {
        OppflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        OppflowError::NotInitialized
        | OppflowError::Validation(_)
        | OppflowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OppflowError::Sequence { .. }
        | OppflowError::NotSkippable(_)
        | OppflowError::IncompleteDeliverables { .. }
        | OppflowError::State(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OppflowError::Conflict(_) => StatusCode::CONFLICT,
        OppflowError::Storage(_)
        | OppflowError::Io(_)
        | OppflowError::Yaml(_)
        | OppflowError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({ "error": self.0.to_string() });
        let status = match self.0.downcast_ref::<OppflowError>() {
            Some(e) => {
                // Rule violations carry the items a client needs to fix.
                match e {
                    OppflowError::Sequence { blocking, .. } => {
                        body["blocking"] = serde_json::json!(blocking);
                    }
                    OppflowError::IncompleteDeliverables { missing, .. } => {
                        body["missing"] = serde_json::json!(missing);
                    }
                    _ => {}
                }
                status_for(e)
            }
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn status(err: OppflowError) -> StatusCode {
        AppError(err.into()).into_response().status()
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            status(OppflowError::not_found("stage", "abc")),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn bad_input_maps_to_400() {
        assert_eq!(status(OppflowError::NotInitialized), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(OppflowError::Validation("order 0".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::bad_request("nope").into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn rule_violations_map_to_422() {
        assert_eq!(
            status(OppflowError::NotSkippable("Qualify".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(OppflowError::State("closed".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn conflict_maps_to_409() {
        assert_eq!(
            status(OppflowError::Conflict("stale".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn storage_and_foreign_errors_map_to_500() {
        assert_eq!(
            status(OppflowError::Storage("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn missing_deliverables_listed_in_body() {
        let err = AppError(
            OppflowError::IncompleteDeliverables {
                stage: "Qualify".into(),
                missing: vec!["document 'NDA' not provided".into()],
            }
            .into(),
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["missing"][0], "document 'NDA' not provided");
    }
}
