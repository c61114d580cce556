//! Maps pipeline errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use foundry_core::PipelineError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    /// Body could not be parsed
    BadRequest(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Pipeline(err) => match err {
                PipelineError::InvalidRequirements { .. }
                | PipelineError::PreDeploymentValidation { .. } => StatusCode::BAD_REQUEST,
                PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
                PipelineError::InvalidTransition { .. } => StatusCode::CONFLICT,
                PipelineError::StageExecution { .. } => StatusCode::BAD_GATEWAY,
                PipelineError::StageTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            Self::BadRequest(message) => json!({ "error": "bad_request", "message": message }),
            Self::Pipeline(err) => {
                let message = err.to_string();
                match err {
                    PipelineError::InvalidRequirements { field, .. } => {
                        json!({ "error": "invalid_requirements", "message": message, "field": field })
                    }
                    PipelineError::NotFound { kind, id } => {
                        json!({ "error": "not_found", "message": message, "kind": kind, "id": id })
                    }
                    PipelineError::PreDeploymentValidation { issues, .. } => json!({
                        "error": "pre_deployment_validation",
                        "message": message,
                        "issues": issues,
                    }),
                    PipelineError::StageExecution { stage, request_id, .. } => json!({
                        "error": "stage_execution",
                        "message": message,
                        "stage": stage,
                        "request_id": request_id,
                    }),
                    PipelineError::StageTimeout { stage, request_id, .. } => json!({
                        "error": "stage_timeout",
                        "message": message,
                        "stage": stage,
                        "request_id": request_id,
                    }),
                    PipelineError::Cancelled { stage, request_id } => json!({
                        "error": "cancelled",
                        "message": message,
                        "stage": stage,
                        "request_id": request_id,
                    }),
                    PipelineError::InvalidTransition { request_id, status, .. } => json!({
                        "error": "invalid_transition",
                        "message": message,
                        "request_id": request_id,
                        "status": status,
                    }),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("{} {}", status, self.body()["message"]);
        }
        (status, Json(self.body())).into_response()
    }
}
