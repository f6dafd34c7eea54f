use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm_client::LlmError;

/// Body returned when the model's structured output cannot be parsed.
pub const INVALID_AI_JSON_MESSAGE: &str = "Invalid JSON response from AI.";

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
/// Every variant renders as `{"error": "<message>"}`; internal details are logged only.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upload exceeds the configured size limit")]
    PayloadTooLarge,

    #[error("File upload failed: {0}")]
    UploadFailed(String),

    #[error("{0}")]
    Extraction(String),

    #[error("Invalid JSON response from AI.")]
    InvalidAiResponse,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            AppError::UploadFailed(detail) => {
                tracing::error!("Upload failed: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Extraction(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::InvalidAiResponse => {
                tracing::warn!("Completion output was not valid proposal JSON");
                (StatusCode::BAD_GATEWAY, INVALID_AI_JSON_MESSAGE.to_string())
            }
            AppError::Llm(LlmError::Timeout { secs }) => {
                tracing::error!("LLM timeout after {secs}s");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "AI service timed out.".to_string(),
                )
            }
            AppError::Llm(e) => {
                tracing::error!("LLM error: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    "AI service request failed.".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
