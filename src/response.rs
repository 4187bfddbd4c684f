use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::ai_client::AiError;
use crate::services::audio::AudioError;
use crate::services::completion::CompletionError;
use crate::services::exercises::ExerciseError;
use crate::services::generation_guard::GenerationError;
use crate::services::lesson_pipeline::PipelineError;
use crate::services::live::LiveError;
use crate::services::runs::RunError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<SuccessResponse<T>> {
    Json(SuccessResponse {
        success: true,
        data,
    })
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    is_operational: bool,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unprocessable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::operational(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub fn service_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::operational(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            is_operational: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    fn operational(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            is_operational: true,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if !self.is_operational {
            tracing::error!(code = %self.code, error = %self.message, "request failed");
        }

        let message = if self.is_operational {
            self.message
        } else {
            "Internal server error".to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::internal(format!("database error: {err}"))
    }
}

impl From<AiError> for AppError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::NotConfigured(_) => AppError::service_unavailable(
                "AI_NOT_CONFIGURED",
                "No AI API key is configured; set AI_API_KEY and restart the service",
            ),
            AiError::Decode(e) => json_error(
                StatusCode::BAD_GATEWAY,
                "AI_BAD_RESPONSE",
                format!("AI response could not be decoded: {e}"),
            ),
            other => json_error(StatusCode::BAD_GATEWAY, "AI_UNAVAILABLE", other.to_string()),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::MissingCredential => AppError::from(AiError::NotConfigured("AI_API_KEY")),
            GenerationError::TimedOut { .. } => {
                json_error(StatusCode::GATEWAY_TIMEOUT, "GENERATION_TIMEOUT", err.to_string())
            }
            GenerationError::InProgress { .. } => {
                json_error(StatusCode::CONFLICT, "GENERATION_IN_PROGRESS", err.to_string())
            }
            GenerationError::Failed { .. } => {
                json_error(StatusCode::BAD_GATEWAY, "GENERATION_FAILED", err.to_string())
            }
            GenerationError::LessonNotFound(_) => AppError::not_found(err.to_string()),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::unprocessable("STAGE_REJECTED", err.to_string())
    }
}

impl From<ExerciseError> for AppError {
    fn from(err: ExerciseError) -> Self {
        AppError::unprocessable("EXERCISE_REJECTED", err.to_string())
    }
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Pipeline(e) => AppError::from(e),
            RunError::Exercise(e) => AppError::from(e),
        }
    }
}

impl From<AudioError> for AppError {
    fn from(err: AudioError) -> Self {
        AppError::validation(format!("invalid audio: {err}"))
    }
}

impl From<LiveError> for AppError {
    fn from(err: LiveError) -> Self {
        match err {
            LiveError::NotConfigured => AppError::from(AiError::NotConfigured("AI_API_KEY")),
            LiveError::Transition(_) | LiveError::NotStreaming(_) => {
                AppError::conflict(err.to_string())
            }
            other => json_error(StatusCode::BAD_GATEWAY, "LIVE_UNAVAILABLE", other.to_string()),
        }
    }
}

impl From<CompletionError> for AppError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::LessonNotFound(_) => AppError::not_found(err.to_string()),
            CompletionError::Database(e) => AppError::from(e),
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> AppError {
    AppError {
        status,
        code: code.into(),
        message: message.into(),
        is_operational: true,
    }
}
