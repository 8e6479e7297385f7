//! User-facing errors.
//!
//! Every failure a user action can hit ends up here as one readable message.
//! The underlying cause stays attached as the error source for logging.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::services::extractor::ExtractError;
use crate::services::llm::LlmError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to read PDF")]
    Extraction(#[source] ExtractError),

    #[error("Could not identify chapters. Try a different book.")]
    NoChapters,

    #[error("Failed to identify chapters")]
    Identification(#[source] LlmError),

    #[error("Not enough content to analyze this chapter")]
    InsufficientContent,

    #[error("Failed to generate analysis")]
    Analysis(#[source] LlmError),

    #[error("Could not generate speech")]
    Speech(#[source] LlmError),

    #[error("Could not encode speech audio")]
    AudioEncoding(#[source] hound::Error),

    #[error("Failed to generate slide")]
    Slide(#[source] LlmError),

    #[error("Sign in required")]
    Unauthenticated,

    #[error("Access denied")]
    AccessDenied(#[from] AuthError),

    #[error("Book not found")]
    SessionNotFound,

    #[error("Chapter not found")]
    ChapterNotFound,

    #[error("No book is open")]
    NoActiveSession,

    #[error("A newer request replaced this one")]
    Superseded,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn identification(err: LlmError) -> Self {
        match err {
            LlmError::NoChapters => AppError::NoChapters,
            other => AppError::Identification(other),
        }
    }

    pub fn analysis(err: LlmError) -> Self {
        match err {
            LlmError::InsufficientContent => AppError::InsufficientContent,
            other => AppError::Analysis(other),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Extraction(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NoChapters | AppError::InsufficientContent => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Identification(_)
            | AppError::Analysis(_)
            | AppError::Speech(_)
            | AppError::Slide(_) => StatusCode::BAD_GATEWAY,
            AppError::AudioEncoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::SessionNotFound | AppError::ChapterNotFound | AppError::NoActiveSession => {
                StatusCode::NOT_FOUND
            }
            AppError::Superseded => StatusCode::CONFLICT,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match std::error::Error::source(&self) {
            Some(cause) => tracing::warn!(error = %self, cause = %cause, "request failed"),
            None => tracing::debug!(error = %self, "request rejected"),
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}
