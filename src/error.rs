use crate::llm::LlmError;
use crate::store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Rejections raised while checking client input, before any upstream work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No image file provided.")]
    MissingImage,

    #[error("No images provided.")]
    NoImages,

    #[error("Empty filename.")]
    EmptyFilename,

    #[error("Unsupported file type. Use PNG, JPG, WEBP, or GIF.")]
    UnsupportedExtension,

    #[error("Image too large. Maximum size is 20 MB.")]
    TooLarge,

    #[error("File content does not match a supported image format.")]
    ContentMismatch,

    #[error("No question provided.")]
    MissingQuestion,

    #[error("Invalid history: {0}")]
    MalformedHistory(String),

    #[error("Invalid form data: {0}")]
    MalformedForm(String),
}

#[derive(Error, Debug)]
pub enum FormaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unauthorized. Provide a valid X-Forma-Key header.")]
    Unauthorized,

    #[error("Rate limit exceeded. Try again in a minute.")]
    RateLimit,

    #[error("Upstream error: {0}")]
    Upstream(#[from] LlmError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FormaError>;

impl FormaError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FormaError::Validation(_) => StatusCode::BAD_REQUEST,
            FormaError::Unauthorized => StatusCode::UNAUTHORIZED,
            FormaError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            FormaError::Upstream(_) => StatusCode::BAD_GATEWAY,
            FormaError::Persistence(_) | FormaError::Config(_) | FormaError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for FormaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
