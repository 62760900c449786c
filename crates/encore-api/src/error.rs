use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures surfaced to request handlers.
///
/// Idempotent no-ops (already followed, not followed) are outcomes, not
/// errors, and dispatch never fails, so neither appears here.
#[derive(Debug, Error)]
pub enum SocialError {
    #[error("It`s you")]
    InvalidTarget,

    #[error("This user does not exist")]
    NotFound,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Already exists")]
    Conflict,

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl SocialError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidTarget | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SocialError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Persistence(e) => {
                error!("persistence failure: {:#}", e);
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "message": message }))).into_response()
    }
}
