use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use courier_types::api::ErrorBody;

/// Request failures, grouped by what the caller can do about them.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No usable identity on the request.
    #[error("Unauthorized")]
    Unauthorized,

    /// Missing, or not visible to this caller; the two are
    /// indistinguishable.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Caller-fixable input problem.
    #[error("{0}")]
    BadRequest(String),

    /// Persistence or runtime failure; details stay in the server log.
    #[error("Internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Store error: {:#}", e);
        ApiError::Internal
    }
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })?
}
