use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::auth::{AppState, resolve_current_user};
use crate::error::ApiError;

/// Resolve the caller from the Authorization header and stash their
/// `Profile` in the request extensions. Runs before any handler query.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    let profile = resolve_current_user(&state, &token)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(profile);
    Ok(next.run(req).await)
}
