use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use courier_db::Database;
use courier_gateway::Fanout;
use courier_types::api::Claims;
use courier_types::models::Profile;

use crate::error::{ApiError, run_blocking};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub fanout: Fanout,
    pub jwt_secret: String,
}

/// Map a bearer token to the caller's profile.
///
/// `Ok(None)` covers every flavor of "no usable identity": a token that
/// fails validation, or a subject with no profile yet.
pub async fn resolve_current_user(
    state: &AppState,
    token: &str,
) -> Result<Option<Profile>, ApiError> {
    let claims = match decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => data.claims,
        Err(e) => {
            debug!("Rejected bearer token: {}", e);
            return Ok(None);
        }
    };

    let db = state.db.clone();
    let row = run_blocking(move || Ok(db.get_profile_by_user_id(&claims.sub)?)).await?;
    Ok(row.map(|r| r.into_profile()))
}
