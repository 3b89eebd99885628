use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use courier_types::api::{MessagePage, MessageQuery, SendMessageQuery, SendMessageRequest};
use courier_types::models::{MessageId, Profile};

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::extract::{ApiJson, ApiQuery};
use crate::ingress::{self, Submission};
use crate::pagination;

/// `GET /api/messages?channelId=<id>&cursor=<id>`
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    ApiQuery(query): ApiQuery<MessageQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let channel_id = query
        .channel_id
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Channel ID missing".into()))?;

    // An empty cursor is how some clients spell "no cursor"
    let cursor = query
        .cursor
        .filter(|c| !c.is_empty())
        .map(|c| c.parse::<MessageId>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // no channel can have a malformed id, so it has no visible messages
    let Ok(channel_id) = Uuid::parse_str(&channel_id) else {
        debug!("Unknown channel id '{}', returning empty page", channel_id);
        return Ok(Json(MessagePage::empty()));
    };

    let page = run_blocking(move || {
        Ok(pagination::fetch_page(&state.db, &profile, channel_id, cursor)?)
    })
    .await?;

    Ok(Json(page))
}

/// `POST /api/socket/messages?channelId=<id>&serverId=<id>`
pub async fn send_message(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    ApiQuery(query): ApiQuery<SendMessageQuery>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = query
        .server_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Server ID missing".into()))?;
    let channel_id = query
        .channel_id
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Channel ID missing".into()))?;

    // malformed ids name nothing, same as ids of missing rows
    let server_id = Uuid::parse_str(&server_id).map_err(|_| ApiError::NotFound("Channel"))?;
    let channel_id = Uuid::parse_str(&channel_id).map_err(|_| ApiError::NotFound("Channel"))?;

    let submission = Submission {
        server_id: Some(server_id),
        channel_id,
        content: req.content,
        file_url: req.file_url,
    };

    let message = run_blocking(move || {
        ingress::submit(&state.db, &state.fanout, &profile, submission)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
