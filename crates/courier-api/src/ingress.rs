use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_db::Database;
use courier_gateway::Fanout;
use courier_types::models::{ChannelKind, Message, Profile};
use courier_types::topic_for;

use crate::error::ApiError;

/// Upper bound on message length, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

/// A new message as submitted by its author.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Server the client believes the channel belongs to, when it says so.
    pub server_id: Option<Uuid>,
    pub channel_id: Uuid,
    pub content: String,
    pub file_url: Option<String>,
}

/// Validate, persist, and publish one message.
///
/// The store write is the commit point: once it succeeds the call succeeds,
/// whether or not anyone was listening on the channel's topic. Retries are
/// not deduplicated; each successful call creates exactly one row.
pub fn submit(
    db: &Database,
    fanout: &Fanout,
    author: &Profile,
    submission: Submission,
) -> Result<Message, ApiError> {
    let file_url = submission.file_url.filter(|url| !url.trim().is_empty());
    if submission.content.trim().is_empty() && file_url.is_none() {
        return Err(ApiError::BadRequest("Content missing".into()));
    }
    if submission.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Content longer than {} characters",
            MAX_CONTENT_CHARS
        )));
    }

    let (channel_row, member_row) = db
        .channel_access(&submission.channel_id.to_string(), &author.id.to_string())?
        .ok_or(ApiError::NotFound("Channel"))?;
    let channel = channel_row.into_channel().ok_or(ApiError::Internal)?;

    if submission.server_id.is_some_and(|sid| sid != channel.server_id) {
        return Err(ApiError::NotFound("Channel"));
    }
    if channel.kind != ChannelKind::Text {
        return Err(ApiError::BadRequest(format!(
            "Cannot post messages to a {} channel",
            channel.kind.as_str()
        )));
    }

    let message = db
        .insert_message(
            &channel.id.to_string(),
            &member_row.id,
            &submission.content,
            file_url.as_deref(),
        )?
        .into_message();

    info!(
        "Message {} stored in {} by {}",
        message.id, message.channel_id, author.id
    );

    publish(fanout, &message);
    Ok(message)
}

/// Best-effort live delivery. Failures are logged and swallowed: clients
/// that miss the push pick the message up from history.
fn publish(fanout: &Fanout, message: &Message) {
    let topic = topic_for(message.channel_id);
    match fanout.publish(&topic, message) {
        Ok(0) => debug!("No live subscribers for {}", topic),
        Ok(n) => debug!("Published {} to {} subscribers on {}", message.id, n, topic),
        Err(e) => warn!("Publish of {} to {} failed: {}", message.id, topic, e),
    }
}
