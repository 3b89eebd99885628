use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageId};

// -- JWT Claims --

/// JWT claims issued by the external identity provider. The gateway and the
/// REST middleware both validate them against the shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity subject; matches `Profile::user_id`.
    pub sub: String,
    pub exp: usize,
}

// -- Messages --

/// Query string of `GET /api/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    /// Kept as text: an id that is not a UUID names no channel, which is
    /// an empty page rather than a rejected request.
    pub channel_id: Option<String>,
    pub cursor: Option<String>,
}

/// Query string of `POST /api/socket/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageQuery {
    pub channel_id: Option<String>,
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_url: Option<String>,
}

/// One reverse-chronological slice of a channel's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub items: Vec<Message>,
    pub next_cursor: Option<MessageId>,
}

impl MessagePage {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
