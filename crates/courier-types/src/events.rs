use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { profile_id: Uuid },

    /// A new message was persisted in a subscribed channel
    MessageCreate { topic: String, message: Message },

    /// The listed channels are now relayed; anything published from here
    /// on will be pushed. Sent once per `Subscribe`.
    Subscribed { channel_ids: Vec<Uuid> },

    /// `missed` pushes for the channel were dropped on the server side
    Lagged { channel_id: Uuid, missed: u64 },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving messages for these channels (additive).
    Subscribe { channel_ids: Vec<Uuid> },

    /// Stop receiving messages for these channels.
    Unsubscribe { channel_ids: Vec<Uuid> },
}
