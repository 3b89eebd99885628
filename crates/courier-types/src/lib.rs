pub mod api;
pub mod events;
pub mod models;

/// Number of messages served per history page.
pub const MESSAGE_BATCH: usize = 10;

/// Push topic carrying newly created messages for one channel.
pub fn topic_for(channel_id: uuid::Uuid) -> String {
    format!("channel:{}:messages", channel_id)
}
