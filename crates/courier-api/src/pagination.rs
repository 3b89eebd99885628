use anyhow::Result;
use uuid::Uuid;

use courier_db::Database;
use courier_types::MESSAGE_BATCH;
use courier_types::api::MessagePage;
use courier_types::models::{Message, MessageId, Profile};

/// Serve one newest-first page of `channel_id`'s history.
///
/// Without a cursor this is the newest `MESSAGE_BATCH` messages; with one,
/// the batch strictly older than it. A full page carries the id of its
/// oldest item as `next_cursor`; a short page marks the end of history.
///
/// Channels that do not exist and channels the viewer cannot see both come
/// back as an empty page.
pub fn fetch_page(
    db: &Database,
    viewer: &Profile,
    channel_id: Uuid,
    cursor: Option<MessageId>,
) -> Result<MessagePage> {
    let cid = channel_id.to_string();
    if db.channel_access(&cid, &viewer.id.to_string())?.is_none() {
        return Ok(MessagePage::empty());
    }

    let items: Vec<Message> = db
        .page_messages(&cid, cursor.map(|c| c.0), MESSAGE_BATCH)?
        .into_iter()
        .map(|row| row.into_message())
        .collect();

    let next_cursor = if items.len() == MESSAGE_BATCH {
        items.last().map(|m| m.id)
    } else {
        None
    };

    Ok(MessagePage { items, next_cursor })
}
