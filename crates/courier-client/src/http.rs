use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use courier_types::api::{MessagePage, SendMessageRequest};
use courier_types::models::{Message, MessageId};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::sync::HistorySource;

/// Unsent composer contents.
///
/// Submission borrows the draft, so a failed send leaves it intact for
/// the caller to retry or edit; only clear it after `Ok`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub content: String,
    pub file_url: Option<String>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            file_url: None,
        }
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.file_url = None;
    }
}

/// REST half of the client: history pages and message submission.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base: String,
    token: String,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            base: config.http_base.clone(),
            token: config.token.clone(),
        }
    }

    /// Submit `draft` to a channel. The returned message is also pushed to
    /// every subscriber of the channel, this client included.
    pub async fn send_message(
        &self,
        server_id: Uuid,
        channel_id: Uuid,
        draft: &Draft,
    ) -> Result<Message, ClientError> {
        let body = SendMessageRequest {
            content: draft.content.clone(),
            file_url: draft.file_url.clone(),
        };
        let resp = self
            .client
            .post(format!("{}/api/socket/messages", self.base))
            .bearer_auth(&self.token)
            .query(&[
                ("serverId", server_id.to_string()),
                ("channelId", channel_id.to_string()),
            ])
            .json(&body)
            .send()
            .await?;

        decode(resp).await
    }

    pub async fn get_messages(
        &self,
        channel_id: Uuid,
        cursor: Option<MessageId>,
    ) -> Result<MessagePage, ClientError> {
        let mut query = vec![("channelId", channel_id.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let resp = self
            .client
            .get(format!("{}/api/messages", self.base))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?;

        let page: MessagePage = decode(resp).await?;
        debug!(
            "Fetched {} messages from {} (cursor {:?})",
            page.items.len(),
            channel_id,
            cursor
        );
        Ok(page)
    }
}

impl HistorySource for HttpApi {
    async fn fetch_page(
        &self,
        channel_id: Uuid,
        cursor: Option<MessageId>,
    ) -> Result<MessagePage, ClientError> {
        self.get_messages(channel_id, cursor).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_survives_until_cleared() {
        let mut draft = Draft::text("hello");
        let copy = draft.clone();
        assert_eq!(draft, copy);

        draft.clear();
        assert_eq!(draft, Draft::default());
    }
}
