use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use courier_types::events::{GatewayCommand, GatewayEvent};

use crate::config::ClientConfig;
use crate::connection::{ConnectionState, Transport, TransportLink};
use crate::error::ClientError;

/// How long the gateway gets to answer `Identify` with `Ready`.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Transport`] over the server's WebSocket gateway.
///
/// Each session: connect, `Identify`, wait for `Ready`, re-subscribe to
/// every channel that still has interest, then relay gateway events until
/// the socket dies. Between sessions it backs off exponentially with jitter.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    token: String,
    reconnect_min: Duration,
    reconnect_max: Duration,
}

impl WsTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            url: config.gateway_url.clone(),
            token: config.token.clone(),
            reconnect_min: config.reconnect_min,
            reconnect_max: config.reconnect_max,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .reconnect_min
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.reconnect_max);
        let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
        base + Duration::from_millis(jitter_ms)
    }

    async fn session(&self, link: &mut TransportLink, attempt: &mut u32) -> Result<(), ClientError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut tx, mut rx) = stream.split();

        let identify = GatewayCommand::Identify {
            token: self.token.clone(),
        };
        tx.send(WsMessage::text(serde_json::to_string(&identify)?)).await?;

        tokio::time::timeout(READY_TIMEOUT, async {
            while let Some(frame) = rx.next().await {
                if let WsMessage::Text(text) = frame? {
                    if let Ok(GatewayEvent::Ready { profile_id }) = serde_json::from_str(&text) {
                        debug!("Gateway ready for profile {}", profile_id);
                        return Ok::<(), ClientError>(());
                    }
                }
            }
            Err(ClientError::Handshake("socket closed before Ready".into()))
        })
        .await
        .map_err(|_| ClientError::Handshake("timed out waiting for Ready".into()))??;

        let channels = link.active_channels();
        if !channels.is_empty() {
            let resubscribe = GatewayCommand::Subscribe {
                channel_ids: channels,
            };
            tx.send(WsMessage::text(serde_json::to_string(&resubscribe)?)).await?;
        }

        link.set_state(ConnectionState::Connected);
        *attempt = 0;
        info!("Connected to gateway at {}", self.url);

        loop {
            let step = tokio::select! {
                frame = rx.next() => Step::Frame(frame),
                command = link.next_command() => Step::Command(command),
            };

            match step {
                Step::Frame(None) | Step::Frame(Some(Ok(WsMessage::Close(_)))) => return Ok(()),
                Step::Frame(Some(Err(e))) => return Err(e.into()),
                Step::Frame(Some(Ok(WsMessage::Text(text)))) => {
                    match serde_json::from_str::<GatewayEvent>(&text) {
                        Ok(GatewayEvent::MessageCreate { message, .. }) => link.deliver(message),
                        Ok(GatewayEvent::Subscribed { channel_ids }) => {
                            debug!("Gateway relays {} channels", channel_ids.len());
                            link.acknowledge(&channel_ids);
                        }
                        Ok(GatewayEvent::Lagged { channel_id, missed }) => {
                            warn!("Gateway dropped {} pushes for {}", missed, channel_id);
                            link.report_lag(channel_id, missed);
                        }
                        Ok(GatewayEvent::Ready { .. }) => {}
                        Err(e) => warn!("Ignoring malformed gateway event: {}", e),
                    }
                }
                // tungstenite answers pings itself
                Step::Frame(Some(Ok(_))) => {}
                Step::Command(None) => {
                    let _ = tx.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
                Step::Command(Some(command)) => {
                    tx.send(WsMessage::text(serde_json::to_string(&command)?)).await?;
                }
            }
        }
    }
}

enum Step {
    Frame(Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>),
    Command(Option<GatewayCommand>),
}

impl Transport for WsTransport {
    async fn run(self, mut link: TransportLink) {
        let mut attempt: u32 = 0;
        loop {
            link.set_state(ConnectionState::Connecting);
            match self.session(&mut link, &mut attempt).await {
                Ok(()) => info!("Gateway connection closed"),
                Err(e) => warn!("Gateway connection failed: {}", e),
            }
            link.set_state(ConnectionState::Disconnected);

            let delay = self.backoff(attempt);
            attempt = attempt.saturating_add(1);
            debug!("Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut config = ClientConfig::new("http://x", "ws://x/gateway", "t");
        config.reconnect_min = Duration::from_millis(100);
        config.reconnect_max = Duration::from_secs(1);
        let transport = WsTransport::new(&config);

        let first = transport.backoff(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));

        let third = transport.backoff(2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));

        for attempt in [10, 40, u32::MAX] {
            let capped = transport.backoff(attempt);
            assert!(capped >= Duration::from_secs(1) && capped <= Duration::from_millis(1250));
        }
    }
}
