use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_db::Database;
use courier_types::api::Claims;
use courier_types::events::{GatewayCommand, GatewayEvent};
use courier_types::models::Profile;
use courier_types::topic_for;

use crate::fanout::{Delivery, Fanout};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a fresh socket gets to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Events queued for one socket. When a slow client lets this fill up,
/// pushes are dropped and the client is sent `Lagged` instead.
const OUTBOUND_CAPACITY: usize = 256;

type WsSender = futures_util::stream::SplitSink<WebSocket, Message>;
type WsReceiver = futures_util::stream::SplitStream<WebSocket>;

/// Topic forwarders owned by one connection. Dropping the set aborts every
/// forwarder, which in turn drops its fanout subscription.
#[derive(Default)]
struct Forwarders(HashMap<Uuid, JoinHandle<()>>);

impl Forwarders {
    fn stop(&mut self, channel_id: &Uuid) -> bool {
        match self.0.remove(channel_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        for (_, handle) in self.0.drain() {
            handle.abort();
        }
    }
}

/// Handle a single WebSocket connection: Identify handshake, then relay
/// fanout traffic for whichever channels the client subscribes to.
pub async fn handle_connection(
    socket: WebSocket,
    fanout: Fanout,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let profile = match wait_for_identify(&mut receiver, &db, &jwt_secret).await {
        Some(profile) => profile,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", profile.name, profile.id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        profile_id: profile.id,
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    run_connection_loop(sender, receiver, fanout, db, &profile).await;

    info!("{} ({}) disconnected from gateway", profile.name, profile.id);
}

async fn run_connection_loop(
    mut sender: WsSender,
    mut receiver: WsReceiver,
    fanout: Fanout,
    db: Arc<Database>,
    profile: &Profile,
) {
    let (event_tx, mut event_rx) = mpsc::channel::<GatewayEvent>(OUTBOUND_CAPACITY);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward relayed events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let profile_recv = profile.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut forwarders = Forwarders::default();

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&fanout, &db, &profile_recv, cmd, &mut forwarders, &event_tx)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            profile_recv.name,
                            profile_recv.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn send_event(sender: &mut WsSender, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn wait_for_identify(
    receiver: &mut WsReceiver,
    db: &Arc<Database>,
    jwt_secret: &str,
) -> Option<Profile> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let token = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return Some(token);
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten()?;

    let claims = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?
    .claims;

    let db = db.clone();
    let row = tokio::task::spawn_blocking(move || db.get_profile_by_user_id(&claims.sub))
        .await
        .ok()?
        .map_err(|e| warn!("Profile lookup failed during identify: {}", e))
        .ok()??;

    Some(row.into_profile())
}

async fn handle_command(
    fanout: &Fanout,
    db: &Arc<Database>,
    profile: &Profile,
    cmd: GatewayCommand,
    forwarders: &mut Forwarders,
    event_tx: &mpsc::Sender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { channel_ids } => {
            info!(
                "{} ({}) subscribing to {} channels",
                profile.name,
                profile.id,
                channel_ids.len()
            );
            let mut relayed = Vec::with_capacity(channel_ids.len());
            for channel_id in channel_ids {
                if !forwarders.0.contains_key(&channel_id) {
                    if !can_view(db, channel_id, profile.id).await {
                        debug!("{} may not view {}, ignoring subscribe", profile.id, channel_id);
                        continue;
                    }
                    let handle = spawn_forwarder(fanout, channel_id, event_tx.clone());
                    forwarders.0.insert(channel_id, handle);
                }
                relayed.push(channel_id);
            }

            // every forwarder above already holds its fanout subscription
            if !relayed.is_empty() {
                let ack = GatewayEvent::Subscribed {
                    channel_ids: relayed,
                };
                if event_tx.send(ack).await.is_err() {
                    debug!("{} went away before subscribe ack", profile.id);
                }
            }
        }

        GatewayCommand::Unsubscribe { channel_ids } => {
            for channel_id in channel_ids {
                if forwarders.stop(&channel_id) {
                    debug!("{} unsubscribed from {}", profile.id, channel_id);
                }
            }
        }
    }
}

/// Relay one channel's topic into the connection's outbound queue.
///
/// Pushes that do not fit in the queue, or that the fanout skipped, are
/// counted and reported to the client as one `Lagged` event once there is
/// room again. Messages arriving while a report is pending are counted
/// rather than queued.
fn spawn_forwarder(
    fanout: &Fanout,
    channel_id: Uuid,
    event_tx: mpsc::Sender<GatewayEvent>,
) -> JoinHandle<()> {
    let topic = topic_for(channel_id);
    let mut subscription = fanout.subscribe(&topic);
    tokio::spawn(async move {
        let mut missed: u64 = 0;
        loop {
            tokio::select! {
                permit = event_tx.reserve(), if missed > 0 => {
                    let Ok(permit) = permit else { break };
                    permit.send(GatewayEvent::Lagged { channel_id, missed });
                    missed = 0;
                }
                delivery = subscription.recv() => match delivery {
                    None => break,
                    Some(Delivery::Lagged(n)) => missed += n,
                    Some(Delivery::Message(_)) if missed > 0 => missed += 1,
                    Some(Delivery::Message(message)) => {
                        let event = GatewayEvent::MessageCreate {
                            topic: topic.clone(),
                            message,
                        };
                        match event_tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                warn!("Outbound queue full, dropping push on {}", topic);
                                missed = 1;
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    }
                },
            }
        }
    })
}

async fn can_view(db: &Arc<Database>, channel_id: Uuid, profile_id: Uuid) -> bool {
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || {
        db.channel_access(&channel_id.to_string(), &profile_id.to_string())
    })
    .await;

    match result {
        Ok(Ok(access)) => access.is_some(),
        Ok(Err(e)) => {
            warn!("Channel access lookup failed: {}", e);
            false
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            false
        }
    }
}
