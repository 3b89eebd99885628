#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use courier_client::{ClientError, ConnectionState, HistorySource, Transport, TransportLink};
use courier_types::MESSAGE_BATCH;
use courier_types::api::MessagePage;
use courier_types::events::GatewayCommand;
use courier_types::models::{Member, MemberRole, MemberWithProfile, Message, MessageId, Profile};

pub fn message(id: i64, channel_id: Uuid) -> Message {
    let profile_id = Uuid::new_v4();
    let member_id = Uuid::new_v4();
    Message {
        id: MessageId(id),
        channel_id,
        member_id,
        content: format!("m{id}"),
        file_url: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        deleted: false,
        member: MemberWithProfile {
            member: Member {
                id: member_id,
                profile_id,
                server_id: Uuid::nil(),
                role: MemberRole::Guest,
            },
            profile: Profile {
                id: profile_id,
                user_id: "user_ada".into(),
                name: "Ada".into(),
                image_url: None,
            },
        },
    }
}

/// In-memory history with the server's paging rules.
#[derive(Default)]
pub struct FakeHistory {
    /// ascending by id
    messages: Mutex<Vec<Message>>,
    next_id: AtomicI64,
    pub fetches: AtomicUsize,
    pub failing: AtomicBool,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a new message and return it, as ingress would.
    pub fn create(&self, channel_id: Uuid) -> Message {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let msg = message(id, channel_id);
        self.messages.lock().unwrap().push(msg.clone());
        msg
    }

    pub fn create_many(&self, channel_id: Uuid, n: usize) -> Vec<Message> {
        (0..n).map(|_| self.create(channel_id)).collect()
    }

    pub fn ids_newest_first(&self, channel_id: Uuid) -> Vec<MessageId> {
        let messages = self.messages.lock().unwrap();
        messages
            .iter()
            .rev()
            .filter(|m| m.channel_id == channel_id)
            .map(|m| m.id)
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl HistorySource for FakeHistory {
    async fn fetch_page(
        &self,
        channel_id: Uuid,
        cursor: Option<MessageId>,
    ) -> Result<MessagePage, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let messages = self.messages.lock().unwrap();
        let items: Vec<Message> = messages
            .iter()
            .rev()
            .filter(|m| m.channel_id == channel_id)
            .filter(|m| cursor.is_none_or(|c| m.id < c))
            .take(MESSAGE_BATCH)
            .cloned()
            .collect();
        let next_cursor = if items.len() == MESSAGE_BATCH {
            items.last().map(|m| m.id)
        } else {
            None
        };
        Ok(MessagePage { items, next_cursor })
    }
}

pub enum Control {
    State(ConnectionState),
    Deliver(Message),
    Acknowledge(Vec<Uuid>),
    Lag(Uuid, u64),
}

/// Transport whose state and pushes are driven by the test.
pub struct ManualTransport {
    control: mpsc::UnboundedReceiver<Control>,
    seen: mpsc::UnboundedSender<GatewayCommand>,
}

pub struct TransportHandle {
    pub control: mpsc::UnboundedSender<Control>,
    pub commands: mpsc::UnboundedReceiver<GatewayCommand>,
}

impl TransportHandle {
    pub fn set_state(&self, state: ConnectionState) {
        self.control.send(Control::State(state)).unwrap();
    }

    pub fn push(&self, message: Message) {
        self.control.send(Control::Deliver(message)).unwrap();
    }

    /// Confirm a subscription, as the gateway's `Subscribed` event does.
    pub fn acknowledge(&self, channel_id: Uuid) {
        self.control
            .send(Control::Acknowledge(vec![channel_id]))
            .unwrap();
    }

    /// Report pushes dropped on the server side.
    pub fn lag(&self, channel_id: Uuid, missed: u64) {
        self.control.send(Control::Lag(channel_id, missed)).unwrap();
    }

    pub async fn next_command(&mut self) -> GatewayCommand {
        tokio::time::timeout(Duration::from_secs(2), self.commands.recv())
            .await
            .expect("no command within 2s")
            .expect("transport gone")
    }
}

pub fn manual_transport() -> (ManualTransport, TransportHandle) {
    let (control_tx, control) = mpsc::unbounded_channel();
    let (seen, commands) = mpsc::unbounded_channel();
    (
        ManualTransport { control, seen },
        TransportHandle {
            control: control_tx,
            commands,
        },
    )
}

impl Transport for ManualTransport {
    async fn run(mut self, mut link: TransportLink) {
        loop {
            tokio::select! {
                control = self.control.recv() => match control {
                    Some(Control::State(state)) => link.set_state(state),
                    Some(Control::Deliver(message)) => link.deliver(message),
                    Some(Control::Acknowledge(channel_ids)) => link.acknowledge(&channel_ids),
                    Some(Control::Lag(channel_id, missed)) => link.report_lag(channel_id, missed),
                    None => std::future::pending::<()>().await,
                },
                command = link.next_command() => match command {
                    Some(command) => {
                        let _ = self.seen.send(command);
                    }
                    None => return,
                },
            }
        }
    }
}

/// Wait for `state` to be reported, or panic after 2s.
pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached within 2s")
        .expect("manager gone");
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
