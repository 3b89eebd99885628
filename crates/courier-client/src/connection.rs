//! Session-scoped ownership of the push link.
//!
//! A [`ConnectionManager`] is created by the session that needs it and
//! handed to whatever depends on it; there is no process-wide instance.
//! The physical link is driven by a [`Transport`], which owns connecting,
//! reconnecting, and backoff. The manager only mirrors the transport's
//! reported state and fans pushed messages out to channel subscriptions.
//!
//! ```text
//!   ConnectionManager                TransportLink            Transport
//!   ┌──────────────────┐  commands  ┌─────────────────┐      ┌────────────┐
//!   │ subscribe()      │ ─────────▶ │ next_command()  │ ◀──▶ │ run()      │
//!   │ is_connected()   │ ◀───────── │ set_state()     │      │ reconnects │
//!   │ PushSubscription │ ◀───────── │ deliver()       │      └────────────┘
//!   │                  │            │ acknowledge()   │
//!   │                  │            │ report_lag()    │
//!   └──────────────────┘  watch +   └─────────────────┘
//!                         broadcast
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_types::events::GatewayCommand;
use courier_types::models::Message;

/// Buffered pushes per subscriber before it is told it lagged.
const PUSH_CAPACITY: usize = 256;

/// Connection lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// channel -> number of live `PushSubscription`s
type Interest = Arc<Mutex<HashMap<Uuid, usize>>>;

/// What the transport hands to subscriptions, tagged by channel.
#[derive(Debug, Clone)]
enum Relayed {
    Message(Message),
    Subscribed(Uuid),
    Lagged { channel_id: Uuid, missed: u64 },
}

impl Relayed {
    fn channel_id(&self) -> Uuid {
        match self {
            Self::Message(message) => message.channel_id,
            Self::Subscribed(channel_id) => *channel_id,
            Self::Lagged { channel_id, .. } => *channel_id,
        }
    }
}

/// Driver of the physical connection.
///
/// `run` is expected to loop for as long as the session lives: connect,
/// report progress through `link`, relay pushes, obey commands, and back
/// off and retry after failures. It is cancelled by dropping its future.
pub trait Transport: Send + 'static {
    fn run(self, link: TransportLink) -> impl Future<Output = ()> + Send;
}

/// The transport's side of a [`ConnectionManager`].
pub struct TransportLink {
    state: Arc<watch::Sender<ConnectionState>>,
    pushes: broadcast::Sender<Relayed>,
    commands: mpsc::UnboundedReceiver<GatewayCommand>,
    interest: Interest,
}

impl TransportLink {
    pub fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Connection {:?} -> {:?}", previous, state);
        }
    }

    /// Hand a pushed message to every subscription on its channel.
    pub fn deliver(&self, message: Message) {
        // No receivers just means no channel view is open right now
        let _ = self.pushes.send(Relayed::Message(message));
    }

    /// The server now relays these channels; their subscriptions should
    /// catch up on anything created before that point.
    pub fn acknowledge(&self, channel_ids: &[Uuid]) {
        for &channel_id in channel_ids {
            let _ = self.pushes.send(Relayed::Subscribed(channel_id));
        }
    }

    /// The server dropped `missed` pushes for `channel_id`.
    pub fn report_lag(&self, channel_id: Uuid, missed: u64) {
        let _ = self.pushes.send(Relayed::Lagged { channel_id, missed });
    }

    /// Next subscribe/unsubscribe request, or `None` once the manager is gone.
    pub async fn next_command(&mut self) -> Option<GatewayCommand> {
        self.commands.recv().await
    }

    /// Channels that currently have at least one subscription. A transport
    /// re-subscribes to these after every reconnect.
    pub fn active_channels(&self) -> Vec<Uuid> {
        self.interest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

/// Owns one transport for the lifetime of a session.
pub struct ConnectionManager {
    state: Arc<watch::Sender<ConnectionState>>,
    pushes: broadcast::Sender<Relayed>,
    commands: mpsc::UnboundedSender<GatewayCommand>,
    interest: Interest,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Start driving `transport`. Begins `Disconnected`; the transport
    /// reports every transition after that.
    pub fn start<T: Transport>(transport: T) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let state = Arc::new(state_tx);
        let (pushes, _) = broadcast::channel(PUSH_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let interest: Interest = Arc::default();
        let cancel = CancellationToken::new();

        let link = TransportLink {
            state: state.clone(),
            pushes: pushes.clone(),
            commands: command_rx,
            interest: interest.clone(),
        };

        let token = cancel.clone();
        let final_state = state.clone();
        let driver = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = transport.run(link) => {
                    warn!("Transport stopped on its own");
                }
            }
            final_state.send_replace(ConnectionState::Disconnected);
        });

        Self {
            state,
            pushes,
            commands,
            interest,
            cancel,
            driver,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Current connectivity, exactly as the transport last reported it.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receive pushes for `channel_id` until the returned handle is dropped.
    pub fn subscribe(&self, channel_id: Uuid) -> PushSubscription {
        let rx = self.pushes.subscribe();

        let first = {
            let mut interest = self.interest.lock().unwrap_or_else(PoisonError::into_inner);
            let count = interest.entry(channel_id).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            let _ = self.commands.send(GatewayCommand::Subscribe {
                channel_ids: vec![channel_id],
            });
        }

        PushSubscription {
            channel_id,
            rx,
            interest: self.interest.clone(),
            commands: self.commands.clone(),
        }
    }

    /// End the session's connection. Equivalent to dropping the manager.
    pub fn close(self) {}
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.driver.abort();
        self.state.send_replace(ConnectionState::Disconnected);
        info!("Connection manager closed");
    }
}

/// What a [`PushSubscription`] yields.
#[derive(Debug)]
pub enum Push {
    Message(Message),
    /// The server confirmed it relays this channel from now on.
    Subscribed,
    /// Pushes were dropped, here or on the server, because a consumer
    /// fell behind.
    Lagged(u64),
    /// The connection manager is gone; no more pushes will arrive.
    Closed,
}

/// Pushed messages for one channel.
pub struct PushSubscription {
    channel_id: Uuid,
    rx: broadcast::Receiver<Relayed>,
    interest: Interest,
    commands: mpsc::UnboundedSender<GatewayCommand>,
}

impl PushSubscription {
    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub async fn recv(&mut self) -> Push {
        loop {
            match self.rx.recv().await {
                Ok(relayed) if relayed.channel_id() != self.channel_id => continue,
                Ok(Relayed::Message(message)) => return Push::Message(message),
                Ok(Relayed::Subscribed(_)) => return Push::Subscribed,
                Ok(Relayed::Lagged { missed, .. }) => return Push::Lagged(missed),
                Err(broadcast::error::RecvError::Lagged(n)) => return Push::Lagged(n),
                Err(broadcast::error::RecvError::Closed) => return Push::Closed,
            }
        }
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        let last = {
            let mut interest = self.interest.lock().unwrap_or_else(PoisonError::into_inner);
            match interest.get_mut(&self.channel_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    interest.remove(&self.channel_id);
                    true
                }
                None => false,
            }
        };
        if last {
            let _ = self.commands.send(GatewayCommand::Unsubscribe {
                channel_ids: vec![self.channel_id],
            });
        }
    }
}
