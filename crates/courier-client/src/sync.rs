use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_types::api::MessagePage;
use courier_types::models::{Message, MessageId};

use crate::connection::{ConnectionManager, ConnectionState, Push, PushSubscription};
use crate::error::ClientError;

/// Where a [`SyncClient`] pulls history pages from.
pub trait HistorySource: Send + Sync + 'static {
    fn fetch_page(
        &self,
        channel_id: Uuid,
        cursor: Option<MessageId>,
    ) -> impl Future<Output = Result<MessagePage, ClientError>> + Send;
}

/// A channel's locally known messages, unique by id and kept in id order.
#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: BTreeMap<MessageId, Message>,
    reached_start: bool,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `message` unless its id is already known.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.messages.contains_key(&message.id) {
            return false;
        }
        self.messages.insert(message.id, message);
        true
    }

    /// Insert every unknown message; returns how many were new.
    pub fn merge(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages
            .into_iter()
            .map(|m| self.insert(m))
            .filter(|&added| added)
            .count()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.contains_key(&id)
    }

    pub fn newest_id(&self) -> Option<MessageId> {
        self.messages.keys().next_back().copied()
    }

    pub fn oldest_id(&self) -> Option<MessageId> {
        self.messages.keys().next().copied()
    }

    pub fn newest_first(&self) -> Vec<Message> {
        self.messages.values().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the channel's first message is in the log.
    pub fn reached_start(&self) -> bool {
        self.reached_start
    }

    pub fn mark_start_reached(&mut self) {
        self.reached_start = true;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Re-fetch cadence while the connection is down.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

struct SyncState {
    log: MessageLog,
    /// Newest id up to which the log is known to hold every message.
    /// Set from fetched pages only.
    synced: Option<MessageId>,
}

struct Inner<S> {
    channel_id: Uuid,
    source: Arc<S>,
    config: SyncConfig,
    state: Mutex<SyncState>,
    generation: watch::Sender<u64>,
}

/// Keeps one channel's [`MessageLog`] current.
///
/// While the connection manager reports `Connected`, pushed messages are
/// merged as they arrive. While it does not, the newest page is re-fetched
/// every `poll_interval`. A reconcile follows cursors back to the last id
/// confirmed by a fetched page, so the log never has holes. One runs on
/// every poll and every return to `Connected`. It also runs when the
/// server acknowledges the channel's subscription, which covers anything
/// created before pushes started flowing, and whenever pushes were dropped.
///
/// Dropping the client ends its push subscription and its poll timer.
pub struct SyncClient<S: HistorySource> {
    inner: Arc<Inner<S>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<S: HistorySource> SyncClient<S> {
    /// Subscribe to pushes for `channel_id`, load its newest page, and start
    /// tracking it. The push subscription is taken before the first fetch
    /// so nothing created in between is missed.
    pub async fn start(
        channel_id: Uuid,
        source: Arc<S>,
        connection: &ConnectionManager,
        config: SyncConfig,
    ) -> Result<Self, ClientError> {
        let pushes = connection.subscribe(channel_id);
        let state = connection.watch_state();

        let (generation, _) = watch::channel(0);
        let inner = Arc::new(Inner {
            channel_id,
            source,
            config,
            state: Mutex::new(SyncState {
                log: MessageLog::new(),
                synced: None,
            }),
            generation,
        });

        inner.reconcile().await?;
        info!(
            "Loaded {} messages for channel {}",
            inner.lock().log.len(),
            channel_id
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(inner.clone().drive(pushes, state, cancel.clone()));

        Ok(Self {
            inner,
            cancel,
            task,
        })
    }

    pub fn channel_id(&self) -> Uuid {
        self.inner.channel_id
    }

    /// The log, newest message first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().log.newest_first()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().log.is_empty()
    }

    /// Whether older history remains to be loaded.
    pub fn has_more(&self) -> bool {
        !self.inner.lock().log.reached_start()
    }

    /// Bumped every time the log gains messages.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    /// Fetch the page just older than the oldest known message.
    /// Returns how many messages were added.
    pub async fn load_older(&self) -> Result<usize, ClientError> {
        let oldest = {
            let state = self.inner.lock();
            if state.log.reached_start() {
                return Ok(0);
            }
            state.log.oldest_id()
        };

        let page = self.inner.source.fetch_page(self.inner.channel_id, oldest).await?;

        let added = {
            let mut state = self.inner.lock();
            let added = state.log.merge(page.items);
            if page.next_cursor.is_none() {
                state.log.mark_start_reached();
            }
            added
        };
        self.inner.notify(added);
        Ok(added)
    }

    /// Pull everything newer than the last synced point right now.
    pub async fn refresh(&self) -> Result<usize, ClientError> {
        self.inner.reconcile().await
    }

    /// Stop tracking the channel. Equivalent to dropping the client.
    pub fn close(self) {}
}

impl<S: HistorySource> Drop for SyncClient<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
        debug!("Stopped syncing channel {}", self.inner.channel_id);
    }
}

/// Why a mode loop returned.
enum Mode {
    Cancelled,
    Changed,
    ManagerGone,
}

impl<S: HistorySource> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, added: usize) {
        if added > 0 {
            self.generation.send_modify(|g| *g += 1);
        }
    }

    /// Fetch from the newest page backwards until a page reaches the synced
    /// point (or history ends), then merge everything at once.
    async fn reconcile(&self) -> Result<usize, ClientError> {
        let (synced, complete) = {
            let state = self.lock();
            (state.synced, state.log.reached_start())
        };

        let mut fetched: Vec<Message> = Vec::new();
        let mut cursor = None;
        let mut hit_end = false;
        loop {
            let page = self.source.fetch_page(self.channel_id, cursor).await?;
            let overlaps = match synced {
                Some(synced) => page.items.iter().any(|m| m.id <= synced),
                // never synced: one page is the whole initial view, unless
                // the log already holds all of history
                None => !complete,
            };
            fetched.extend(page.items);

            match page.next_cursor {
                None => {
                    hit_end = true;
                    break;
                }
                Some(_) if overlaps => break,
                Some(next) => cursor = Some(next),
            }
        }

        let newest = fetched.iter().map(|m| m.id).max();
        let added = {
            let mut state = self.lock();
            let added = state.log.merge(fetched);
            if hit_end {
                state.log.mark_start_reached();
            }
            state.synced = state.synced.max(newest);
            added
        };

        if added > 0 {
            debug!("Reconciled {} new messages into {}", added, self.channel_id);
        }
        self.notify(added);
        Ok(added)
    }

    async fn reconcile_logged(&self) {
        if let Err(e) = self.reconcile().await {
            warn!("Sync of channel {} failed: {}", self.channel_id, e);
        }
    }

    /// Merge a pushed message. Pushes may arrive out of id order or not at
    /// all, so they never move `synced`; only fetched pages do.
    fn accept_push(&self, message: Message) {
        let added = self.lock().log.insert(message);
        self.notify(usize::from(added));
    }

    async fn drive(
        self: Arc<Self>,
        mut pushes: PushSubscription,
        mut state: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) {
        let mut manager_alive = true;
        loop {
            let connected = manager_alive && state.borrow_and_update().is_connected();
            let mode = if connected {
                self.live(&mut pushes, &mut state, &cancel).await
            } else {
                self.degraded(&mut state, manager_alive, &cancel).await
            };

            match mode {
                Mode::Cancelled => return,
                Mode::Changed => {}
                Mode::ManagerGone => {
                    if manager_alive {
                        warn!("Connection manager gone, polling {} only", self.channel_id);
                    }
                    manager_alive = false;
                }
            }
        }
    }

    async fn live(
        &self,
        pushes: &mut PushSubscription,
        state: &mut watch::Receiver<ConnectionState>,
        cancel: &CancellationToken,
    ) -> Mode {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Mode::Cancelled,
                changed = state.changed() => {
                    if changed.is_err() {
                        return Mode::ManagerGone;
                    }
                    if !state.borrow_and_update().is_connected() {
                        return Mode::Changed;
                    }
                    // dropped and came back before we looked
                    self.reconcile_logged().await;
                }
                push = pushes.recv() => match push {
                    Push::Message(message) => self.accept_push(message),
                    Push::Subscribed => {
                        debug!("Pushes for {} confirmed, catching up", self.channel_id);
                        self.reconcile_logged().await;
                    }
                    Push::Lagged(n) => {
                        warn!("Missed {} pushes on {}, reconciling", n, self.channel_id);
                        self.reconcile_logged().await;
                    }
                    Push::Closed => return Mode::ManagerGone,
                },
            }
        }
    }

    async fn degraded(
        &self,
        state: &mut watch::Receiver<ConnectionState>,
        manager_alive: bool,
        cancel: &CancellationToken,
    ) -> Mode {
        let interval = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Mode::Cancelled,
                changed = state.changed(), if manager_alive => {
                    if changed.is_err() {
                        return Mode::ManagerGone;
                    }
                    if state.borrow_and_update().is_connected() {
                        self.reconcile_logged().await;
                        return Mode::Changed;
                    }
                }
                _ = ticker.tick() => self.reconcile_logged().await,
            }
        }
    }
}
