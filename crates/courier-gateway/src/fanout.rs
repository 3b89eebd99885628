use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures_util::Stream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use courier_types::models::Message;

/// Per-topic buffer. A subscriber that falls further behind than this
/// skips ahead; history is recovered through pagination, never replay.
const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("fanout is shut down")]
    Closed,
}

/// In-process publish/subscribe bus keyed by topic.
///
/// Holds no message state of its own: a publish reaches whoever is
/// subscribed at that instant and is otherwise dropped.
#[derive(Clone)]
pub struct Fanout {
    inner: Arc<FanoutInner>,
}

struct FanoutInner {
    /// topic -> sender; an entry exists only while it has subscribers
    topics: RwLock<HashMap<String, broadcast::Sender<Message>>>,
    closed: AtomicBool,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FanoutInner {
                topics: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver `message` to the current subscribers of `topic`.
    /// Returns how many subscribers it reached.
    pub fn publish(&self, topic: &str, message: &Message) -> Result<usize, FanoutError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FanoutError::Closed);
        }

        let topics = self.inner.topics.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = topics.get(topic) else {
            debug!("No subscribers on {}, dropping message {}", topic, message.id);
            return Ok(0);
        };

        Ok(tx.send(message.clone()).unwrap_or(0))
    }

    /// Attach to `topic`. The subscription ends when it is dropped or the
    /// bus shuts down.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        if self.inner.closed.load(Ordering::Acquire) {
            return Subscription::ended(topic);
        }

        let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
        // shutdown clears the map under this lock; check again so nothing
        // re-creates a topic after it ran
        if self.inner.closed.load(Ordering::Acquire) {
            return Subscription::ended(topic);
        }
        let rx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        Subscription {
            topic: topic.to_string(),
            rx: Some(rx),
            fanout: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.inner.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    /// Close every topic. Live subscriptions drain what they already
    /// received and then end; later publishes fail with `Closed`.
    pub fn shutdown(&self) {
        let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
        self.inner.closed.store(true, Ordering::Release);
        topics.clear();
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

/// A live attachment to one topic.
pub struct Subscription {
    topic: String,
    rx: Option<broadcast::Receiver<Message>>,
    fanout: Weak<FanoutInner>,
}

/// What a [`Subscription`] yields.
#[derive(Debug, Clone)]
pub enum Delivery {
    Message(Message),
    /// This many messages were skipped because the subscriber fell behind.
    Lagged(u64),
}

impl Subscription {
    fn ended(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            rx: None,
            fanout: Weak::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next delivery on the topic, or `None` once the subscription is over.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let received = self.rx.as_mut()?.recv().await;
        match received {
            Ok(message) => Some(Delivery::Message(message)),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Subscriber on {} lagged by {} messages", self.topic, n);
                Some(Delivery::Lagged(n))
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.rx = None;
                None
            }
        }
    }

    pub fn into_stream(mut self) -> impl Stream<Item = Delivery> + Send {
        async_stream::stream! {
            while let Some(delivery) = self.recv().await {
                yield delivery;
            }
        }
    }

    /// Explicit form of dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(rx) = self.rx.take() else {
            return;
        };
        drop(rx);

        let Some(inner) = self.fanout.upgrade() else {
            return;
        };
        let mut topics = inner.topics.write().unwrap_or_else(PoisonError::into_inner);
        if topics.get(&self.topic).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(&self.topic);
            debug!("Topic {} has no subscribers left", self.topic);
        }
    }
}
