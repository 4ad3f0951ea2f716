//! Message transport between feeders and relayers

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, warn};

use oracle_core::Message;

use crate::{TransportError, TransportResult};

/// Publish/subscribe transport carrying encoded messages by topic
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str) -> TransportResult<()>;

    async fn unsubscribe(&self, topic: &str) -> TransportResult<()>;

    async fn broadcast(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()>;

    /// Next payload received on a subscribed topic.
    ///
    /// Must be cancel-safe: dropping the future must not lose a message.
    /// A pending call resolves to [`TransportError::Closed`] when the topic is
    /// unsubscribed or the transport is closed.
    async fn wait_for(&self, topic: &str) -> TransportResult<Vec<u8>>;

    async fn close(&self) -> TransportResult<()>;
}

/// Encode `message` and publish it on `topic`
pub async fn broadcast_message<M: Message>(
    transport: &dyn Transport,
    topic: &str,
    message: &M,
) -> crate::RelayResult<()> {
    let payload = message.marshal()?;
    transport.broadcast(topic, payload).await?;
    Ok(())
}

/// Shared in-process bus; every [`LocalTransport`] built from the same bus
/// sees every other handle's broadcasts
#[derive(Debug, Clone)]
pub struct LocalBus {
    topics: Arc<DashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One subscribed topic. Tripping `cancel` wakes every pending `wait_for`.
#[derive(Debug)]
struct Subscription {
    receiver: Arc<Mutex<broadcast::Receiver<Vec<u8>>>>,
    cancel: watch::Sender<bool>,
}

impl Subscription {
    fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// In-process transport handle
#[derive(Debug)]
pub struct LocalTransport {
    bus: LocalBus,
    subscriptions: DashMap<String, Subscription>,
    closed: AtomicBool,
}

impl LocalTransport {
    pub fn new(bus: LocalBus) -> Self {
        Self {
            bus,
            subscriptions: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn subscribe(&self, topic: &str) -> TransportResult<()> {
        self.ensure_open()?;
        self.subscriptions
            .entry(topic.to_string())
            .or_insert_with(|| Subscription {
                receiver: Arc::new(Mutex::new(self.bus.sender(topic).subscribe())),
                cancel: watch::channel(false).0,
            });
        debug!("Subscribed to {}", topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> TransportResult<()> {
        let Some((_, subscription)) = self.subscriptions.remove(topic) else {
            return Err(TransportError::NotSubscribed(topic.to_string()));
        };
        subscription.cancel();
        debug!("Unsubscribed from {}", topic);
        Ok(())
    }

    async fn broadcast(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()> {
        self.ensure_open()?;
        // No receivers is not an error for gossip
        if self.bus.sender(topic).send(payload).is_err() {
            debug!("No subscribers on {}", topic);
        }
        Ok(())
    }

    async fn wait_for(&self, topic: &str) -> TransportResult<Vec<u8>> {
        self.ensure_open()?;
        let (receiver, mut cancelled) = self
            .subscriptions
            .get(topic)
            .map(|entry| (Arc::clone(&entry.receiver), entry.cancel.subscribe()))
            .ok_or_else(|| TransportError::NotSubscribed(topic.to_string()))?;

        tokio::select! {
            biased;
            // Ok on cancel, Err once the subscription is dropped: both end the wait
            _ = cancelled.changed() => Err(TransportError::Closed),
            received = next_payload(&receiver, topic) => received,
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        for subscription in self.subscriptions.iter() {
            subscription.cancel();
        }
        self.subscriptions.clear();
        Ok(())
    }
}

async fn next_payload(
    receiver: &Mutex<broadcast::Receiver<Vec<u8>>>,
    topic: &str,
) -> TransportResult<Vec<u8>> {
    let mut receiver = receiver.lock().await;
    loop {
        match receiver.recv().await {
            Ok(payload) => return Ok(payload),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Subscriber on {} lagged, skipped {} messages", topic, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
        }
    }
}
