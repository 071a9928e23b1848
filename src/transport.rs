//! Transport abstraction and the in-process channel transport.
//!
//! A transporter moves already-serialized frames between nodes. Delivery
//! must preserve publish order per topic per subscriber; connection loss is
//! reported out-of-band by the concrete implementation (network transports
//! surface it through their client library; the in-process hub cannot lose
//! its link).
//!
//! [`ChannelTransporter`] connects brokers inside one process through a
//! shared [`ChannelHub`] of tokio mpsc channels. It exists for tests and for
//! embedding several brokers in one binary; network transports implement
//! the same trait out of crate.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Operation attempted before `connect` (or after `disconnect`).
    #[error("transport is not connected")]
    NotConnected,
    /// The underlying channel or connection went away.
    #[error("transport channel closed")]
    ChannelClosed,
}

#[async_trait]
pub trait Transporter: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Subscribe to `topic`. Frames arrive on the returned channel in
    /// publish order; the channel ends when the transport disconnects.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, TransportError>;

    /// Publish serialized bytes to every subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

const SUBSCRIPTION_BUFFER: usize = 64;

struct TopicSender {
    owner: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

/// Shared in-process message hub. Every [`ChannelTransporter`] created from
/// the same hub sees every publish.
#[derive(Default)]
pub struct ChannelHub {
    topics: Mutex<HashMap<String, Vec<TopicSender>>>,
    next_owner: AtomicU64,
}

impl ChannelHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, owner: u64, topic: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.lock()
            .entry(topic.to_string())
            .or_default()
            .push(TopicSender { owner, tx });
        rx
    }

    async fn broadcast(&self, topic: &str, payload: Vec<u8>) {
        let senders: Vec<mpsc::Sender<Vec<u8>>> = self
            .lock()
            .get(topic)
            .map(|subs| subs.iter().map(|s| s.tx.clone()).collect())
            .unwrap_or_default();
        for sender in senders {
            // a dropped receiver just means that node went away
            let _ = sender.send(payload.clone()).await;
        }
    }

    fn drop_owner(&self, owner: u64) {
        let mut topics = self.lock();
        for subs in topics.values_mut() {
            subs.retain(|s| s.owner != owner);
        }
        topics.retain(|_, subs| !subs.is_empty());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<TopicSender>>> {
        self.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One node's handle on a [`ChannelHub`].
pub struct ChannelTransporter {
    hub: Arc<ChannelHub>,
    owner: u64,
    connected: AtomicBool,
}

impl ChannelTransporter {
    pub fn new(hub: Arc<ChannelHub>) -> Self {
        let owner = hub.next_owner.fetch_add(1, Ordering::Relaxed) + 1;
        Self { hub, owner, connected: AtomicBool::new(false) }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transporter for ChannelTransporter {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::Release);
        tracing::debug!(owner = self.owner, "channel transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.hub.drop_owner(self.owner);
            tracing::debug!(owner = self.owner, "channel transport disconnected");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        self.ensure_connected()?;
        Ok(self.hub.register(self.owner, topic))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.hub.broadcast(topic, payload).await;
        Ok(())
    }
}
