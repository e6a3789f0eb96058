//! In-process pub/sub hub.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::TransportConfig;
use crate::errors::{Result, SyncError};
use crate::transport::{PeerChannel, Transport};
use crate::Message;

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct HubInner {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
    failing_topics: Mutex<HashSet<String>>,
    refuse_connections: AtomicBool,
    next_id: AtomicU64,
}

/// A shared in-memory broker. Every [`MemoryTransport`] created from the
/// same hub sees the same topics, so multiple peers can talk to each other
/// within one test.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport connected to this hub.
    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(MemoryTransport { hub: self.clone() })
    }

    /// Make subsequent `connect` calls fail, simulating an unreachable
    /// broker.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner
            .refuse_connections
            .store(refuse, Ordering::SeqCst);
    }

    /// Make subscriptions to `topic` fail, simulating a broker-side
    /// subscribe rejection.
    pub fn fail_topic(&self, topic: &str) {
        self.inner
            .failing_topics
            .lock()
            .unwrap()
            .insert(topic.to_string());
    }

    fn attach(&self, topic: &str) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, sender });
        (id, receiver)
    }

    fn detach(&self, topic: &str, id: u64) {
        let mut topics = self.inner.topics.lock().unwrap();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| s.id != id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    fn publish(&self, topic: &str, message: &Message) {
        let topics = self.inner.topics.lock().unwrap();
        if let Some(subscribers) = topics.get(topic) {
            for subscriber in subscribers {
                // A dropped receiver just means that peer went away.
                let _ = subscriber.sender.send(message.clone());
            }
        }
    }
}

/// [`Transport`] implementation backed by a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, config: &TransportConfig) -> Result<()> {
        if self.hub.inner.refuse_connections.load(Ordering::SeqCst) {
            return Err(SyncError::Connection(format!(
                "connection refused by {}:{}",
                config.hostname, config.port
            )));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _batch: bool) -> Result<Box<dyn PeerChannel>> {
        if self.hub.inner.failing_topics.lock().unwrap().contains(topic) {
            return Err(SyncError::Subscription(format!(
                "subscribe rejected for topic {topic}"
            )));
        }
        let (id, receiver) = self.hub.attach(topic);
        Ok(Box::new(MemoryChannel {
            topic: topic.to_string(),
            hub: self.hub.clone(),
            id,
            messages: Some(receiver),
        }))
    }
}

struct MemoryChannel {
    topic: String,
    hub: MemoryHub,
    id: u64,
    messages: Option<mpsc::UnboundedReceiver<Message>>,
}

#[async_trait]
impl PeerChannel for MemoryChannel {
    async fn publish(&self, message: &Message) -> Result<()> {
        self.hub.publish(&self.topic, message);
        Ok(())
    }

    fn watch(&mut self) -> mpsc::UnboundedReceiver<Message> {
        self.messages.take().unwrap_or_else(|| {
            // Already watched: hand out a stream that never yields.
            let (_sender, receiver) = mpsc::unbounded_channel();
            receiver
        })
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.hub.detach(&self.topic, self.id);
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.hub.detach(&self.topic, self.id);
    }
}
