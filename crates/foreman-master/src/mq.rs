//! In-process message bus.
//!
//! Messages are routed by dotted keys such as `builds.12.finished`. A
//! consumer subscribes with a filter (`builds.*.finished`) and receives one
//! message per matching publish on its own bounded channel. Consumers are
//! released with [`Consumer::stop_consuming`] or by dropping them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// A routed message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub key: Vec<String>,
    pub data: serde_json::Value,
}

impl Message {
    pub fn routing_key(&self) -> String {
        self.key.join(".")
    }
}

/// Routing key filter; `*` matches any single part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter(Vec<Option<String>>);

impl Filter {
    pub fn new(parts: &[Option<&str>]) -> Self {
        Self(parts.iter().map(|p| p.map(str::to_string)).collect())
    }

    /// Parse a dotted pattern such as `builds.*.finished`.
    pub fn parse(pattern: &str) -> Self {
        Self(
            pattern
                .split('.')
                .map(|p| if p == "*" { None } else { Some(p.to_string()) })
                .collect(),
        )
    }

    pub fn matches(&self, key: &[String]) -> bool {
        self.0.len() == key.len()
            && self
                .0
                .iter()
                .zip(key)
                .all(|(want, got)| want.as_deref().map_or(true, |w| w == got))
    }
}

struct Subscription {
    filter: Filter,
    tx: mpsc::Sender<Message>,
}

struct BusInner {
    consumers: RwLock<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Cloneable handle to the bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus whose consumers buffer up to `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                consumers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Subscribe to every message matching `filter`.
    ///
    /// Every matching message is delivered, none are dropped. Once the
    /// consumer has `capacity` undelivered messages, `publish` for a matching
    /// key waits until it drains. A build publishes its `finished` event this
    /// way, so a consumer that stops reading stalls the end of every matching
    /// build. Drain promptly, or call [`Consumer::stop_consuming`].
    pub fn start_consuming(&self, filter: Filter) -> Consumer {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .consumers
            .write()
            .insert(id, Subscription { filter, tx });
        Consumer {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a message to every matching consumer.
    ///
    /// Waits while a matching consumer's buffer is full.
    pub async fn publish(&self, key: &[&str], data: serde_json::Value) {
        let key: Vec<String> = key.iter().map(|k| k.to_string()).collect();
        let targets: Vec<(u64, mpsc::Sender<Message>)> = self
            .inner
            .consumers
            .read()
            .iter()
            .filter(|(_, s)| s.filter.matches(&key))
            .map(|(id, s)| (*id, s.tx.clone()))
            .collect();

        let message = Message { key, data };
        for (id, tx) in targets {
            if tx.send(message.clone()).await.is_err() {
                // Receiver dropped without unsubscribing
                self.inner.consumers.write().remove(&id);
            }
        }
        debug!("Published {}", message.routing_key());
    }

    /// Number of active consumers.
    pub fn consumer_count(&self) -> usize {
        self.inner.consumers.read().len()
    }
}

/// Receiving end of a subscription.
pub struct Consumer {
    id: u64,
    rx: mpsc::Receiver<Message>,
    bus: std::sync::Weak<BusInner>,
}

impl Consumer {
    /// Next matching message; `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Unsubscribe. Messages already buffered are discarded.
    pub fn stop_consuming(self) {
        drop(self);
    }

    fn detach(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.consumers.write().remove(&self.id);
        }
        self.rx.close();
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.detach();
    }
}
