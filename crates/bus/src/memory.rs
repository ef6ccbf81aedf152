//! In-process event bus.
//!
//! Fans every published event out to all subscribers with a matching topic
//! prefix over unbounded channels. Used by tests and by single-process
//! deployments that embed the coordinator next to its clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::BusError;
use crate::event::{validate_event_type, CanonicalEvent};
use crate::traits::{EventBus, EventPublisher, EventSubscriber};

type Prefixes = Arc<RwLock<Vec<String>>>;

struct Slot {
    prefixes: Prefixes,
    tx: mpsc::UnboundedSender<CanonicalEvent>,
}

impl Slot {
    fn matches(&self, event_type: &str) -> bool {
        self.prefixes
            .read()
            .map(|p| p.iter().any(|prefix| event_type.starts_with(prefix.as_str())))
            .unwrap_or(false)
    }
}

#[derive(Default)]
struct Inner {
    slots: Mutex<Vec<Slot>>,
    closed: AtomicBool,
}

/// Cloneable handle to an in-process bus. All clones share the same subscribers.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new subscription stream.
    pub fn subscribe_stream(&self) -> MemorySubscriber {
        let (tx, rx) = mpsc::unbounded_channel();
        let prefixes: Prefixes = Arc::new(RwLock::new(Vec::new()));
        if !self.inner.closed.load(Ordering::SeqCst) {
            if let Ok(mut slots) = self.inner.slots.lock() {
                slots.push(Slot {
                    prefixes: prefixes.clone(),
                    tx,
                });
            }
        }
        MemorySubscriber {
            prefixes,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Close the bus: further publishes fail and every stream ends after draining.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Ok(mut slots) = self.inner.slots.lock() {
            slots.clear();
        }
    }

    /// Number of live subscription streams.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .map(|mut slots| {
                slots.retain(|s| !s.tx.is_closed());
                slots.len()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, event: CanonicalEvent) -> Result<(), BusError> {
        validate_event_type(&event.event_type)?;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let slots = self
            .inner
            .slots
            .lock()
            .map_err(|_| BusError::Transport("subscriber table poisoned".into()))?;
        let mut delivered = 0usize;
        for slot in slots.iter().filter(|s| s.matches(&event.event_type)) {
            if slot.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(event_type = %event.event_type, delivered, "published event");
        Ok(())
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    fn publisher(&self) -> Arc<dyn EventPublisher> {
        Arc::new(self.clone())
    }

    async fn subscriber(&self) -> Result<Box<dyn EventSubscriber>, BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(Box::new(self.subscribe_stream()))
    }
}

/// Receiving end of an [`InMemoryBus`] subscription.
pub struct MemorySubscriber {
    prefixes: Prefixes,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CanonicalEvent>>,
}

#[async_trait]
impl EventSubscriber for MemorySubscriber {
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), BusError> {
        let mut prefixes = self
            .prefixes
            .write()
            .map_err(|_| BusError::Transport("subscription table poisoned".into()))?;
        if !prefixes.iter().any(|p| p == topic_prefix) {
            prefixes.push(topic_prefix.to_string());
        }
        Ok(())
    }

    async fn recv(&self) -> Result<CanonicalEvent, BusError> {
        self.rx.lock().await.recv().await.ok_or(BusError::Closed)
    }
}
