use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;
use crate::event::CanonicalEvent;

/// Publishes events to every subscriber whose topic prefix matches the event type.
///
/// Delivery is at-least-once and unordered; publishers do not deduplicate.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Fails with [`BusError::InvalidEventType`] for malformed types.
    async fn publish(&self, event: CanonicalEvent) -> Result<(), BusError>;
}

/// Blanket implementation so `Arc<dyn EventPublisher>` can be used directly.
#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, event: CanonicalEvent) -> Result<(), BusError> {
        (**self).publish(event).await
    }
}

/// A stream of events matching one or more topic prefixes.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to events whose type starts with the given prefix.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), BusError>;

    /// Receive the next event. Blocks until one is available;
    /// returns [`BusError::Closed`] once the stream is exhausted.
    async fn recv(&self) -> Result<CanonicalEvent, BusError>;
}

/// Factory for publishers and independent subscription streams.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Shared publisher handle.
    fn publisher(&self) -> Arc<dyn EventPublisher>;

    /// Open a new subscription stream with no topics yet.
    async fn subscriber(&self) -> Result<Box<dyn EventSubscriber>, BusError>;
}
