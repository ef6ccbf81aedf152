//! Event bus layer for the compute grid.
//!
//! Carries [`CanonicalEvent`]s between workers, clients and the dispatch
//! engine. Consumers code against the [`EventPublisher`] / [`EventSubscriber`]
//! traits; [`InMemoryBus`] and [`ZmqBus`] provide the transports.

pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod messages;
pub mod pubsub;
pub mod runner;
pub mod traits;
pub mod transport;

pub use config::BusConfig;
pub use error::BusError;
pub use event::{validate_event_type, CanonicalEvent, EventMetadata, Routing};
pub use memory::{InMemoryBus, MemorySubscriber};
pub use messages::topics;
pub use pubsub::{ZmqBus, ZmqPublisher, ZmqSubscriber};
pub use runner::{shutdown_signal, EventHandler, LoopReport, SubscriptionBuilder, SubscriptionLoop};
pub use traits::{EventBus, EventPublisher, EventSubscriber};
pub use transport::Transport;
pub use tokio_util::sync::CancellationToken;
