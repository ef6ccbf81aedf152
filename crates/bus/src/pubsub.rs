use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::error::BusError;
use crate::event::{validate_event_type, CanonicalEvent};
use crate::traits::{EventBus, EventPublisher, EventSubscriber};
use crate::transport::Transport;

/// ZeroMQ PUB socket publisher that connects to the broker's frontend.
///
/// Events are sent as two-frame ZMQ messages:
/// 1. Event type (used by SUB sockets for prefix filtering)
/// 2. MessagePack-encoded [`CanonicalEvent`] envelope
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
}

impl ZmqPublisher {
    /// Connect to the broker's frontend endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, BusError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting PUB socket to broker frontend");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Bind directly (no broker); subscribers connect to this endpoint.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, BusError> {
        let mut socket = PubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "binding PUB socket");
        socket.bind(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    async fn publish(&self, event: CanonicalEvent) -> Result<(), BusError> {
        validate_event_type(&event.event_type)?;
        let envelope_bytes = event.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(event.event_type.as_str());
        zmq_msg.push_back(envelope_bytes.into());

        let mut socket = self.socket.lock().await;
        socket.send(zmq_msg).await?;

        debug!(event_type = %event.event_type, id = %event.id, "published event");
        Ok(())
    }
}

/// ZeroMQ SUB socket subscriber that connects to the broker's backend.
pub struct ZmqSubscriber {
    socket: Mutex<SubSocket>,
}

impl ZmqSubscriber {
    /// Connect to the broker's backend endpoint (or directly to a bound publisher).
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, BusError> {
        let mut socket = SubSocket::new();
        let endpoint = transport.endpoint();
        info!(endpoint = %endpoint, "connecting SUB socket to broker backend");
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl EventSubscriber for ZmqSubscriber {
    /// An empty prefix subscribes to everything.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), BusError> {
        let mut socket = self.socket.lock().await;
        socket.subscribe(topic_prefix).await?;
        info!(topic_prefix = %topic_prefix, "subscribed to topic prefix");
        Ok(())
    }

    async fn recv(&self) -> Result<CanonicalEvent, BusError> {
        let mut socket = self.socket.lock().await;
        let zmq_msg = socket.recv().await?;

        // Our publisher always sends [type, envelope]; tolerate a bare envelope too.
        let frames: Vec<_> = zmq_msg.iter().collect();
        let envelope_bytes: &[u8] = match frames.as_slice() {
            [_, envelope, ..] => envelope.as_ref(),
            [envelope] => envelope.as_ref(),
            [] => return Err(BusError::Transport("empty ZMQ message".into())),
        };
        let event = CanonicalEvent::from_bytes(envelope_bytes)?;
        debug!(event_type = %event.event_type, id = %event.id, "received event");
        Ok(event)
    }
}

/// Bus backed by an external ZeroMQ broker.
///
/// One PUB socket is shared by every publisher handle; each subscription
/// stream gets its own SUB socket on the broker backend.
pub struct ZmqBus {
    publisher: Arc<ZmqPublisher>,
    backend: Transport,
}

impl ZmqBus {
    pub async fn connect(frontend: &Transport, backend: &Transport) -> Result<Self, BusError> {
        Ok(Self {
            publisher: Arc::new(ZmqPublisher::connect(frontend).await?),
            backend: backend.clone(),
        })
    }
}

#[async_trait]
impl EventBus for ZmqBus {
    fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    async fn subscriber(&self) -> Result<Box<dyn EventSubscriber>, BusError> {
        Ok(Box::new(ZmqSubscriber::connect(&self.backend).await?))
    }
}
