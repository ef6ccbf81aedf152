use thiserror::Error;

/// Errors that can occur in the event bus layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid event type '{event_type}': {reason}")]
    InvalidEventType { event_type: String, reason: String },

    #[error("event stream closed")]
    Closed,

    #[error("config error: {0}")]
    Config(String),
}
