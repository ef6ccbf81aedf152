use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BusError;

/// Transport-agnostic event envelope shared by every producer and consumer on the bus.
///
/// The `event_type` follows `{service}:{action}:v{version}:{state}` and doubles as the
/// routing topic for prefix-filtered subscriptions. The payload is kept as a generic
/// structured value so the bus never needs to know the concrete schema; consumers
/// call [`CanonicalEvent::decode`] with the type they expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Event identifier. Derived events reuse the correlation id of their origin.
    pub id: String,

    /// Canonical event type, e.g. `compute:dispatch:v1:requested`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Structured payload.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Caller context propagated through every derived event.
    #[serde(default)]
    pub metadata: EventMetadata,

    /// When this event was created.
    pub timestamp: DateTime<Utc>,

    /// Envelope schema version.
    #[serde(default = "default_version")]
    pub version: u16,
}

/// Context carried alongside every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Producer identity. For worker-originated events this is the worker id.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub campaign_id: String,
    #[serde(default)]
    pub correlation_id: String,
    /// Present only on targeted events; the gateway forwards them to this worker alone.
    #[serde(default)]
    pub routing: Option<Routing>,
}

/// Targeted routing information for gateway delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub target_worker_id: String,
}

fn default_version() -> u16 {
    1
}

impl CanonicalEvent {
    /// Create a fresh event with a newly generated correlation id.
    pub fn new<T: Serialize>(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: &T,
    ) -> Result<Self, BusError> {
        let correlation_id = Uuid::new_v4().to_string();
        Ok(Self {
            id: correlation_id.clone(),
            event_type: event_type.into(),
            payload: serde_json::to_value(payload)?,
            metadata: EventMetadata {
                source: source.into(),
                correlation_id,
                ..EventMetadata::default()
            },
            timestamp: Utc::now(),
            version: 1,
        })
    }

    /// Create an event derived from `origin`, preserving its user, campaign and
    /// correlation context. A fresh correlation id is minted only when the origin had none.
    pub fn derive<T: Serialize>(
        event_type: impl Into<String>,
        origin: &EventMetadata,
        source: impl Into<String>,
        payload: &T,
    ) -> Result<Self, BusError> {
        let correlation_id = if origin.correlation_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            origin.correlation_id.clone()
        };
        Ok(Self {
            id: correlation_id.clone(),
            event_type: event_type.into(),
            payload: serde_json::to_value(payload)?,
            metadata: EventMetadata {
                source: source.into(),
                user_id: origin.user_id.clone(),
                campaign_id: origin.campaign_id.clone(),
                correlation_id,
                routing: None,
            },
            timestamp: Utc::now(),
            version: 1,
        })
    }

    /// Metadata to derive follow-up events from, with the correlation id pinned.
    ///
    /// Uses the event's own correlation id, then its id, and only then mints
    /// one, so every event derived from the same context correlates.
    pub fn correlation_context(&self) -> EventMetadata {
        let mut context = self.metadata.clone();
        if context.correlation_id.is_empty() {
            context.correlation_id = if self.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                self.id.clone()
            };
        }
        context
    }

    /// Mark this event as targeted at a single worker.
    pub fn with_routing(mut self, target_worker_id: impl Into<String>) -> Self {
        self.metadata.routing = Some(Routing {
            target_worker_id: target_worker_id.into(),
        });
        self
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Worker id named by the routing metadata, if this is a targeted event.
    pub fn target_worker_id(&self) -> Option<&str> {
        self.metadata
            .routing
            .as_ref()
            .map(|r| r.target_worker_id.as_str())
    }

    /// Serialize the entire envelope to MessagePack bytes (field names preserved).
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Check that `event_type` follows `{service}:{action}:v{version}:{state}`.
pub fn validate_event_type(event_type: &str) -> Result<(), BusError> {
    let invalid = |reason: &str| BusError::InvalidEventType {
        event_type: event_type.to_string(),
        reason: reason.to_string(),
    };

    if event_type.is_empty() {
        return Err(invalid("event type is required"));
    }

    let parts: Vec<&str> = event_type.split(':').collect();
    let [service, action, version, state] = parts.as_slice() else {
        return Err(invalid("expected exactly 4 ':'-separated parts"));
    };

    for (field, part) in [("service", service), ("action", action), ("state", state)] {
        if !is_identifier(part) {
            return Err(invalid(&format!("{field} must be a lowercase identifier")));
        }
    }

    match version.strip_prefix('v') {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => Ok(()),
        _ => Err(invalid("version must look like v1")),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut bytes = s.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_lowercase())
        && bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::topics;

    #[test]
    fn new_event_uses_correlation_as_id() {
        let event = CanonicalEvent::new(topics::CAPABILITIES_UPDATE, "worker-1", &42u64).unwrap();
        assert_eq!(event.id, event.metadata.correlation_id);
        assert_eq!(event.metadata.source, "worker-1");
        assert_eq!(event.decode::<u64>().unwrap(), 42);
    }

    #[test]
    fn derive_preserves_caller_context() {
        let origin = EventMetadata {
            source: "client-7".into(),
            user_id: "user-1".into(),
            campaign_id: "camp-9".into(),
            correlation_id: "corr-123".into(),
            routing: None,
        };
        let event =
            CanonicalEvent::derive(topics::DISPATCH_ACCEPTED, &origin, "compute-coordinator", &"x")
                .unwrap();

        assert_eq!(event.id, "corr-123");
        assert_eq!(event.metadata.correlation_id, "corr-123");
        assert_eq!(event.metadata.user_id, "user-1");
        assert_eq!(event.metadata.campaign_id, "camp-9");
        assert_eq!(event.metadata.source, "compute-coordinator");
    }

    #[test]
    fn correlation_context_pins_one_id() {
        let mut event = CanonicalEvent::new(topics::DISPATCH_REQUESTED, "client", &()).unwrap();
        event.metadata.correlation_id.clear();

        let context = event.correlation_context();
        assert_eq!(context.correlation_id, event.id);
        let a = CanonicalEvent::derive(topics::DISPATCH_ACCEPTED, &context, "c", &()).unwrap();
        let b = CanonicalEvent::derive(topics::DISPATCH_ASSIGNED, &context, "c", &()).unwrap();
        assert_eq!(a.metadata.correlation_id, b.metadata.correlation_id);

        event.id.clear();
        assert!(!event.correlation_context().correlation_id.is_empty());

        event.metadata.correlation_id = "corr-1".into();
        assert_eq!(event.correlation_context().correlation_id, "corr-1");
    }

    #[test]
    fn derive_mints_correlation_when_missing() {
        let event = CanonicalEvent::derive(
            topics::DISPATCH_FAILED,
            &EventMetadata::default(),
            "compute-coordinator",
            &(),
        )
        .unwrap();
        assert!(!event.metadata.correlation_id.is_empty());
        assert_eq!(event.id, event.metadata.correlation_id);
    }

    #[test]
    fn routing_survives_wire_encoding() {
        let event = CanonicalEvent::new(topics::DISPATCH_ASSIGNED, "coord", &"payload")
            .unwrap()
            .with_routing("worker-a");
        let decoded = CanonicalEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.target_worker_id(), Some("worker-a"));
        assert_eq!(decoded, event);
    }

    #[test]
    fn event_type_validation() {
        assert!(validate_event_type(topics::DISPATCH_REQUESTED).is_ok());
        assert!(validate_event_type(topics::TASK_SUCCESS).is_ok());
        assert!(validate_event_type("").is_err());
        assert!(validate_event_type("compute:dispatch:requested").is_err());
        assert!(validate_event_type("compute:dispatch:1:requested").is_err());
        assert!(validate_event_type("Compute:dispatch:v1:requested").is_err());
        assert!(validate_event_type("compute:dispatch:v:requested").is_err());
    }
}
