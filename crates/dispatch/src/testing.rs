//! Shared fakes for unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nexgrid_bus::{BusError, CanonicalEvent, EventPublisher};

/// Publisher that records every event instead of sending it.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<CanonicalEvent>>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every publish fails with a transport error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<CanonicalEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<CanonicalEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn types(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: CanonicalEvent) -> Result<(), BusError> {
        if self.fail {
            return Err(BusError::Transport("publisher offline".into()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
