//! Coordinator: keeps the capability registry current and turns dispatch
//! requests into assignments.
//!
//! Stateless across requests apart from the registry (and, under
//! [`DuplicatePolicy::Reject`], a bounded window of recently assigned ids).
//! Every per-event error is handled here; nothing propagates to the loop.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lru::LruCache;
use nexgrid_bus::messages::{Assignment, Capability, ComputeEnvelope, Failure};
use nexgrid_bus::{topics, CanonicalEvent, EventHandler, EventMetadata, EventPublisher};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{CoordinatorConfig, DuplicatePolicy};
use crate::error::DispatchError;
use crate::matcher::find_best_worker;
use crate::registry::CapabilityRegistry;
use crate::validate::validate_envelope;

/// What happened to one dispatch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Assigned to `worker_id`; accepted and assigned events were issued.
    Assigned { worker_id: String },
    /// Rejected with a `failed` event carrying `reason`.
    Rejected { reason: String },
    /// Nothing could be addressed back to the requester.
    Dropped,
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub capability_updates: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    capability_updates: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

pub struct Coordinator {
    registry: Arc<CapabilityRegistry>,
    publisher: Arc<dyn EventPublisher>,
    source: String,
    recent: Option<Mutex<LruCache<String, ()>>>,
    counters: Counters,
}

impl Coordinator {
    /// A coordinator that re-dispatches duplicates.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        publisher: Arc<dyn EventPublisher>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            publisher,
            source: source.into(),
            recent: None,
            counters: Counters::default(),
        }
    }

    pub fn from_config(
        config: &CoordinatorConfig,
        registry: Arc<CapabilityRegistry>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let coordinator = Self::new(registry, publisher, config.source.clone());
        match config.duplicate_policy {
            DuplicatePolicy::Allow => coordinator,
            DuplicatePolicy::Reject => coordinator.reject_duplicates(config.dedup_window),
        }
    }

    /// Remember the last `window` assigned task ids and refuse repeats.
    pub fn reject_duplicates(mut self, window: usize) -> Self {
        let window = NonZeroUsize::new(window).unwrap_or(NonZeroUsize::MIN);
        self.recent = Some(Mutex::new(LruCache::new(window)));
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            capability_updates: self.counters.capability_updates.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Record a worker's capability. The worker id is the event's `metadata.source`.
    ///
    /// Returns `false` when the event was dropped.
    pub fn handle_capability_update(&self, event: &CanonicalEvent) -> bool {
        let worker_id = event.metadata.source.as_str();
        if worker_id.is_empty() {
            warn!(id = %event.id, "capability update without source, dropping");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let capability: Capability = match event.decode() {
            Ok(capability) => capability,
            Err(e) => {
                warn!(worker_id, error = %e, "malformed capability payload, dropping");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let previous = self.registry.update(worker_id, capability);
        self.counters.capability_updates.fetch_add(1, Ordering::Relaxed);
        if previous.is_none() {
            info!(worker_id, workers = self.registry.len(), "worker registered");
        } else {
            debug!(worker_id, "worker capability refreshed");
        }
        true
    }

    /// Validate, match and assign one dispatch request.
    pub async fn handle_dispatch_request(&self, event: &CanonicalEvent) -> DispatchOutcome {
        let envelope: ComputeEnvelope = match event.decode() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id = %event.id, error = %e, "malformed compute envelope, dropping");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return DispatchOutcome::Dropped;
            }
        };
        let task_id = envelope.task_id.as_str();
        let context = event.correlation_context();

        let worker_id = match self.assign(&envelope) {
            Ok(worker_id) => worker_id,
            Err(e) => {
                match &e {
                    DispatchError::Validation(v) => {
                        warn!(task_id, rule = v.rule(), error = %e, "dispatch request rejected")
                    }
                    _ => warn!(task_id, error = %e, "dispatch request rejected"),
                }
                if task_id.is_empty() {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    return DispatchOutcome::Dropped;
                }
                return self.reject(&context, task_id, e.to_string()).await;
            }
        };

        info!(task_id, worker_id = %worker_id, "task assigned");
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let assignment = Assignment {
            task_id: task_id.to_string(),
            worker_id: worker_id.clone(),
        };
        self.emit(topics::DISPATCH_ACCEPTED, &context, &assignment, None)
            .await;
        self.emit(topics::DISPATCH_ASSIGNED, &context, &envelope, Some(worker_id.as_str()))
            .await;

        DispatchOutcome::Assigned { worker_id }
    }

    /// Pick the worker for `envelope`, claiming its task id under the reject policy.
    fn assign(&self, envelope: &ComputeEnvelope) -> Result<String, DispatchError> {
        let task_id = envelope.task_id.as_str();
        let requirements = validate_envelope(envelope)?;

        if !self.claim(task_id) {
            return Err(DispatchError::DuplicateTask(task_id.to_string()));
        }

        let snapshot = self.registry.snapshot();
        match find_best_worker(&snapshot, requirements) {
            Ok(worker_id) => Ok(worker_id),
            Err(e) => {
                self.release(task_id);
                debug!(task_id, workers = snapshot.len(), "no worker matched");
                Err(e.into())
            }
        }
    }

    async fn reject(&self, context: &EventMetadata, task_id: &str, reason: String) -> DispatchOutcome {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let failure = Failure {
            task_id: task_id.to_string(),
            reason,
        };
        self.emit(topics::DISPATCH_FAILED, context, &failure, None).await;
        DispatchOutcome::Rejected {
            reason: failure.reason,
        }
    }

    /// Build and publish an event derived from `context`. Failures are logged only.
    async fn emit<T: Serialize + Sync>(
        &self,
        event_type: &str,
        context: &EventMetadata,
        payload: &T,
        target_worker_id: Option<&str>,
    ) {
        let event = match CanonicalEvent::derive(event_type, context, &self.source, payload) {
            Ok(event) => event,
            Err(e) => {
                error!(event_type, error = %e, "failed to build event");
                return;
            }
        };
        let event = match target_worker_id {
            Some(worker_id) => event.with_routing(worker_id),
            None => event,
        };
        if let Err(e) = self.publisher.publish(event).await {
            error!(event_type, correlation_id = %context.correlation_id, error = %e, "failed to publish event");
        }
    }

    /// Reserve `task_id` in the dedup window. Always succeeds when duplicates are allowed.
    fn claim(&self, task_id: &str) -> bool {
        let Some(recent) = &self.recent else {
            return true;
        };
        let mut recent = recent.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.contains(task_id) {
            return false;
        }
        recent.put(task_id.to_string(), ());
        true
    }

    fn release(&self, task_id: &str) {
        if let Some(recent) = &self.recent {
            recent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop(task_id);
        }
    }
}

#[async_trait]
impl EventHandler for Coordinator {
    async fn handle(&self, event: CanonicalEvent) {
        match event.event_type.as_str() {
            topics::CAPABILITIES_UPDATE => {
                self.handle_capability_update(&event);
            }
            topics::DISPATCH_REQUESTED => {
                self.handle_dispatch_request(&event).await;
            }
            other => debug!(event_type = other, "coordinator ignoring event"),
        }
    }
}
