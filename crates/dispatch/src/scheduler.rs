//! Scheduler: fans a whole-task request out into chunk dispatch requests.
//!
//! The task is persisted before any chunk is published, so a chunk result can
//! never reach the aggregator ahead of the task it belongs to.

use std::sync::Arc;

use async_trait::async_trait;
use nexgrid_bus::messages::{ComputeEnvelope, Failure};
use nexgrid_bus::{topics, CanonicalEvent, EventHandler, EventMetadata, EventPublisher};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, StoreError};
use crate::store::TaskStore;
use crate::task::{Task, CHUNK_SEPARATOR};
use crate::validate::validate_envelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Task stored; `published` of its chunk requests went out.
    Scheduled { chunks: usize, published: usize },
    /// Task already existed; `published` of its `pending` chunks were re-requested.
    Resumed { pending: usize, published: usize },
    /// Refused with a `failed` event for the task.
    Rejected { reason: String },
    Dropped,
}

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    publisher: Arc<dyn EventPublisher>,
    source: String,
    chunks_per_task: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn EventPublisher>,
        source: impl Into<String>,
        chunks_per_task: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            source: source.into(),
            chunks_per_task: chunks_per_task.max(1),
        }
    }

    pub async fn handle_task_request(&self, event: &CanonicalEvent) -> ScheduleOutcome {
        let envelope: ComputeEnvelope = match event.decode() {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id = %event.id, error = %e, "malformed task request, dropping");
                return ScheduleOutcome::Dropped;
            }
        };
        let task_id = envelope.task_id.as_str();

        if task_id.is_empty() {
            warn!(id = %event.id, "task request without task_id, dropping");
            return ScheduleOutcome::Dropped;
        }
        if task_id.contains(CHUNK_SEPARATOR) {
            warn!(task_id, "task id contains the chunk separator, dropping");
            return ScheduleOutcome::Dropped;
        }

        let context = event.correlation_context();
        if let Err(e) = validate_envelope(&envelope) {
            warn!(task_id, rule = e.rule(), error = %e, "task request rejected");
            let reason = DispatchError::from(e).to_string();
            let failure = Failure {
                task_id: task_id.to_string(),
                reason: reason.clone(),
            };
            self.emit(topics::DISPATCH_FAILED, &context, &failure).await;
            return ScheduleOutcome::Rejected { reason };
        }

        let task = Task::new(task_id, self.chunks_per_task);
        let chunk_ids: Vec<String> = task.chunks.iter().map(|c| c.id.clone()).collect();
        match self.store.create_task(task).await {
            Ok(()) => {
                info!(task_id, chunks = chunk_ids.len(), "task scheduled");
                let published = self.publish_chunks(&context, &envelope, &chunk_ids).await;
                ScheduleOutcome::Scheduled {
                    chunks: chunk_ids.len(),
                    published,
                }
            }
            Err(StoreError::AlreadyExists(_)) => self.resume(&context, &envelope).await,
            Err(e) => {
                error!(task_id, error = %e, "failed to create task");
                ScheduleOutcome::Dropped
            }
        }
    }

    /// Re-dispatch the still-pending chunks of a task that was scheduled before.
    ///
    /// A redelivered request is the only way a task whose chunk requests were
    /// lost can make progress again. Completed tasks are left alone.
    async fn resume(&self, context: &EventMetadata, envelope: &ComputeEnvelope) -> ScheduleOutcome {
        let task_id = envelope.task_id.as_str();
        let pending = match self.pending_chunks(task_id).await {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                debug!(task_id, "task already completed, dropping repeat request");
                return ScheduleOutcome::Dropped;
            }
            Err(e) => {
                error!(task_id, error = %e, "failed to load scheduled task");
                return ScheduleOutcome::Dropped;
            }
        };

        info!(task_id, pending = pending.len(), "task already scheduled, re-dispatching pending chunks");
        let published = self.publish_chunks(context, envelope, &pending).await;
        ScheduleOutcome::Resumed {
            pending: pending.len(),
            published,
        }
    }

    /// Ids of the task's pending chunks, or `None` once the task is complete.
    async fn pending_chunks(&self, task_id: &str) -> Result<Option<Vec<String>>, DispatchError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        if task.completed {
            return Ok(None);
        }
        Ok(Some(
            task.chunks
                .iter()
                .filter(|c| !c.is_completed())
                .map(|c| c.id.clone())
                .collect(),
        ))
    }

    /// Publish one dispatch request per chunk id; returns how many went out.
    async fn publish_chunks(
        &self,
        context: &EventMetadata,
        envelope: &ComputeEnvelope,
        chunk_ids: &[String],
    ) -> usize {
        let mut published = 0;
        for chunk_id in chunk_ids {
            let chunk_envelope = ComputeEnvelope {
                task_id: chunk_id.clone(),
                ..envelope.clone()
            };
            if self.emit(topics::DISPATCH_REQUESTED, context, &chunk_envelope).await {
                published += 1;
            }
        }
        published
    }

    async fn emit<T: Serialize + Sync>(
        &self,
        event_type: &str,
        context: &EventMetadata,
        payload: &T,
    ) -> bool {
        let event = match CanonicalEvent::derive(event_type, context, &self.source, payload) {
            Ok(event) => event,
            Err(e) => {
                error!(event_type, error = %e, "failed to build event");
                return false;
            }
        };
        match self.publisher.publish(event).await {
            Ok(()) => true,
            Err(e) => {
                error!(event_type, error = %e, "failed to publish event");
                false
            }
        }
    }
}

#[async_trait]
impl EventHandler for Scheduler {
    async fn handle(&self, event: CanonicalEvent) {
        if event.event_type == topics::TASK_REQUESTED {
            self.handle_task_request(&event).await;
        } else {
            debug!(event_type = %event.event_type, "scheduler ignoring event");
        }
    }
}
