//! Aggregator: fan-in of chunk results into one task success event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nexgrid_bus::messages::{ComputeResult, TaskSuccess};
use nexgrid_bus::{topics, CanonicalEvent, EventHandler, EventPublisher};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::store::{ChunkUpdate, TaskStore};
use crate::task::{parent_task_id, Chunk, ChunkStatus};

/// What happened to one chunk-success event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk recorded; `remaining` chunks of the task are still pending.
    Pending { remaining: usize },
    /// This chunk completed the task and the aggregated event was issued.
    TaskCompleted { task_id: String },
    /// Every chunk is complete but another delivery already finished the task.
    AlreadyCompleted,
    /// Unroutable, unknown or undecodable; nothing was changed.
    Dropped,
    /// The store failed; the task keeps its last persisted state.
    StoreFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    pub chunks_completed: u64,
    pub tasks_completed: u64,
    pub dropped: u64,
}

pub struct Aggregator {
    store: Arc<dyn TaskStore>,
    publisher: Arc<dyn EventPublisher>,
    source: String,
    chunks_completed: AtomicU64,
    tasks_completed: AtomicU64,
    dropped: AtomicU64,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        publisher: Arc<dyn EventPublisher>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            source: source.into(),
            chunks_completed: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Record one chunk result and, if it was the last one, publish the task result.
    pub async fn handle_chunk_success(&self, event: &CanonicalEvent) -> ChunkOutcome {
        let result: ComputeResult = match event.decode() {
            Ok(result) => result,
            Err(e) => {
                warn!(id = %event.id, error = %e, "malformed chunk result, dropping");
                return self.drop_event();
            }
        };
        let chunk_id = result.task_id.as_str();

        let task_id = parent_task_id(chunk_id);
        if task_id.is_empty() {
            warn!(chunk_id, "chunk id has no parent task, dropping");
            return self.drop_event();
        }

        let index = match self.store.get_task(task_id).await {
            Ok(Some(task)) => match task.chunk(chunk_id) {
                Some(chunk) => chunk.index,
                None => {
                    warn!(task_id, chunk_id, "unknown chunk for task, dropping");
                    return self.drop_event();
                }
            },
            Ok(None) => {
                warn!(task_id, chunk_id, "chunk result for unknown task, dropping");
                return self.drop_event();
            }
            Err(e) => {
                error!(task_id, chunk_id, error = %e, "failed to load task");
                return ChunkOutcome::StoreFailed;
            }
        };

        let update = Chunk {
            id: chunk_id.to_string(),
            index,
            status: ChunkStatus::Completed,
            result_uri: result.first_output_uri().map(str::to_string),
        };
        let ChunkUpdate {
            task,
            newly_completed,
        } = match self.store.update_chunk(task_id, update).await {
            Ok(update) => update,
            Err(e @ (StoreError::TaskNotFound(_) | StoreError::ChunkNotFound { .. })) => {
                warn!(task_id, chunk_id, error = %e, "chunk vanished before update, dropping");
                return self.drop_event();
            }
            Err(e) => {
                error!(task_id, chunk_id, error = %e, "failed to update chunk");
                return ChunkOutcome::StoreFailed;
            }
        };
        if newly_completed {
            self.chunks_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(task_id, chunk_id, "chunk already completed");
        }

        if !task.all_chunks_completed() {
            let remaining = task.pending_count();
            debug!(task_id, chunk_id, remaining, "chunk completed");
            return ChunkOutcome::Pending { remaining };
        }

        let result_uris = task.ordered_result_uris();
        match self.store.complete_task(task_id, result_uris.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task_id, chunk_id, "task already completed");
                return ChunkOutcome::AlreadyCompleted;
            }
            Err(e) => {
                error!(task_id, error = %e, "failed to complete task");
                return ChunkOutcome::StoreFailed;
            }
        }

        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        info!(task_id, chunks = task.chunks.len(), "task completed");
        self.publish_success(event, TaskSuccess::aggregated(task_id, result_uris))
            .await;

        ChunkOutcome::TaskCompleted {
            task_id: task_id.to_string(),
        }
    }

    async fn publish_success(&self, origin: &CanonicalEvent, success: TaskSuccess) {
        let event = match CanonicalEvent::derive(
            topics::TASK_SUCCESS,
            &origin.metadata,
            &self.source,
            &success,
        ) {
            Ok(event) => event,
            Err(e) => {
                error!(task_id = %success.task_id, error = %e, "failed to build task success event");
                return;
            }
        };
        if let Err(e) = self.publisher.publish(event).await {
            error!(task_id = %success.task_id, error = %e, "failed to publish task success");
        }
    }

    fn drop_event(&self) -> ChunkOutcome {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        ChunkOutcome::Dropped
    }
}

#[async_trait]
impl EventHandler for Aggregator {
    async fn handle(&self, event: CanonicalEvent) {
        if event.event_type == topics::DISPATCH_SUCCESS {
            self.handle_chunk_success(&event).await;
        } else {
            debug!(event_type = %event.event_type, "aggregator ignoring event");
        }
    }
}

#[cfg(test)]
mod tests {
    use nexgrid_bus::messages::DataRef;

    use super::*;
    use crate::store::InMemoryTaskStore;
    use crate::task::{chunk_id, Task};
    use crate::testing::RecordingPublisher;

    async fn setup(task_id: &str, chunks: usize) -> (Aggregator, InMemoryTaskStore, RecordingPublisher) {
        let store = InMemoryTaskStore::new();
        store.create_task(Task::new(task_id, chunks)).await.unwrap();
        let publisher = RecordingPublisher::new();
        let aggregator = Aggregator::new(
            Arc::new(store.clone()),
            Arc::new(publisher.clone()),
            "aggregator-test",
        );
        (aggregator, store, publisher)
    }

    fn chunk_success(chunk_id: &str, uri: &str) -> CanonicalEvent {
        let result = ComputeResult {
            task_id: chunk_id.into(),
            outputs: vec![DataRef::uri("result", uri)],
        };
        let mut event = CanonicalEvent::new(topics::DISPATCH_SUCCESS, "worker-1", &result).unwrap();
        event.metadata.correlation_id = "corr-9".into();
        event
    }

    #[tokio::test]
    async fn out_of_order_chunks_aggregate_in_index_order() {
        let (aggregator, _, publisher) = setup("job", 3).await;

        for index in [1, 0, 2] {
            let id = chunk_id("job", index);
            aggregator
                .handle_chunk_success(&chunk_success(&id, &format!("s3://out/{index}")))
                .await;
        }

        let successes = publisher.of_type(topics::TASK_SUCCESS);
        assert_eq!(successes.len(), 1);
        let success: TaskSuccess = successes[0].decode().unwrap();
        assert_eq!(success.task_id, "job");
        assert_eq!(
            success.result_uris(),
            ["s3://out/0", "s3://out/1", "s3://out/2"]
        );
        assert_eq!(success.outputs[0].name, "aggregated_results");
        assert_eq!(successes[0].metadata.correlation_id, "corr-9");
        assert_eq!(aggregator.stats().tasks_completed, 1);
    }

    #[tokio::test]
    async fn partial_completion_emits_nothing() {
        let (aggregator, store, publisher) = setup("job", 2).await;
        let outcome = aggregator
            .handle_chunk_success(&chunk_success("job-chunk-0", "s3://out/0"))
            .await;

        assert_eq!(outcome, ChunkOutcome::Pending { remaining: 1 });
        assert!(publisher.events().is_empty());
        assert!(!store.get_task("job").await.unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn unknown_task_is_dropped_without_side_effects() {
        let (aggregator, store, publisher) = setup("job", 1).await;
        let before = store.get_task("job").await.unwrap();

        let outcome = aggregator
            .handle_chunk_success(&chunk_success("other-chunk-0", "s3://x"))
            .await;

        assert_eq!(outcome, ChunkOutcome::Dropped);
        assert_eq!(store.get_task("job").await.unwrap(), before);
        assert_eq!(store.len(), 1);
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn unknown_chunk_index_is_dropped() {
        let (aggregator, store, _) = setup("job", 2).await;
        let outcome = aggregator
            .handle_chunk_success(&chunk_success("job-chunk-5", "s3://x"))
            .await;
        assert_eq!(outcome, ChunkOutcome::Dropped);
        assert_eq!(store.get_task("job").await.unwrap().unwrap().pending_count(), 2);
    }

    #[tokio::test]
    async fn chunk_id_without_separator_is_dropped() {
        let (aggregator, _, _) = setup("job", 1).await;
        assert_eq!(
            aggregator.handle_chunk_success(&chunk_success("job", "s3://x")).await,
            ChunkOutcome::Dropped
        );
        assert_eq!(aggregator.stats().dropped, 1);
    }

    #[tokio::test]
    async fn duplicate_chunk_events_fire_once() {
        let (aggregator, store, publisher) = setup("job", 2).await;
        let first = chunk_success("job-chunk-0", "s3://first");
        aggregator.handle_chunk_success(&first).await;
        aggregator.handle_chunk_success(&first).await;
        aggregator
            .handle_chunk_success(&chunk_success("job-chunk-0", "s3://late"))
            .await;

        let last = chunk_success("job-chunk-1", "s3://one");
        assert!(matches!(
            aggregator.handle_chunk_success(&last).await,
            ChunkOutcome::TaskCompleted { .. }
        ));
        assert_eq!(
            aggregator.handle_chunk_success(&last).await,
            ChunkOutcome::AlreadyCompleted
        );

        assert_eq!(publisher.of_type(topics::TASK_SUCCESS).len(), 1);
        let task = store.get_task("job").await.unwrap().unwrap();
        assert_eq!(task.result_uris, vec!["s3://first", "s3://one"]);
    }

    #[tokio::test]
    async fn redelivered_chunks_are_counted_once() {
        let (aggregator, _, _) = setup("job", 1).await;
        let event = chunk_success("job-chunk-0", "s3://out/0");
        for _ in 0..3 {
            aggregator.handle_chunk_success(&event).await;
        }

        let stats = aggregator.stats();
        assert_eq!(stats.chunks_completed, 1);
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[tokio::test]
    async fn chunk_without_output_contributes_empty_uri() {
        let (aggregator, _, publisher) = setup("job", 1).await;
        let result = ComputeResult {
            task_id: "job-chunk-0".into(),
            outputs: vec![],
        };
        let event = CanonicalEvent::new(topics::DISPATCH_SUCCESS, "w", &result).unwrap();
        aggregator.handle_chunk_success(&event).await;

        let success: TaskSuccess = publisher.events()[0].decode().unwrap();
        assert_eq!(success.result_uris(), [""]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_chunks_fire_exactly_once() {
        let chunks = 32;
        let (aggregator, _, publisher) = setup("wide", chunks).await;
        let aggregator = Arc::new(aggregator);

        let mut handles = Vec::new();
        for index in 0..chunks {
            for _ in 0..2 {
                let aggregator = aggregator.clone();
                let event = chunk_success(&chunk_id("wide", index), &format!("s3://{index}"));
                handles.push(tokio::spawn(async move {
                    aggregator.handle(event).await;
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let successes = publisher.of_type(topics::TASK_SUCCESS);
        assert_eq!(successes.len(), 1);
        let success: TaskSuccess = successes[0].decode().unwrap();
        let expected: Vec<String> = (0..chunks).map(|i| format!("s3://{i}")).collect();
        assert_eq!(success.result_uris(), expected.as_slice());
    }
}
