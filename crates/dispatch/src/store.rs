//! Task/chunk persistence used by the scheduler and the aggregator.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::task::{Chunk, ChunkStatus, Task};

/// Result of [`TaskStore::update_chunk`], taken from one critical section.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkUpdate {
    /// The task right after the change.
    pub task: Task,
    /// The call moved the chunk from pending to completed.
    pub newly_completed: bool,
}

/// Persistence for fan-out/fan-in state.
///
/// Implementations must be safe under concurrent access to the same task:
/// `update_chunk` returns the task as it stands right after the change, and
/// `complete_task` succeeds (`Ok(true)`) for exactly one caller per task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task. Fails with [`StoreError::AlreadyExists`] if the id is taken.
    async fn create_task(&self, task: Task) -> Result<(), StoreError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    /// Merge `chunk` into the stored chunk with the same id.
    ///
    /// A completed chunk never reverts to pending and keeps its first result URI.
    /// `newly_completed` is set for exactly one completing call per chunk.
    async fn update_chunk(&self, task_id: &str, chunk: Chunk) -> Result<ChunkUpdate, StoreError>;

    /// Mark the task complete with `result_uris`.
    ///
    /// Returns `true` only for the call that performed the transition.
    async fn complete_task(&self, task_id: &str, result_uris: Vec<String>) -> Result<bool, StoreError>;
}

/// In-process [`TaskStore`] backed by a sharded concurrent map.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<DashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: Task) -> Result<(), StoreError> {
        match self.tasks.entry(task.task_id.clone()) {
            Entry::Occupied(existing) => Err(StoreError::AlreadyExists(existing.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(task);
                Ok(())
            }
        }
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(task_id).map(|t| t.clone()))
    }

    async fn update_chunk(&self, task_id: &str, chunk: Chunk) -> Result<ChunkUpdate, StoreError> {
        // The entry guard serializes every writer of this task until it drops.
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;

        let stored = task
            .chunks
            .iter_mut()
            .find(|c| c.id == chunk.id)
            .ok_or_else(|| StoreError::ChunkNotFound {
                task_id: task_id.to_string(),
                chunk_id: chunk.id.clone(),
            })?;

        let newly_completed =
            chunk.status == ChunkStatus::Completed && stored.status != ChunkStatus::Completed;
        if newly_completed {
            stored.status = ChunkStatus::Completed;
        }
        if stored.result_uri.is_none() {
            stored.result_uri = chunk.result_uri;
        }

        Ok(ChunkUpdate {
            task: task.clone(),
            newly_completed,
        })
    }

    async fn complete_task(&self, task_id: &str, result_uris: Vec<String>) -> Result<bool, StoreError> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;

        if task.completed {
            return Ok(false);
        }
        task.completed = true;
        task.completed_at = Some(Utc::now());
        task.result_uris = result_uris;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(task_id: &str, index: usize, uri: &str) -> Chunk {
        Chunk {
            status: ChunkStatus::Completed,
            result_uri: Some(uri.to_string()),
            ..Chunk::pending(task_id, index)
        }
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = InMemoryTaskStore::new();
        assert!(store.get_task("t").await.unwrap().is_none());

        store.create_task(Task::new("t", 2)).await.unwrap();
        let task = store.get_task("t").await.unwrap().unwrap();
        assert_eq!(task.chunks.len(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_existing_id() {
        let store = InMemoryTaskStore::new();
        store.create_task(Task::new("t", 1)).await.unwrap();
        let err = store.create_task(Task::new("t", 5)).await.unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists("t".into()));
        assert_eq!(store.get_task("t").await.unwrap().unwrap().chunks.len(), 1);
    }

    #[tokio::test]
    async fn update_returns_post_update_snapshot() {
        let store = InMemoryTaskStore::new();
        store.create_task(Task::new("t", 2)).await.unwrap();

        let update = store.update_chunk("t", completed("t", 1, "s3://r/1")).await.unwrap();
        assert!(update.newly_completed);
        let task = update.task;
        assert_eq!(task.pending_count(), 1);
        assert_eq!(task.chunks[1].result_uri.as_deref(), Some("s3://r/1"));
    }

    #[tokio::test]
    async fn completed_chunk_never_reverts() {
        let store = InMemoryTaskStore::new();
        store.create_task(Task::new("t", 1)).await.unwrap();
        store.update_chunk("t", completed("t", 0, "first")).await.unwrap();

        let update = store.update_chunk("t", Chunk::pending("t", 0)).await.unwrap();
        assert!(update.task.chunks[0].is_completed());
        assert!(!update.newly_completed);

        let update = store.update_chunk("t", completed("t", 0, "second")).await.unwrap();
        assert_eq!(update.task.chunks[0].result_uri.as_deref(), Some("first"));
        assert!(!update.newly_completed);
    }

    #[tokio::test]
    async fn unknown_task_or_chunk() {
        let store = InMemoryTaskStore::new();
        assert_eq!(
            store.update_chunk("nope", completed("nope", 0, "x")).await.unwrap_err(),
            StoreError::TaskNotFound("nope".into())
        );

        store.create_task(Task::new("t", 1)).await.unwrap();
        let err = store.update_chunk("t", completed("t", 7, "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::ChunkNotFound { .. }));
        assert!(!store.get_task("t").await.unwrap().unwrap().chunks[0].is_completed());

        assert!(store.complete_task("nope", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn complete_task_transitions_once() {
        let store = InMemoryTaskStore::new();
        store.create_task(Task::new("t", 1)).await.unwrap();

        assert!(store.complete_task("t", vec!["a".into()]).await.unwrap());
        assert!(!store.complete_task("t", vec!["b".into()]).await.unwrap());

        let task = store.get_task("t").await.unwrap().unwrap();
        assert!(task.completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.result_uris, vec!["a"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_chunk_completion_transitions_once() {
        let store = InMemoryTaskStore::new();
        store.create_task(Task::new("t", 1)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_chunk("t", completed("t", 0, &format!("uri-{i}")))
                    .await
                    .unwrap()
                    .newly_completed
            }));
        }
        let mut transitions = 0;
        for handle in handles {
            if handle.await.unwrap() {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_completion_has_single_winner() {
        let store = InMemoryTaskStore::new();
        store.create_task(Task::new("t", 1)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.complete_task("t", vec![]).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
