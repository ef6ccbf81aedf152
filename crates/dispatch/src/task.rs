//! Task and chunk state tracked for fan-in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between a task id and its chunk index in a chunk id.
pub const CHUNK_SEPARATOR: &str = "-chunk-";

/// Chunk id for chunk `index` of `task_id`: `"{task_id}-chunk-{index}"`.
pub fn chunk_id(task_id: &str, index: usize) -> String {
    format!("{task_id}{CHUNK_SEPARATOR}{index}")
}

/// Parent task id of a chunk id, split on the first separator.
///
/// Returns an empty string when the separator is absent; such chunks cannot be routed.
pub fn parent_task_id(chunk_id: &str) -> &str {
    chunk_id
        .split_once(CHUNK_SEPARATOR)
        .map(|(parent, _)| parent)
        .unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Completed,
}

/// One independently dispatched unit of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub index: usize,
    pub status: ChunkStatus,
    pub result_uri: Option<String>,
}

impl Chunk {
    pub fn pending(task_id: &str, index: usize) -> Self {
        Self {
            id: chunk_id(task_id, index),
            index,
            status: ChunkStatus::Pending,
            result_uri: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ChunkStatus::Completed
    }
}

/// A task split into ordered chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub chunks: Vec<Chunk>,
    /// Filled when the task is completed, in chunk order.
    pub result_uris: Vec<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A new task with `chunk_count` pending chunks.
    pub fn new(task_id: impl Into<String>, chunk_count: usize) -> Self {
        let task_id = task_id.into();
        let chunks = (0..chunk_count)
            .map(|i| Chunk::pending(&task_id, i))
            .collect();
        Self {
            task_id,
            chunks,
            result_uris: Vec::new(),
            completed: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// True iff every chunk is completed.
    pub fn all_chunks_completed(&self) -> bool {
        self.chunks.iter().all(Chunk::is_completed)
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == chunk_id)
    }

    pub fn pending_count(&self) -> usize {
        self.chunks.iter().filter(|c| !c.is_completed()).count()
    }

    /// Result URIs in chunk order. Chunks that reported no output contribute "".
    pub fn ordered_result_uris(&self) -> Vec<String> {
        let mut chunks: Vec<&Chunk> = self.chunks.iter().collect();
        chunks.sort_by_key(|c| c.index);
        chunks
            .into_iter()
            .map(|c| c.result_uri.clone().unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_roundtrip_to_parent() {
        let id = chunk_id("job-42", 3);
        assert_eq!(id, "job-42-chunk-3");
        assert_eq!(parent_task_id(&id), "job-42");
    }

    #[test]
    fn parent_splits_on_first_separator() {
        assert_eq!(parent_task_id("a-chunk-1-chunk-2"), "a");
    }

    #[test]
    fn parent_of_unchunked_id_is_empty() {
        assert_eq!(parent_task_id("plain-task"), "");
        assert_eq!(parent_task_id(""), "");
    }

    #[test]
    fn new_task_is_all_pending() {
        let task = Task::new("t", 3);
        assert_eq!(task.chunks.len(), 3);
        assert_eq!(task.pending_count(), 3);
        assert!(!task.all_chunks_completed());
        assert_eq!(task.chunks[2].id, "t-chunk-2");
        assert!(task.chunk("t-chunk-1").is_some());
        assert!(task.chunk("t-chunk-9").is_none());
    }

    #[test]
    fn ordered_uris_follow_chunk_index() {
        let mut task = Task::new("t", 3);
        task.chunks.reverse();
        for chunk in &mut task.chunks {
            chunk.status = ChunkStatus::Completed;
            chunk.result_uri = Some(format!("s3://out/{}", chunk.index));
        }
        assert!(task.all_chunks_completed());
        assert_eq!(
            task.ordered_result_uris(),
            vec!["s3://out/0", "s3://out/1", "s3://out/2"]
        );
    }
}
