//! Dispatch & aggregation engine for the compute grid.
//!
//! The [`Coordinator`] keeps a [`CapabilityRegistry`] of connected workers and
//! assigns each dispatch request to the best one; the [`Scheduler`] fans
//! whole tasks out into chunks and the [`Aggregator`] fans their results back
//! in. [`GridRuntime`] wires all three onto an event bus.

pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{Aggregator, AggregatorStats, ChunkOutcome};
pub use config::{DuplicatePolicy, GridConfig};
pub use coordinator::{Coordinator, CoordinatorStats, DispatchOutcome};
pub use error::{DispatchError, NoWorkerError, StoreError, ValidationError};
pub use matcher::find_best_worker;
pub use registry::{CapabilityRegistry, RegistrySnapshot};
pub use runtime::{GridRuntime, RunningGrid};
pub use scheduler::{ScheduleOutcome, Scheduler};
pub use store::{ChunkUpdate, InMemoryTaskStore, TaskStore};
pub use task::{chunk_id, parent_task_id, Chunk, ChunkStatus, Task};
pub use validate::validate_envelope;
