use nexgrid_bus::BusError;
use thiserror::Error;

use crate::validate;

/// Why a dispatch request was rejected before matching.
///
/// The display strings are sent verbatim to requesters in `failed` events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task_id and requirements are required")]
    MissingRequiredFields,

    #[error("exactly one input must be provided")]
    InputCount { got: usize },

    #[error("a content hash is required for remote module URIs")]
    MissingModuleHash { uri: String },
}

impl ValidationError {
    /// Identifier of the rule that failed.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::MissingRequiredFields => validate::RULE_ENVELOPE_REQUIRED_FIELDS,
            Self::InputCount { .. } => validate::RULE_DATAREF_ONE_BODY,
            Self::MissingModuleHash { .. } => validate::RULE_MODULE_INTEGRITY,
        }
    }
}

/// No registered worker can take the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NoWorkerError {
    #[error("no workers available")]
    NoWorkersAvailable,

    #[error("no worker satisfies minimum requirements")]
    NoneSatisfiesMinimum,
}

/// Task/chunk persistence failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task '{0}' already exists")]
    AlreadyExists(String),

    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("chunk '{chunk_id}' not found in task '{task_id}'")]
    ChunkNotFound { task_id: String, chunk_id: String },
}

/// Umbrella error for the dispatch engine.
///
/// The request-level variants render as the `failed` event reason.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid compute envelope: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    NoWorker(#[from] NoWorkerError),

    #[error("duplicate task_id")]
    DuplicateTask(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
