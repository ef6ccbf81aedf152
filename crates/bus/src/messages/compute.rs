//! Compute payloads carried by [`CanonicalEvent`](crate::CanonicalEvent)s.
//!
//! Every optional field defaults when absent so workers and clients written
//! against older schemas still decode.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Name of the single output entry in an aggregated task result.
pub const AGGREGATED_RESULTS: &str = "aggregated_results";

/// A worker's declared execution profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(default)]
    pub cpu_cores: u32,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub wasm: bool,
    #[serde(default)]
    pub threads: bool,
    #[serde(default)]
    pub simd: bool,
    #[serde(default)]
    pub webgpu: bool,
    #[serde(default)]
    pub gpu: Option<GpuCapability>,
}

/// GPU block of a [`Capability`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuCapability {
    /// Backend name (e.g. "webgpu", "vulkan"). Empty means unspecified.
    #[serde(default)]
    pub backend: String,
    /// Feature strings; compared as a set.
    #[serde(default)]
    pub features: BTreeSet<String>,
}

/// Hard and soft constraints for choosing a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Every field here must be met by the chosen worker.
    #[serde(default)]
    pub min: Option<Capability>,
    /// Used only to rank workers that already satisfy `min`.
    #[serde(default)]
    pub preferred: Option<Capability>,
}

/// Reference to a piece of data: a URI, an inline value, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub inline: Option<serde_json::Value>,
}

impl DataRef {
    /// A data reference pointing at `uri`.
    pub fn uri(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: Some(uri.into()),
            inline: None,
        }
    }
}

/// Executable module for a compute task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    #[serde(default)]
    pub uri: String,
    /// Content hash; mandatory for anything not fetched from `file://`.
    #[serde(default)]
    pub hash: Option<String>,
}

/// The canonical task-dispatch request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeEnvelope {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub requirements: Option<Requirements>,
    #[serde(default)]
    pub inputs: Vec<DataRef>,
    #[serde(default)]
    pub module: Option<ModuleRef>,
    #[serde(default)]
    pub outputs: Vec<DataRef>,
}

/// Broadcast when a task has been matched to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: String,
    pub worker_id: String,
}

/// Sent to the requester when a dispatch request cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub task_id: String,
    pub reason: String,
}

/// Result reported by a worker for one chunk. `task_id` holds the chunk id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeResult {
    pub task_id: String,
    #[serde(default)]
    pub outputs: Vec<DataRef>,
}

impl ComputeResult {
    /// URI of the first output, if the worker reported one.
    pub fn first_output_uri(&self) -> Option<&str> {
        self.outputs.first().and_then(|o| o.uri.as_deref())
    }
}

/// One named group of result URIs in a [`TaskSuccess`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedOutput {
    pub name: String,
    pub result_uris: Vec<String>,
}

/// Published once every chunk of a task has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSuccess {
    pub task_id: String,
    pub outputs: Vec<AggregatedOutput>,
}

impl TaskSuccess {
    /// Build the aggregated result with URIs in chunk order.
    pub fn aggregated(task_id: impl Into<String>, result_uris: Vec<String>) -> Self {
        Self {
            task_id: task_id.into(),
            outputs: vec![AggregatedOutput {
                name: AGGREGATED_RESULTS.to_string(),
                result_uris,
            }],
        }
    }

    /// URIs of the `aggregated_results` output.
    pub fn result_uris(&self) -> &[String] {
        self.outputs
            .iter()
            .find(|o| o.name == AGGREGATED_RESULTS)
            .map(|o| o.result_uris.as_slice())
            .unwrap_or(&[])
    }
}
