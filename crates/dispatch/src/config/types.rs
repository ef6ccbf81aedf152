use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use nexgrid_bus::BusConfig;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for one engine process.
///
/// Every section is optional; an empty file yields a local IPC deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Broker endpoints.
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Subscription loop tuning shared by every component.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

// ── Section configs ─────────────────────────────────────────────────

/// What the coordinator does with a dispatch request whose `task_id` it
/// has already assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Re-dispatch every request, duplicates included.
    #[default]
    Allow,
    /// Answer repeats inside the dedup window with a `failed` event.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "reject" => Ok(Self::Reject),
            other => Err(DispatchError::Config(format!(
                "invalid duplicate policy '{other}', expected 'allow' or 'reject'"
            ))),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// `metadata.source` stamped on coordinator events.
    #[serde(default = "default_coordinator_source")]
    pub source: String,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Number of recently assigned task ids remembered under `reject`.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

fn default_coordinator_source() -> String {
    "compute-coordinator".into()
}

fn default_dedup_window() -> usize {
    10_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            source: default_coordinator_source(),
            duplicate_policy: DuplicatePolicy::default(),
            dedup_window: default_dedup_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_aggregator_source")]
    pub source: String,
}

fn default_aggregator_source() -> String {
    "compute-aggregator".into()
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            source: default_aggregator_source(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_source")]
    pub source: String,

    /// Chunks each requested task is split into.
    #[serde(default = "default_chunks_per_task")]
    pub chunks_per_task: usize,
}

fn default_scheduler_source() -> String {
    "compute-scheduler".into()
}

fn default_chunks_per_task() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            source: default_scheduler_source(),
            chunks_per_task: default_chunks_per_task(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Handler invocations allowed to run at once per subscription loop.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Seconds to wait for in-flight handlers on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_max_in_flight() -> usize {
    64
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
