use std::path::Path;
use std::str::FromStr;

use tracing::warn;

use crate::error::DispatchError;

use super::types::GridConfig;

impl GridConfig {
    /// Parse config from a TOML string, then apply process environment overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, DispatchError> {
        Self::from_toml_with(toml_str, |key| std::env::var(key).ok())
    }

    /// Like [`GridConfig::from_toml`], resolving overrides through `lookup`.
    pub fn from_toml_with(
        toml_str: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DispatchError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment-style overrides.
    ///
    /// Convention: `NEXGRID_SECTION_KEY` overrides `section.key`, e.g.
    /// - `NEXGRID_BUS_FRONTEND` -> `bus.frontend`
    /// - `NEXGRID_COORDINATOR_DUPLICATE_POLICY` -> `coordinator.duplicate_policy`
    /// - `NEXGRID_SCHEDULER_CHUNKS_PER_TASK` -> `scheduler.chunks_per_task`
    /// - `NEXGRID_RUNTIME_SHUTDOWN_TIMEOUT_SECS` -> `runtime.shutdown_timeout_secs`
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.bus.apply_overrides(&lookup);

        if let Some(v) = lookup("NEXGRID_COORDINATOR_SOURCE") {
            self.coordinator.source = v;
        }
        override_parsed(&lookup, "NEXGRID_COORDINATOR_DUPLICATE_POLICY", &mut self.coordinator.duplicate_policy);
        override_parsed(&lookup, "NEXGRID_COORDINATOR_DEDUP_WINDOW", &mut self.coordinator.dedup_window);

        if let Some(v) = lookup("NEXGRID_AGGREGATOR_SOURCE") {
            self.aggregator.source = v;
        }

        if let Some(v) = lookup("NEXGRID_SCHEDULER_SOURCE") {
            self.scheduler.source = v;
        }
        override_parsed(&lookup, "NEXGRID_SCHEDULER_CHUNKS_PER_TASK", &mut self.scheduler.chunks_per_task);

        override_parsed(&lookup, "NEXGRID_RUNTIME_MAX_IN_FLIGHT", &mut self.runtime.max_in_flight);
        override_parsed(&lookup, "NEXGRID_RUNTIME_SHUTDOWN_TIMEOUT_SECS", &mut self.runtime.shutdown_timeout_secs);
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable config override"),
    }
}
