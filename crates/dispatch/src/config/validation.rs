use crate::error::DispatchError;

use super::types::{DuplicatePolicy, GridConfig};

impl GridConfig {
    /// Validate the config: endpoints, non-zero limits, source names.
    pub fn validate(&self) -> Result<(), DispatchError> {
        self.bus
            .validate()
            .map_err(|e| DispatchError::Config(e.to_string()))?;
        self.validate_sources()?;
        self.validate_limits()?;
        Ok(())
    }

    /// Every component needs a source name to stamp on its events.
    fn validate_sources(&self) -> Result<(), DispatchError> {
        for (section, source) in [
            ("coordinator", &self.coordinator.source),
            ("aggregator", &self.aggregator.source),
            ("scheduler", &self.scheduler.source),
        ] {
            if source.trim().is_empty() {
                return Err(DispatchError::Config(format!(
                    "{section}.source must not be empty"
                )));
            }
        }
        Ok(())
    }

    fn validate_limits(&self) -> Result<(), DispatchError> {
        if self.scheduler.chunks_per_task == 0 {
            return Err(DispatchError::Config(
                "scheduler.chunks_per_task must be at least 1".into(),
            ));
        }
        if self.runtime.max_in_flight == 0 {
            return Err(DispatchError::Config(
                "runtime.max_in_flight must be at least 1".into(),
            ));
        }
        if self.coordinator.duplicate_policy == DuplicatePolicy::Reject
            && self.coordinator.dedup_window == 0
        {
            return Err(DispatchError::Config(
                "coordinator.dedup_window must be at least 1 when duplicate_policy is 'reject'"
                    .into(),
            ));
        }
        Ok(())
    }
}
