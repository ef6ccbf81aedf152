//! Engine configuration, parsed from `nexgrid.toml` with environment overrides.

mod loading;
mod types;
mod validation;


pub use types::{
    AggregatorConfig, CoordinatorConfig, DuplicatePolicy, GridConfig, RuntimeConfig,
    SchedulerConfig,
};
