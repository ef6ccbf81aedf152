//! Structural and policy checks on incoming dispatch requests.

use nexgrid_bus::messages::{ComputeEnvelope, Requirements};
use tracing::warn;

use crate::error::ValidationError;

pub const RULE_ENVELOPE_REQUIRED_FIELDS: &str = "rule:envelope:required_fields";
pub const RULE_DATAREF_ONE_BODY: &str = "rule:dataref:exactly_one_body";
pub const RULE_GPU_REQUIREMENT: &str = "rule:requirements:gpu_min_specified";
pub const RULE_MODULE_INTEGRITY: &str = "rule:module:hash_required_for_remote_uri";

const LOCAL_MODULE_SCHEME: &str = "file://";

/// Validate `envelope`; the first failing rule wins.
///
/// On success returns the (now known to be present) requirements. A GPU
/// minimum without a backend is legal and only logged.
pub fn validate_envelope(envelope: &ComputeEnvelope) -> Result<&Requirements, ValidationError> {
    let requirements = match &envelope.requirements {
        Some(requirements) if !envelope.task_id.is_empty() => requirements,
        _ => return Err(ValidationError::MissingRequiredFields),
    };

    if envelope.inputs.len() != 1 {
        return Err(ValidationError::InputCount {
            got: envelope.inputs.len(),
        });
    }

    if let Some(gpu) = requirements.min.as_ref().and_then(|min| min.gpu.as_ref()) {
        if gpu.backend.is_empty() {
            warn!(
                task_id = %envelope.task_id,
                rule = RULE_GPU_REQUIREMENT,
                "GPU requirement has no backend; any GPU backend will match"
            );
        }
    }

    if let Some(module) = &envelope.module {
        let hash_missing = module.hash.as_deref().map_or(true, str::is_empty);
        if !module.uri.is_empty() && !module.uri.starts_with(LOCAL_MODULE_SCHEME) && hash_missing {
            return Err(ValidationError::MissingModuleHash {
                uri: module.uri.clone(),
            });
        }
    }

    Ok(requirements)
}
