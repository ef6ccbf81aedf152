//! Worker selection: hard filtering on `min`, ranking on `preferred`.
//!
//! Selection is fully deterministic. Candidates are materialized as a list and
//! ordered by `(score desc, worker_id asc)`; map iteration order never decides.

use nexgrid_bus::messages::{Capability, Requirements};

use crate::error::NoWorkerError;
use crate::registry::RegistrySnapshot;

const SCORE_RESOURCE: u32 = 1;
const SCORE_FLAG: u32 = 2;
const SCORE_WEBGPU: u32 = 5;
const SCORE_GPU_BACKEND: u32 = 10;

/// Pick a worker for `requirements` from `snapshot`.
pub fn find_best_worker(
    snapshot: &RegistrySnapshot,
    requirements: &Requirements,
) -> Result<String, NoWorkerError> {
    let Some(min) = &requirements.min else {
        return first_by_id(snapshot.iter().map(|(id, _)| id))
            .ok_or(NoWorkerError::NoWorkersAvailable);
    };

    let candidates: Vec<(&str, &Capability)> = snapshot
        .iter()
        .filter(|(_, cap)| satisfies_min(cap, min))
        .collect();

    match candidates.as_slice() {
        [] => return Err(NoWorkerError::NoneSatisfiesMinimum),
        [(only, _)] => return Ok(only.to_string()),
        _ => {}
    }

    let Some(preferred) = &requirements.preferred else {
        return first_by_id(candidates.iter().map(|(id, _)| *id))
            .ok_or(NoWorkerError::NoneSatisfiesMinimum);
    };

    let mut scored: Vec<(u32, &str)> = candidates
        .iter()
        .map(|(id, cap)| (score(cap, preferred), *id))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    scored
        .first()
        .map(|(_, id)| id.to_string())
        .ok_or(NoWorkerError::NoneSatisfiesMinimum)
}

fn first_by_id<'a>(ids: impl Iterator<Item = &'a str>) -> Option<String> {
    ids.min().map(str::to_string)
}

/// True iff `candidate` meets every constraint in `min`.
pub fn satisfies_min(candidate: &Capability, min: &Capability) -> bool {
    let flags_ok = (!min.wasm || candidate.wasm)
        && (!min.threads || candidate.threads)
        && (!min.simd || candidate.simd)
        && (!min.webgpu || candidate.webgpu);
    if !flags_ok {
        return false;
    }

    if candidate.cpu_cores < min.cpu_cores || candidate.memory_mb < min.memory_mb {
        return false;
    }

    match (&min.gpu, &candidate.gpu) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(required), Some(offered)) => {
            (required.backend.is_empty() || required.backend == offered.backend)
                && required.features.is_subset(&offered.features)
        }
    }
}

/// Preference score of `candidate`; higher is better.
pub fn score(candidate: &Capability, preferred: &Capability) -> u32 {
    let mut score = 0;

    if candidate.cpu_cores > preferred.cpu_cores {
        score += SCORE_RESOURCE;
    }
    if candidate.memory_mb > preferred.memory_mb {
        score += SCORE_RESOURCE;
    }

    for (wanted, offered) in [
        (preferred.wasm, candidate.wasm),
        (preferred.threads, candidate.threads),
        (preferred.simd, candidate.simd),
    ] {
        if wanted && offered {
            score += SCORE_FLAG;
        }
    }
    if preferred.webgpu && candidate.webgpu {
        score += SCORE_WEBGPU;
    }

    if let (Some(wanted), Some(offered)) = (&preferred.gpu, &candidate.gpu) {
        if !wanted.backend.is_empty() && wanted.backend == offered.backend {
            score += SCORE_GPU_BACKEND;
        }
    }

    score
}
