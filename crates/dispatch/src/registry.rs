//! Live map of worker id → declared capability.
//!
//! Updates take the write lock; matching works on a [`RegistrySnapshot`] copied
//! under the read lock, so a match never observes a half-applied update and no
//! lock is held while events are published.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use nexgrid_bus::messages::Capability;

/// Concurrent capability registry. Last write wins; entries are never merged.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    workers: RwLock<HashMap<String, Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the capability of `worker_id`. Returns the previous value, if any.
    pub fn update(&self, worker_id: impl Into<String>, capability: Capability) -> Option<Capability> {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(worker_id.into(), capability)
    }

    /// Point-in-time copy for matching.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        RegistrySnapshot {
            workers: workers
                .iter()
                .map(|(id, cap)| (id.clone(), cap.clone()))
                .collect(),
        }
    }

    pub fn get(&self, worker_id: &str) -> Option<Capability> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(worker_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable, id-ordered copy of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    workers: BTreeMap<String, Capability>,
}

impl RegistrySnapshot {
    /// Workers in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Capability)> {
        self.workers.iter().map(|(id, cap)| (id.as_str(), cap))
    }

    pub fn get(&self, worker_id: &str) -> Option<&Capability> {
        self.workers.get(worker_id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Capability)> for RegistrySnapshot {
    fn from_iter<I: IntoIterator<Item = (S, Capability)>>(iter: I) -> Self {
        Self {
            workers: iter.into_iter().map(|(id, cap)| (id.into(), cap)).collect(),
        }
    }
}
