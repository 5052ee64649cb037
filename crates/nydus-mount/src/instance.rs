//! RAFS instances: which daemon serves which nydus meta snapshot.

use std::collections::HashMap;

use nydus_common::{DaemonId, SnapshotId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A RAFS filesystem instance served by a daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RafsInstance {
    /// The meta snapshot holding the bootstrap.
    pub snapshot_id: SnapshotId,
    /// The daemon serving the instance.
    pub daemon_id: DaemonId,
}

/// Lookup of RAFS instances by meta snapshot.
pub trait InstanceCache: Send + Sync {
    /// Get the instance of a meta snapshot, `None` if unknown.
    fn get(&self, snapshot: &SnapshotId) -> Option<RafsInstance>;
}

/// In-memory [`InstanceCache`].
#[derive(Debug, Default)]
pub struct MemoryInstanceCache {
    instances: RwLock<HashMap<SnapshotId, RafsInstance>>,
}

impl MemoryInstanceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance, replacing any instance for the same snapshot.
    pub fn insert(&self, instance: RafsInstance) -> Option<RafsInstance> {
        self.instances
            .write()
            .insert(instance.snapshot_id.clone(), instance)
    }

    /// Remove the instance of a snapshot.
    pub fn remove(&self, snapshot: &SnapshotId) -> Option<RafsInstance> {
        self.instances.write().remove(snapshot)
    }

    /// Number of cached instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

impl InstanceCache for MemoryInstanceCache {
    fn get(&self, snapshot: &SnapshotId) -> Option<RafsInstance> {
        self.instances.read().get(snapshot).cloned()
    }
}
