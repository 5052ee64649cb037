//! nydusd instances and the registry they are looked up in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nydus_common::paths::CONFIG_FILE;
use nydus_common::{DaemonId, NydusPaths, NydusResult, SnapshotId};
use parking_lot::RwLock;

use crate::config::DaemonConfig;

/// A nydusd instance serving one or more snapshots.
#[derive(Debug, Clone)]
pub struct Daemon {
    id: DaemonId,
    shared: bool,
    config: DaemonConfig,
    config_dir: PathBuf,
}

impl Daemon {
    /// A daemon dedicated to a single snapshot, configured by `config`.
    #[must_use]
    pub fn dedicated(id: DaemonId, config: DaemonConfig, paths: &NydusPaths) -> Self {
        let config_dir = paths.daemon_config_dir(&id);
        Self {
            id,
            shared: false,
            config,
            config_dir,
        }
    }

    /// A daemon shared by many snapshots. Each snapshot mounted through it
    /// has its own configuration file under the daemon's configuration directory.
    #[must_use]
    pub fn shared(id: DaemonId, config: DaemonConfig, paths: &NydusPaths) -> Self {
        Self {
            shared: true,
            ..Self::dedicated(id, config, paths)
        }
    }

    /// Daemon ID.
    #[must_use]
    pub const fn id(&self) -> &DaemonId {
        &self.id
    }

    /// Returns true if the daemon serves more than one snapshot.
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.shared
    }

    /// The daemon's own configuration.
    #[must_use]
    pub const fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Configuration directory of this daemon.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The daemon's own configuration file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Configuration file of one RAFS instance served by a shared daemon.
    #[must_use]
    pub fn instance_config_file(&self, snapshot: &SnapshotId) -> PathBuf {
        self.config_dir.join(snapshot.as_str()).join(CONFIG_FILE)
    }
}

/// Lookup of daemons by ID.
pub trait DaemonRegistry: Send + Sync {
    /// Get a daemon by ID, `None` if it is not registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry itself cannot be queried.
    fn get(&self, id: &DaemonId) -> NydusResult<Option<Arc<Daemon>>>;
}

/// In-memory [`DaemonRegistry`].
#[derive(Debug, Default)]
pub struct MemoryDaemonRegistry {
    daemons: RwLock<HashMap<DaemonId, Arc<Daemon>>>,
}

impl MemoryDaemonRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a daemon, replacing any daemon with the same ID.
    pub fn insert(&self, daemon: Daemon) -> Option<Arc<Daemon>> {
        tracing::debug!(daemon = %daemon.id, shared = daemon.shared, "Registering daemon");
        self.daemons.write().insert(daemon.id.clone(), Arc::new(daemon))
    }

    /// Remove a daemon.
    pub fn remove(&self, id: &DaemonId) -> Option<Arc<Daemon>> {
        self.daemons.write().remove(id)
    }

    /// Number of registered daemons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.daemons.read().len()
    }

    /// Returns true if no daemon is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.daemons.read().is_empty()
    }
}

impl DaemonRegistry for MemoryDaemonRegistry {
    fn get(&self, id: &DaemonId) -> NydusResult<Option<Arc<Daemon>>> {
        Ok(self.daemons.read().get(id).cloned())
    }
}
