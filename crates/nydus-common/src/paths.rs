//! Standard filesystem layout of the nydus snapshotter.

use std::path::PathBuf;

use once_cell::sync::Lazy;

use crate::id::{DaemonId, SnapshotId};

/// Default root directory for snapshotter data.
pub static NYDUS_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("NYDUS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/containerd-nydus"))
});

/// Bootstrap location relative to a snapshot's `fs` directory.
pub const BOOTSTRAP_FILE: &str = "image/image.boot";

/// Bootstrap location used by older converters.
pub const LEGACY_BOOTSTRAP_FILE: &str = "image.boot";

/// Per-daemon and per-instance configuration file name.
pub const CONFIG_FILE: &str = "config.json";

/// Paths used by the snapshotter and its daemons.
#[derive(Debug, Clone)]
pub struct NydusPaths {
    /// Root data directory (default: /var/lib/containerd-nydus).
    pub root: PathBuf,
}

impl NydusPaths {
    /// Create paths with the default root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding all snapshots.
    #[must_use]
    pub fn snapshots(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Directory for a specific snapshot.
    #[must_use]
    pub fn snapshot_dir(&self, id: &SnapshotId) -> PathBuf {
        self.snapshots().join(id.as_str())
    }

    /// Lower filesystem directory of a snapshot.
    #[must_use]
    pub fn snapshot_fs(&self, id: &SnapshotId) -> PathBuf {
        self.snapshot_dir(id).join("fs")
    }

    /// Bootstrap file of a nydus meta snapshot.
    #[must_use]
    pub fn bootstrap(&self, id: &SnapshotId) -> PathBuf {
        self.snapshot_fs(id).join(BOOTSTRAP_FILE)
    }

    /// Bootstrap file location written by older converters.
    #[must_use]
    pub fn legacy_bootstrap(&self, id: &SnapshotId) -> PathBuf {
        self.snapshot_fs(id).join(LEGACY_BOOTSTRAP_FILE)
    }

    /// Directory holding daemon configuration.
    #[must_use]
    pub fn config(&self) -> PathBuf {
        self.root.join("config")
    }

    /// Configuration directory of a daemon.
    #[must_use]
    pub fn daemon_config_dir(&self, daemon: &DaemonId) -> PathBuf {
        self.config().join(daemon.as_str())
    }

    /// Create the snapshot and configuration directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.snapshots())?;
        std::fs::create_dir_all(self.config())?;
        Ok(())
    }
}

impl Default for NydusPaths {
    fn default() -> Self {
        Self {
            root: NYDUS_ROOT.clone(),
        }
    }
}
