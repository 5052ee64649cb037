//! Bootstrap file resolution.

use std::io;
use std::path::PathBuf;

use nydus_common::{NydusError, NydusPaths, NydusResult, SnapshotId};

/// Resolves the bootstrap file of a nydus meta snapshot.
pub trait BootstrapResolver: Send + Sync {
    /// Path of the bootstrap file of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot has no bootstrap.
    fn bootstrap_file(&self, snapshot: &SnapshotId) -> NydusResult<PathBuf>;
}

/// Resolves bootstraps in the snapshotter's on-disk layout.
#[derive(Debug, Clone, Default)]
pub struct LayoutBootstrapResolver {
    paths: NydusPaths,
}

impl LayoutBootstrapResolver {
    /// Create a resolver for the layout under `paths`.
    #[must_use]
    pub const fn new(paths: NydusPaths) -> Self {
        Self { paths }
    }
}

impl BootstrapResolver for LayoutBootstrapResolver {
    fn bootstrap_file(&self, snapshot: &SnapshotId) -> NydusResult<PathBuf> {
        let bootstrap = self.paths.bootstrap(snapshot);
        if bootstrap.is_file() {
            return Ok(bootstrap);
        }

        let legacy = self.paths.legacy_bootstrap(snapshot);
        if legacy.is_file() {
            tracing::debug!(%snapshot, path = %legacy.display(), "Using legacy bootstrap location");
            return Ok(legacy);
        }

        Err(NydusError::io(
            format!("find bootstrap for snapshot {snapshot}"),
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("neither {} nor {} exists", bootstrap.display(), legacy.display()),
            ),
        ))
    }
}
