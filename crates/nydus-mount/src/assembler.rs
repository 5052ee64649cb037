//! Assembly of `fuse.nydus-overlayfs` mounts.
//!
//! A container rootfs built on a nydus image is an overlay whose lowest layer
//! is the RAFS filesystem served by nydusd. The kernel overlay driver knows
//! nothing about nydusd, so the assembler hands the runtime a mount of type
//! `fuse.nydus-overlayfs` whose options carry an `extraoption` describing the
//! bootstrap and the daemon configuration.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nydus_common::{DaemonId, NydusError, NydusPaths, NydusResult, SnapshotId};
use nydus_volume::{BootstrapVersion, read_fs_version};

use crate::config::DaemonConfig;
use crate::daemon::{Daemon, DaemonRegistry};
use crate::extra_option::ExtraOption;
use crate::instance::InstanceCache;
use crate::layout::{BootstrapResolver, LayoutBootstrapResolver};
use crate::mount::MountSpec;

/// A request to mount a container snapshot on top of a nydus image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// The writable container snapshot.
    pub snapshot_id: SnapshotId,
    /// The meta snapshot holding the image bootstrap.
    pub meta_snapshot_id: SnapshotId,
    /// Overlay options (`lowerdir`, `upperdir`, `workdir`, ...).
    pub overlay_options: Vec<String>,
}

impl MountRequest {
    /// Create a request without overlay options.
    #[must_use]
    pub const fn new(snapshot_id: SnapshotId, meta_snapshot_id: SnapshotId) -> Self {
        Self {
            snapshot_id,
            meta_snapshot_id,
            overlay_options: Vec::new(),
        }
    }

    /// Append an overlay option.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.overlay_options.push(option.into());
        self
    }
}

/// Builds mount specifications from the snapshotter's state.
pub struct MountAssembler {
    paths: NydusPaths,
    bootstraps: Arc<dyn BootstrapResolver>,
    daemons: Arc<dyn DaemonRegistry>,
    instances: Arc<dyn InstanceCache>,
}

impl MountAssembler {
    /// Create an assembler from its collaborators.
    #[must_use]
    pub fn new(
        paths: NydusPaths,
        bootstraps: Arc<dyn BootstrapResolver>,
        daemons: Arc<dyn DaemonRegistry>,
        instances: Arc<dyn InstanceCache>,
    ) -> Self {
        Self {
            paths,
            bootstraps,
            daemons,
            instances,
        }
    }

    /// Create an assembler resolving bootstraps in the on-disk layout under `paths`.
    #[must_use]
    pub fn with_layout(
        paths: NydusPaths,
        daemons: Arc<dyn DaemonRegistry>,
        instances: Arc<dyn InstanceCache>,
    ) -> Self {
        let bootstraps = Arc::new(LayoutBootstrapResolver::new(paths.clone()));
        Self::new(paths, bootstraps, daemons, instances)
    }

    /// Directory of a snapshot.
    #[must_use]
    pub fn snapshot_dir(&self, snapshot: &SnapshotId) -> PathBuf {
        self.paths.snapshot_dir(snapshot)
    }

    /// Build the `fuse.nydus-overlayfs` mount for a container snapshot.
    ///
    /// The returned mount carries the request's overlay options in order,
    /// followed by `extraoption=<base64 JSON>`.
    ///
    /// # Errors
    ///
    /// - `Io` if the bootstrap is missing or unreadable
    /// - `Resolution` if the RAFS instance, its daemon, or a shared daemon's
    ///   instance configuration cannot be found
    /// - `Format` if the bootstrap is neither RAFS v5 nor v6
    /// - `Encoding` if the configuration or extra option cannot be serialized
    pub fn remote_mount_with_extra_options(
        &self,
        request: &MountRequest,
    ) -> NydusResult<Vec<MountSpec>> {
        let context = format!("remote mount for snapshot {}", request.snapshot_id);
        self.assemble(request).map_err(|e| e.context(&context))
    }

    fn assemble(&self, request: &MountRequest) -> NydusResult<Vec<MountSpec>> {
        let meta = &request.meta_snapshot_id;
        let source = self.bootstraps.bootstrap_file(meta)?;

        let instance = self.instances.get(meta).ok_or_else(|| {
            NydusError::resolution(
                format!("find RAFS instance for snapshot {meta}"),
                "no instance is cached",
            )
        })?;
        let daemon = self.daemon(&instance.daemon_id)?;

        let config = if daemon.is_shared() {
            let path = daemon.instance_config_file(&instance.snapshot_id);
            DaemonConfig::load(&path).map_err(|e| {
                NydusError::resolution(
                    format!("load instance configuration {}", path.display()),
                    e.to_string(),
                )
            })?
        } else {
            daemon.config().clone()
        };
        let config = config.dump_string()?;

        let fs_version = bootstrap_version(&source)?;

        tracing::debug!(
            snapshot = %request.snapshot_id,
            meta_snapshot = %meta,
            daemon = %daemon.id(),
            options = ?request.overlay_options,
            "Assembling nydus overlay mount"
        );

        let extra = ExtraOption {
            source: source.to_string_lossy().into_owned(),
            config,
            snapshot_dir: self
                .snapshot_dir(&request.snapshot_id)
                .to_string_lossy()
                .into_owned(),
            fs_version,
        };

        let mut options = request.overlay_options.clone();
        options.push(extra.to_mount_option()?);

        Ok(vec![MountSpec::nydus_overlay(options)])
    }

    fn daemon(&self, id: &DaemonId) -> NydusResult<Arc<Daemon>> {
        let context = format!("get daemon with ID {id}");
        match self.daemons.get(id) {
            Ok(Some(daemon)) => Ok(daemon),
            Ok(None) => Err(NydusError::resolution(context, "daemon is not registered")),
            Err(e) => Err(NydusError::resolution(context, e.to_string())),
        }
    }
}

impl std::fmt::Debug for MountAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountAssembler")
            .field("root", &self.paths.root)
            .finish_non_exhaustive()
    }
}

/// Detect the format of a bootstrap file. The file is closed on return.
fn bootstrap_version(path: &Path) -> NydusResult<BootstrapVersion> {
    let file =
        File::open(path).map_err(|e| NydusError::io(format!("open bootstrap {}", path.display()), e))?;
    read_fs_version(&file).map_err(|e| e.context(path.display()))
}
