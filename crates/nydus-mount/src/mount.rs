//! Mount specifications handed back to the container runtime.

use std::fmt;

use nydus_common::NydusResult;
use serde::{Deserialize, Serialize};

use crate::extra_option::{EXTRA_OPTION_KEY, ExtraOption};

/// Filesystem type handled by the `nydus-overlayfs` mount helper.
pub const NYDUS_OVERLAYFS_TYPE: &str = "fuse.nydus-overlayfs";

/// Source of every overlay mount.
pub const OVERLAY_SOURCE: &str = "overlay";

/// A single mount entry, in the shape containerd expects.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Filesystem type.
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Mount source.
    pub source: String,
    /// Mount options, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl MountSpec {
    /// A `fuse.nydus-overlayfs` mount with the given options.
    #[must_use]
    pub fn nydus_overlay(options: Vec<String>) -> Self {
        Self {
            fs_type: NYDUS_OVERLAYFS_TYPE.to_string(),
            source: OVERLAY_SOURCE.to_string(),
            options,
        }
    }

    /// Decode the extra option carried by this mount, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the extra option is malformed.
    pub fn extra_option(&self) -> NydusResult<Option<ExtraOption>> {
        ExtraOption::extract(&self.options).map(|(extra, _)| extra)
    }

    /// The options with the extra option's value masked, safe to log.
    #[must_use]
    pub fn redacted_options(&self) -> Vec<String> {
        let prefix = format!("{EXTRA_OPTION_KEY}=");
        self.options
            .iter()
            .map(|o| {
                if o.starts_with(&prefix) {
                    format!("{prefix}<redacted>")
                } else {
                    o.clone()
                }
            })
            .collect()
    }
}

impl fmt::Debug for MountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountSpec")
            .field("fs_type", &self.fs_type)
            .field("source", &self.source)
            .field("options", &self.redacted_options())
            .finish()
    }
}
