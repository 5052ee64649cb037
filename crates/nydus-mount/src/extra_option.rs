//! The `extraoption` mount option.
//!
//! `nydus-overlayfs` cannot learn the bootstrap, daemon configuration and
//! snapshot directory from the overlay options alone, so the assembler packs
//! them into one base64 encoded JSON option that the helper strips before
//! calling `mount(2)`.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use nydus_common::{NydusError, NydusResult, ResultExt};
use nydus_volume::BootstrapVersion;
use serde::{Deserialize, Serialize};

/// Option key of the encoded record.
pub const EXTRA_OPTION_KEY: &str = "extraoption";

/// Context for the mount helper.
///
/// `config` may embed registry credentials; the [`fmt::Debug`] impl only
/// reports its length.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraOption {
    /// Bootstrap file path.
    pub source: String,
    /// Serialized daemon configuration.
    pub config: String,
    /// Snapshot directory.
    #[serde(rename = "snapshotdir")]
    pub snapshot_dir: String,
    /// Bootstrap format version.
    pub fs_version: BootstrapVersion,
}

impl ExtraOption {
    /// Encode the record as base64 encoded JSON.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn encode(&self) -> NydusResult<String> {
        let json = serde_json::to_vec(self).context("marshal extra option")?;
        Ok(BASE64.encode(json))
    }

    /// Encode the record as an `extraoption=<base64>` mount option.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn to_mount_option(&self) -> NydusResult<String> {
        Ok(format!("{EXTRA_OPTION_KEY}={}", self.encode()?))
    }

    /// Decode an `extraoption=<base64>` mount option.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if the option has another key, is not base64,
    /// or does not hold the expected JSON object.
    pub fn from_mount_option(option: &str) -> NydusResult<Self> {
        let encoded = option
            .strip_prefix(EXTRA_OPTION_KEY)
            .and_then(|rest| rest.strip_prefix('='))
            .ok_or_else(|| {
                NydusError::encoding("decode extra option", "option is not an extraoption")
            })?;
        let json = BASE64.decode(encoded).context("decode extra option base64")?;
        serde_json::from_slice(&json).context("parse extra option JSON")
    }

    /// Split a mount option list into the decoded extra option, if any, and
    /// the remaining options in their original order.
    ///
    /// # Errors
    ///
    /// Returns an error if the extra option is present but malformed.
    pub fn extract<S: AsRef<str>>(options: &[S]) -> NydusResult<(Option<Self>, Vec<String>)> {
        let mut extra = None;
        let mut rest = Vec::with_capacity(options.len());

        for option in options {
            let option = option.as_ref();
            if option.starts_with(&format!("{EXTRA_OPTION_KEY}=")) {
                extra = Some(Self::from_mount_option(option)?);
            } else {
                rest.push(option.to_string());
            }
        }

        Ok((extra, rest))
    }
}

impl fmt::Debug for ExtraOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtraOption")
            .field("source", &self.source)
            .field("config", &format_args!("<{} bytes>", self.config.len()))
            .field("snapshot_dir", &self.snapshot_dir)
            .field("fs_version", &self.fs_version)
            .finish()
    }
}
