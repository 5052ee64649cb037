//! Kata virtual volumes.
//!
//! A virtual volume tells a VM based runtime how to provision a volume inside
//! the guest. It travels as base64 encoded JSON, usually as the value of the
//! [`KATA_VIRTUAL_VOLUME_OPTION_NAME`] mount option.
//!
//! Two forms are provided:
//! - [`KataVirtualVolume`] mirrors the JSON object field for field. It is what
//!   gets decoded from untrusted input and is the validation boundary.
//! - [`VirtualVolume`] binds the volume type to its payload, so a value of
//!   this type cannot carry a payload that does not belong to its type.
//!
//! Encoding never validates; decoding always does.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use nydus_common::{NydusError, NydusResult, ResultExt, ValidationRule};
use serde::{Deserialize, Serialize};

use crate::verity::VerityDescriptor;

/// Mount option key carrying an encoded virtual volume.
pub const KATA_VIRTUAL_VOLUME_OPTION_NAME: &str = "io.katacontainers.volume";

/// Kind of virtual volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    /// A host block device assigned directly to the guest.
    DirectBlock,
    /// A raw block image holding a whole container image.
    ImageRawBlock,
    /// A raw block image holding a single layer.
    LayerRawBlock,
    /// A nydus image exposed as a block device.
    ImageNydusBlock,
    /// A nydus layer exposed as a block device.
    LayerNydusBlock,
    /// A nydus image mounted through a filesystem daemon.
    ImageNydusFs,
    /// A nydus layer mounted through a filesystem daemon.
    LayerNydusFs,
    /// An image pulled by the guest itself.
    ImageGuestPull,
}

impl VolumeType {
    /// All known volume types.
    pub const ALL: [Self; 8] = [
        Self::DirectBlock,
        Self::ImageRawBlock,
        Self::LayerRawBlock,
        Self::ImageNydusBlock,
        Self::LayerNydusBlock,
        Self::ImageNydusFs,
        Self::LayerNydusFs,
        Self::ImageGuestPull,
    ];

    /// The wire name of this volume type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DirectBlock => "direct_block",
            Self::ImageRawBlock => "image_raw_block",
            Self::LayerRawBlock => "layer_raw_block",
            Self::ImageNydusBlock => "image_nydus_block",
            Self::LayerNydusBlock => "layer_nydus_block",
            Self::ImageNydusFs => "image_nydus_fs",
            Self::LayerNydusFs => "layer_nydus_fs",
            Self::ImageGuestPull => "image_guest_pull",
        }
    }

    /// Returns true for raw block volumes, which may carry dm-verity.
    #[must_use]
    pub const fn is_raw_block(&self) -> bool {
        matches!(self, Self::ImageRawBlock | Self::LayerRawBlock)
    }

    /// Returns true for volumes backed by a nydus image.
    #[must_use]
    pub const fn is_nydus(&self) -> bool {
        matches!(
            self,
            Self::ImageNydusBlock | Self::LayerNydusBlock | Self::ImageNydusFs | Self::LayerNydusFs
        )
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumeType {
    type Err = NydusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                NydusError::validation(
                    "parse volume type",
                    ValidationRule::InvalidVolume,
                    format!("unknown volume type {s:?}"),
                )
            })
    }
}

/// Wire form of the `direct_volume` and `image_pull` payloads.
///
/// `metadata` is optional on the wire; an absent or `null` map makes the
/// owning volume invalid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPayload {
    /// Free-form metadata for the guest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// Metadata for a directly assigned block device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectAssignedVolume {
    /// Free-form metadata for the guest.
    pub metadata: BTreeMap<String, String>,
}

/// Metadata for pulling an image inside the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePullVolume {
    /// Free-form metadata for the guest, such as the pull policy.
    pub metadata: BTreeMap<String, String>,
}

/// Nydus image information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NydusImageVolume {
    /// Serialized nydusd configuration.
    #[serde(deserialize_with = "crate::null_as_default")]
    pub config: String,
    /// Snapshot directory on the host.
    #[serde(deserialize_with = "crate::null_as_default")]
    pub snapshot_dir: String,
}

impl NydusImageVolume {
    /// Returns true if either the configuration or the snapshot directory is set.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.config.is_empty() || !self.snapshot_dir.is_empty()
    }
}

impl From<DirectAssignedVolume> for MetadataPayload {
    fn from(volume: DirectAssignedVolume) -> Self {
        Self {
            metadata: Some(volume.metadata),
        }
    }
}

impl From<ImagePullVolume> for MetadataPayload {
    fn from(volume: ImagePullVolume) -> Self {
        Self {
            metadata: Some(volume.metadata),
        }
    }
}

/// Virtual volume as it appears on the wire.
///
/// Every payload field is declarable; which one is meaningful depends on
/// `volume_type`. Absent optional fields are omitted when encoding. `null`
/// decodes like an absent field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KataVirtualVolume {
    /// Volume type name, see [`VolumeType`].
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub volume_type: String,
    /// Volume source, required for every type.
    #[serde(
        default,
        deserialize_with = "crate::null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub source: String,
    /// Filesystem type to mount the volume with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
    /// Mount options, in order.
    #[serde(
        default,
        deserialize_with = "crate::null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub options: Vec<String>,
    /// Payload for `direct_block`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_volume: Option<MetadataPayload>,
    /// Payload for `image_guest_pull`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull: Option<MetadataPayload>,
    /// Payload for the nydus volume types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nydus_image: Option<NydusImageVolume>,
    /// Optional dm-verity descriptor for raw block types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dm_verity: Option<VerityDescriptor>,
}

impl KataVirtualVolume {
    /// Check the volume against the validation table.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the first rule that failed.
    pub fn validate(&self) -> NydusResult<()> {
        self.check().map(drop)
    }

    /// Returns true if [`KataVirtualVolume::validate`] succeeds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Decode a volume from JSON and validate it.
    ///
    /// # Errors
    ///
    /// Returns an encoding error for malformed JSON or a schema mismatch and a
    /// validation error for a well-formed but invalid volume.
    pub fn from_json(data: &[u8]) -> NydusResult<Self> {
        let volume: Self = serde_json::from_slice(data).context("parse virtual volume JSON")?;
        volume.validate().context("parse virtual volume")?;
        Ok(volume)
    }

    /// Decode a volume from base64 encoded JSON and validate it.
    ///
    /// # Errors
    ///
    /// Returns an encoding error for malformed base64, see also
    /// [`KataVirtualVolume::from_json`].
    pub fn from_base64(option: &str) -> NydusResult<Self> {
        let data = BASE64
            .decode(option)
            .context("decode virtual volume base64")?;
        Self::from_json(&data)
    }

    /// Encode the volume as base64 encoded JSON.
    ///
    /// The volume is not validated; callers that need a guarantee must call
    /// [`KataVirtualVolume::validate`] first.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn encode_base64(&self) -> NydusResult<String> {
        let json = serde_json::to_vec(self).context("encode virtual volume")?;
        Ok(BASE64.encode(json))
    }

    /// Run the validation table and return the declared volume type.
    fn check(&self) -> NydusResult<VolumeType> {
        let volume_type: VolumeType = self.volume_type.parse()?;
        let context = format!("validate {volume_type} volume");
        let invalid = |message: &str| {
            NydusError::validation(context.clone(), ValidationRule::InvalidVolume, message)
        };

        let ignored = self.ignored_payloads(volume_type);
        if !ignored.is_empty() {
            tracing::debug!(%volume_type, ?ignored, "Ignoring payloads of other volume types");
        }

        let has_metadata =
            |payload: Option<&MetadataPayload>| payload.is_some_and(|p| p.metadata.is_some());
        match volume_type {
            VolumeType::DirectBlock if !has_metadata(self.direct_volume.as_ref()) => {
                return Err(invalid("direct_volume.metadata is required"));
            }
            VolumeType::ImageGuestPull if !has_metadata(self.image_pull.as_ref()) => {
                return Err(invalid("image_pull.metadata is required"));
            }
            t if t.is_nydus() && self.nydus_image.is_none() => {
                return Err(invalid("nydus_image is required"));
            }
            _ => {}
        }

        if self.source.is_empty() {
            return Err(invalid("source is empty"));
        }

        if let Some(nydus) = self.nydus_image.as_ref().filter(|_| volume_type.is_nydus()) {
            if !nydus.is_valid() {
                return Err(invalid("nydus_image needs a config or a snapshot_dir"));
            }
        }

        if let Some(verity) = self.dm_verity.as_ref().filter(|_| volume_type.is_raw_block()) {
            verity
                .validate()
                .map_err(|e| NydusError::from(e).context(&context))?;
        }

        Ok(volume_type)
    }

    fn ignored_payloads(&self, volume_type: VolumeType) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if self.direct_volume.is_some() && volume_type != VolumeType::DirectBlock {
            ignored.push("direct_volume");
        }
        if self.image_pull.is_some() && volume_type != VolumeType::ImageGuestPull {
            ignored.push("image_pull");
        }
        if self.nydus_image.is_some() && !volume_type.is_nydus() {
            ignored.push("nydus_image");
        }
        if self.dm_verity.is_some() && !volume_type.is_raw_block() {
            ignored.push("dm_verity");
        }
        ignored
    }
}

/// Payload of a virtual volume, tagged by volume type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumePayload {
    /// See [`VolumeType::DirectBlock`].
    DirectBlock(DirectAssignedVolume),
    /// See [`VolumeType::ImageRawBlock`].
    ImageRawBlock(Option<VerityDescriptor>),
    /// See [`VolumeType::LayerRawBlock`].
    LayerRawBlock(Option<VerityDescriptor>),
    /// See [`VolumeType::ImageNydusBlock`].
    ImageNydusBlock(NydusImageVolume),
    /// See [`VolumeType::LayerNydusBlock`].
    LayerNydusBlock(NydusImageVolume),
    /// See [`VolumeType::ImageNydusFs`].
    ImageNydusFs(NydusImageVolume),
    /// See [`VolumeType::LayerNydusFs`].
    LayerNydusFs(NydusImageVolume),
    /// See [`VolumeType::ImageGuestPull`].
    ImageGuestPull(ImagePullVolume),
}

impl VolumePayload {
    /// The volume type this payload belongs to.
    #[must_use]
    pub const fn volume_type(&self) -> VolumeType {
        match self {
            Self::DirectBlock(_) => VolumeType::DirectBlock,
            Self::ImageRawBlock(_) => VolumeType::ImageRawBlock,
            Self::LayerRawBlock(_) => VolumeType::LayerRawBlock,
            Self::ImageNydusBlock(_) => VolumeType::ImageNydusBlock,
            Self::LayerNydusBlock(_) => VolumeType::LayerNydusBlock,
            Self::ImageNydusFs(_) => VolumeType::ImageNydusFs,
            Self::LayerNydusFs(_) => VolumeType::LayerNydusFs,
            Self::ImageGuestPull(_) => VolumeType::ImageGuestPull,
        }
    }

    /// The nydus image information, for nydus volume types.
    #[must_use]
    pub const fn nydus_image(&self) -> Option<&NydusImageVolume> {
        match self {
            Self::ImageNydusBlock(n)
            | Self::LayerNydusBlock(n)
            | Self::ImageNydusFs(n)
            | Self::LayerNydusFs(n) => Some(n),
            _ => None,
        }
    }

    /// The dm-verity descriptor, for raw block volume types.
    #[must_use]
    pub const fn dm_verity(&self) -> Option<&VerityDescriptor> {
        match self {
            Self::ImageRawBlock(v) | Self::LayerRawBlock(v) => v.as_ref(),
            _ => None,
        }
    }
}

/// A virtual volume with its payload bound to its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualVolume {
    /// Volume source, required for every type.
    pub source: String,
    /// Filesystem type to mount the volume with.
    pub fs_type: Option<String>,
    /// Mount options, in order.
    pub options: Vec<String>,
    /// Type specific payload.
    pub payload: VolumePayload,
}

impl VirtualVolume {
    /// Create a volume with no filesystem type and no options.
    pub fn new(source: impl Into<String>, payload: VolumePayload) -> Self {
        Self {
            source: source.into(),
            fs_type: None,
            options: Vec::new(),
            payload,
        }
    }

    /// Set the filesystem type.
    #[must_use]
    pub fn with_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.fs_type = Some(fs_type.into());
        self
    }

    /// Append a mount option.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// The volume type.
    #[must_use]
    pub const fn volume_type(&self) -> VolumeType {
        self.payload.volume_type()
    }

    /// Check the rules that the payload type alone does not guarantee.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty source, an empty nydus payload
    /// or an invalid dm-verity descriptor.
    pub fn validate(&self) -> NydusResult<()> {
        let context = format!("validate {} volume", self.volume_type());

        if self.source.is_empty() {
            return Err(NydusError::validation(
                context,
                ValidationRule::InvalidVolume,
                "source is empty",
            ));
        }

        if let Some(nydus) = self.payload.nydus_image() {
            if !nydus.is_valid() {
                return Err(NydusError::validation(
                    context,
                    ValidationRule::InvalidVolume,
                    "nydus_image needs a config or a snapshot_dir",
                ));
            }
        }

        if let Some(verity) = self.payload.dm_verity() {
            verity
                .validate()
                .map_err(|e| NydusError::from(e).context(&context))?;
        }

        Ok(())
    }

    /// Returns true if [`VirtualVolume::validate`] succeeds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Decode a volume from JSON and validate it.
    ///
    /// # Errors
    ///
    /// See [`KataVirtualVolume::from_json`].
    pub fn from_json(data: &[u8]) -> NydusResult<Self> {
        let raw: KataVirtualVolume =
            serde_json::from_slice(data).context("parse virtual volume JSON")?;
        Self::try_from(raw).context("parse virtual volume")
    }

    /// Decode a volume from base64 encoded JSON and validate it.
    ///
    /// # Errors
    ///
    /// See [`KataVirtualVolume::from_base64`].
    pub fn from_base64(option: &str) -> NydusResult<Self> {
        let data = BASE64
            .decode(option)
            .context("decode virtual volume base64")?;
        Self::from_json(&data)
    }

    /// Encode the volume as base64 encoded JSON, without validating it.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn encode_base64(&self) -> NydusResult<String> {
        KataVirtualVolume::from(self.clone()).encode_base64()
    }

    /// Encode the volume as a `io.katacontainers.volume=<base64>` mount option.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn to_mount_option(&self) -> NydusResult<String> {
        Ok(format!(
            "{KATA_VIRTUAL_VOLUME_OPTION_NAME}={}",
            self.encode_base64()?
        ))
    }

    /// Find and decode the virtual volume option in a mount option list.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is present but cannot be decoded or is invalid.
    pub fn from_mount_options<S: AsRef<str>>(options: &[S]) -> NydusResult<Option<Self>> {
        let prefix = format!("{KATA_VIRTUAL_VOLUME_OPTION_NAME}=");
        options
            .iter()
            .find_map(|o| o.as_ref().strip_prefix(prefix.as_str()))
            .map(Self::from_base64)
            .transpose()
    }
}

impl TryFrom<KataVirtualVolume> for VirtualVolume {
    type Error = NydusError;

    fn try_from(raw: KataVirtualVolume) -> Result<Self, Self::Error> {
        let volume_type = raw.check()?;

        // The table has checked that the payload of `volume_type` is present.
        let metadata = |payload: Option<MetadataPayload>| {
            payload.and_then(|p| p.metadata).unwrap_or_default()
        };
        let nydus = raw.nydus_image.unwrap_or_default();

        let payload = match volume_type {
            VolumeType::DirectBlock => VolumePayload::DirectBlock(DirectAssignedVolume {
                metadata: metadata(raw.direct_volume),
            }),
            VolumeType::ImageRawBlock => VolumePayload::ImageRawBlock(raw.dm_verity),
            VolumeType::LayerRawBlock => VolumePayload::LayerRawBlock(raw.dm_verity),
            VolumeType::ImageNydusBlock => VolumePayload::ImageNydusBlock(nydus),
            VolumeType::LayerNydusBlock => VolumePayload::LayerNydusBlock(nydus),
            VolumeType::ImageNydusFs => VolumePayload::ImageNydusFs(nydus),
            VolumeType::LayerNydusFs => VolumePayload::LayerNydusFs(nydus),
            VolumeType::ImageGuestPull => VolumePayload::ImageGuestPull(ImagePullVolume {
                metadata: metadata(raw.image_pull),
            }),
        };

        Ok(Self {
            source: raw.source,
            fs_type: raw.fs_type,
            options: raw.options,
            payload,
        })
    }
}

impl From<VirtualVolume> for KataVirtualVolume {
    fn from(volume: VirtualVolume) -> Self {
        let mut raw = Self {
            volume_type: volume.volume_type().as_str().to_string(),
            source: volume.source,
            fs_type: volume.fs_type,
            options: volume.options,
            ..Self::default()
        };

        match volume.payload {
            VolumePayload::DirectBlock(direct) => raw.direct_volume = Some(direct.into()),
            VolumePayload::ImageRawBlock(verity) | VolumePayload::LayerRawBlock(verity) => {
                raw.dm_verity = verity;
            }
            VolumePayload::ImageNydusBlock(nydus)
            | VolumePayload::LayerNydusBlock(nydus)
            | VolumePayload::ImageNydusFs(nydus)
            | VolumePayload::LayerNydusFs(nydus) => raw.nydus_image = Some(nydus),
            VolumePayload::ImageGuestPull(pull) => raw.image_pull = Some(pull.into()),
        }

        raw
    }
}
