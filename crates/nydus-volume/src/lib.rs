//! # nydus-volume
//!
//! Descriptor types for mounting nydus image volumes.
//!
//! This crate provides:
//! - Bootstrap (RAFS metadata) format version detection
//! - dm-verity descriptor validation
//! - Kata virtual volume descriptors and their base64 transport encoding

#![warn(missing_docs)]

pub mod bootstrap;
pub mod verity;
pub mod volume;

pub use bootstrap::{BootstrapVersion, detect_fs_version, read_fs_version};
pub use verity::{HashAlgorithm, UnknownHashAlgorithm, VerityDescriptor, VerityError};
pub use volume::{
    DirectAssignedVolume, ImagePullVolume, KATA_VIRTUAL_VOLUME_OPTION_NAME, KataVirtualVolume,
    MetadataPayload, NydusImageVolume, VirtualVolume, VolumePayload, VolumeType,
};

/// Deserialize a JSON `null` as the type's default value.
///
/// Producers written against Go's `encoding/json` emit `null` for unset
/// strings, slices and numbers and read it back as the zero value.
pub(crate) fn null_as_default<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + serde::Deserialize<'de>,
    D: serde::de::Deserializer<'de>,
{
    Ok(<Option<T> as serde::Deserialize>::deserialize(deserializer)?.unwrap_or_default())
}
