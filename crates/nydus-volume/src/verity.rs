//! dm-verity descriptors for raw block volumes.
//!
//! A [`VerityDescriptor`] describes the hash tree appended to a raw block
//! image. The guest uses it to set up a dm-verity target, so it is validated
//! before the volume is accepted.

use std::fmt;
use std::str::FromStr;

use nydus_common::{NydusError, NydusResult, ResultExt, ValidationRule};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest data or hash block size accepted by dm-verity.
pub const MIN_BLOCK_SIZE: u64 = 1 << 9;
/// Largest data or hash block size accepted by dm-verity.
pub const MAX_BLOCK_SIZE: u64 = 1 << 19;

/// Hash algorithm of a dm-verity tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-1, 40 hex characters.
    Sha1,
    /// SHA-256, 64 hex characters.
    Sha256,
}

impl HashAlgorithm {
    /// Length of a hex encoded root hash for this algorithm.
    #[must_use]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha1 => 40,
            Self::Sha256 => 64,
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = UnknownHashAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            _ => Err(UnknownHashAlgorithm {
                name: s.to_string(),
            }),
        }
    }
}

/// A hash algorithm name other than sha1 or sha256.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported hash algorithm {name:?}")]
pub struct UnknownHashAlgorithm {
    /// The name as given.
    pub name: String,
}

/// A rule violated by a [`VerityDescriptor`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerityError {
    /// The hash algorithm is not sha1 or sha256.
    #[error("{source} for dm-verity device {hash}")]
    UnsupportedAlgorithm {
        /// The rejected algorithm name.
        source: UnknownHashAlgorithm,
        /// Root hash of the device.
        hash: String,
    },

    /// The root hash is not hex, or has the wrong length.
    #[error("invalid hash value {algorithm}:{hash} for dm-verity device")]
    InvalidHashEncoding {
        /// Algorithm the hash was checked against.
        algorithm: HashAlgorithm,
        /// Root hash of the device.
        hash: String,
    },

    /// The block count is zero or does not fit in 32 bits.
    #[error("invalid block count {block_num} for dm-verity device {hash}")]
    InvalidBlockCount {
        /// Block count as given.
        block_num: u64,
        /// Root hash of the device.
        hash: String,
    },

    /// A block size is out of range.
    #[error(
        "unsupported verity block size: data_block_size = {block_size}, hash_block_size = {hash_size}"
    )]
    InvalidBlockSize {
        /// Data block size as given.
        block_size: u64,
        /// Hash block size as given.
        hash_size: u64,
    },

    /// The hash tree offset is unaligned or inside the data region.
    #[error("invalid hash tree offset {offset} for dm-verity device {hash}")]
    InvalidOffset {
        /// Offset as given.
        offset: u64,
        /// Root hash of the device.
        hash: String,
    },
}

impl VerityError {
    /// The validation rule this error corresponds to.
    #[must_use]
    pub const fn rule(&self) -> ValidationRule {
        match self {
            Self::UnsupportedAlgorithm { .. } => ValidationRule::UnsupportedAlgorithm,
            Self::InvalidHashEncoding { .. } => ValidationRule::InvalidHashEncoding,
            Self::InvalidBlockCount { .. } => ValidationRule::InvalidBlockCount,
            Self::InvalidBlockSize { .. } => ValidationRule::InvalidBlockSize,
            Self::InvalidOffset { .. } => ValidationRule::InvalidOffset,
        }
    }
}

impl From<VerityError> for NydusError {
    fn from(err: VerityError) -> Self {
        Self::validation("validate dm-verity descriptor", err.rule(), err.to_string())
    }
}

/// Parameters of a dm-verity hash tree.
///
/// Missing or `null` JSON fields decode as zero/empty and are then rejected
/// by [`VerityDescriptor::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerityDescriptor {
    /// Hash algorithm name, matched case-insensitively.
    #[serde(rename = "hashtype", deserialize_with = "crate::null_as_default")]
    pub hash_type: String,
    /// Hex encoded root hash.
    #[serde(deserialize_with = "crate::null_as_default")]
    pub hash: String,
    /// Number of data blocks.
    #[serde(rename = "blocknum", deserialize_with = "crate::null_as_default")]
    pub block_num: u64,
    /// Data block size in bytes.
    #[serde(rename = "blocksize", deserialize_with = "crate::null_as_default")]
    pub block_size: u64,
    /// Hash block size in bytes.
    #[serde(rename = "hashsize", deserialize_with = "crate::null_as_default")]
    pub hash_size: u64,
    /// Byte offset of the hash tree in the device.
    #[serde(deserialize_with = "crate::null_as_default")]
    pub offset: u64,
}

const fn is_valid_block_size(size: u64) -> bool {
    MIN_BLOCK_SIZE <= size && size <= MAX_BLOCK_SIZE
}

impl VerityDescriptor {
    /// Parse a descriptor from JSON and validate it.
    ///
    /// # Errors
    ///
    /// Returns an encoding error for malformed JSON and a validation error for
    /// a descriptor that breaks a rule.
    pub fn parse(json: &str) -> NydusResult<Self> {
        let descriptor: Self = serde_json::from_str(json).context("parse dm-verity JSON")?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// The hash algorithm, if supported.
    ///
    /// # Errors
    ///
    /// Returns [`VerityError::UnsupportedAlgorithm`] for anything but sha1 and sha256.
    pub fn algorithm(&self) -> Result<HashAlgorithm, VerityError> {
        self.hash_type
            .parse()
            .map_err(|source| VerityError::UnsupportedAlgorithm {
                source,
                hash: self.hash.clone(),
            })
    }

    /// Size of the data region in bytes.
    #[must_use]
    pub const fn data_size(&self) -> u64 {
        self.block_size.saturating_mul(self.block_num)
    }

    /// Check every rule in order and report the first violation.
    ///
    /// # Errors
    ///
    /// Returns the first [`VerityError`] found.
    pub fn validate(&self) -> Result<(), VerityError> {
        let algorithm = self.algorithm()?;

        if self.hash.len() != algorithm.hex_len() || hex::decode(&self.hash).is_err() {
            return Err(VerityError::InvalidHashEncoding {
                algorithm,
                hash: self.hash.clone(),
            });
        }

        if self.block_num == 0 || self.block_num > u64::from(u32::MAX) {
            return Err(VerityError::InvalidBlockCount {
                block_num: self.block_num,
                hash: self.hash.clone(),
            });
        }

        if !is_valid_block_size(self.block_size) || !is_valid_block_size(self.hash_size) {
            return Err(VerityError::InvalidBlockSize {
                block_size: self.block_size,
                hash_size: self.hash_size,
            });
        }

        if self.offset % self.hash_size != 0 || self.offset < self.data_size() {
            return Err(VerityError::InvalidOffset {
                offset: self.offset,
                hash: self.hash.clone(),
            });
        }

        Ok(())
    }

    /// Returns true if [`VerityDescriptor::validate`] succeeds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nydus_common::ErrorKind;
    use proptest::prelude::*;

    const SHA256: &str = "9de18652fe74edfb9b805aaed72ae2aa48f94333f1ba5c452ac33b1c39325174";
    const SHA1: &str = "d6e9a2c8b4a3b0e6f1b7b0d2a8f5c3e1d4a7b9c2";

    fn descriptor() -> VerityDescriptor {
        VerityDescriptor {
            hash_type: "sha256".to_string(),
            hash: SHA256.to_string(),
            block_num: 100,
            block_size: 4096,
            hash_size: 4096,
            offset: 409_600,
        }
    }

    #[test]
    fn valid_descriptor() {
        assert_eq!(descriptor().validate(), Ok(()));
    }

    #[test]
    fn unaligned_offset() {
        let d = VerityDescriptor {
            offset: 409_601,
            ..descriptor()
        };
        assert!(matches!(d.validate(), Err(VerityError::InvalidOffset { offset: 409_601, .. })));
    }

    #[test]
    fn offset_inside_data_region() {
        let d = VerityDescriptor {
            offset: 405_504,
            ..descriptor()
        };
        assert_eq!(d.validate().unwrap_err().rule(), ValidationRule::InvalidOffset);
    }

    #[test]
    fn unsupported_algorithm() {
        let d = VerityDescriptor {
            hash_type: "md5".to_string(),
            ..descriptor()
        };
        assert_eq!(d.validate().unwrap_err().rule(), ValidationRule::UnsupportedAlgorithm);
    }

    #[test]
    fn unknown_algorithm_names_the_input() {
        let err = "MD5".parse::<HashAlgorithm>().unwrap_err();
        assert_eq!(err, UnknownHashAlgorithm { name: "MD5".to_string() });

        let d = VerityDescriptor {
            hash_type: "MD5".to_string(),
            ..descriptor()
        };
        let err = d.validate().unwrap_err();
        assert!(matches!(&err, VerityError::UnsupportedAlgorithm { source, .. } if source.name == "MD5"));
        assert_eq!(
            err.to_string(),
            format!("unsupported hash algorithm \"MD5\" for dm-verity device {SHA256}")
        );
    }

    #[test]
    fn algorithm_is_case_insensitive() {
        let d = VerityDescriptor {
            hash_type: "SHA256".to_string(),
            ..descriptor()
        };
        assert!(d.is_valid());
        assert_eq!(d.algorithm(), Ok(HashAlgorithm::Sha256));
    }

    #[test]
    fn sha1_requires_40_chars() {
        let d = VerityDescriptor {
            hash_type: "sha1".to_string(),
            hash: SHA1.to_string(),
            ..descriptor()
        };
        assert!(d.is_valid());

        let d = VerityDescriptor {
            hash_type: "sha1".to_string(),
            ..descriptor()
        };
        assert!(matches!(
            d.validate(),
            Err(VerityError::InvalidHashEncoding {
                algorithm: HashAlgorithm::Sha1,
                ..
            })
        ));
    }

    #[test]
    fn non_hex_hash() {
        let d = VerityDescriptor {
            hash: "z".repeat(64),
            ..descriptor()
        };
        assert_eq!(d.validate().unwrap_err().rule(), ValidationRule::InvalidHashEncoding);
    }

    #[test]
    fn block_count_bounds() {
        for block_num in [0, u64::from(u32::MAX) + 1] {
            let d = VerityDescriptor {
                block_num,
                ..descriptor()
            };
            assert_eq!(d.validate().unwrap_err().rule(), ValidationRule::InvalidBlockCount);
        }
    }

    #[test]
    fn block_size_bounds() {
        let d = VerityDescriptor {
            block_size: 256,
            ..descriptor()
        };
        assert_eq!(d.validate().unwrap_err().rule(), ValidationRule::InvalidBlockSize);

        let d = VerityDescriptor {
            hash_size: MAX_BLOCK_SIZE * 2,
            ..descriptor()
        };
        assert_eq!(d.validate().unwrap_err().rule(), ValidationRule::InvalidBlockSize);

        let d = VerityDescriptor {
            block_size: MIN_BLOCK_SIZE,
            hash_size: MAX_BLOCK_SIZE,
            offset: MAX_BLOCK_SIZE,
            ..descriptor()
        };
        assert!(d.is_valid());
    }

    #[test]
    fn first_failure_wins() {
        let d = VerityDescriptor {
            hash_type: "md5".to_string(),
            block_num: 0,
            block_size: 1,
            offset: 3,
            ..descriptor()
        };
        assert_eq!(d.validate().unwrap_err().rule(), ValidationRule::UnsupportedAlgorithm);
    }

    #[test]
    fn parse_json() {
        let json = format!(
            r#"{{"hashtype":"sha256","hash":"{SHA256}","blocknum":100,"blocksize":4096,"hashsize":4096,"offset":409600}}"#
        );
        assert_eq!(VerityDescriptor::parse(&json).unwrap(), descriptor());

        let err = VerityDescriptor::parse("{\"hashtype\":").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);

        let err = VerityDescriptor::parse(r#"{"hashtype":"sha256"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.rule(), Some(ValidationRule::InvalidHashEncoding));
    }

    #[test]
    fn error_names_hash() {
        let err: NydusError = VerityDescriptor {
            offset: 1,
            ..descriptor()
        }
        .validate()
        .unwrap_err()
        .into();
        assert!(err.to_string().contains(SHA256));
    }

    proptest! {
        #[test]
        fn aligned_offsets_past_data_are_valid(
            block_num in 1u64..=u64::from(u32::MAX),
            block_shift in 9u32..=19,
            hash_shift in 9u32..=19,
            extra_blocks in 0u64..1024,
        ) {
            let block_size = 1u64 << block_shift;
            let hash_size = 1u64 << hash_shift;
            let data = block_num * block_size;
            let offset = data.div_ceil(hash_size) * hash_size + extra_blocks * hash_size;
            let d = VerityDescriptor { block_num, block_size, hash_size, offset, ..descriptor() };
            prop_assert!(d.is_valid());
        }
    }
}
