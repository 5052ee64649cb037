//! Bootstrap format version detection.
//!
//! A nydus bootstrap is either a RAFS v5 image, which starts with its own
//! superblock, or a RAFS v6 image, which is an EROFS filesystem with the
//! superblock at offset 1024. Only the first [`MAX_HEADER_SIZE`] bytes of the
//! file are ever inspected.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use nydus_common::{NydusError, NydusResult};
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, KnownLayout, little_endian::U32};

/// Number of bytes read from the start of a bootstrap for detection.
pub const MAX_HEADER_SIZE: usize = 4096;

const RAFS_V5_SUPER_MAGIC: u32 = 0x5241_4653;
const RAFS_V5_SUPER_VERSION: u32 = 0x500;

const RAFS_V6_SUPER_MAGIC: u32 = 0xE0F5_E1E2;
const RAFS_V6_SUPER_BLOCK_OFFSET: usize = 1024;
// EROFS superblock plus the RAFS v6 extended superblock.
const RAFS_V6_SUPER_BLOCK_SIZE: usize = 1024 + 128 + 256;

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RafsV5SuperPrefix {
    magic: U32,
    version: U32,
}

#[derive(FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct ErofsSuperPrefix {
    magic: U32,
}

/// On-disk format version of a bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BootstrapVersion {
    /// RAFS v5.
    #[serde(rename = "v5")]
    V5,
    /// RAFS v6 (EROFS compatible).
    #[serde(rename = "v6")]
    V6,
}

impl BootstrapVersion {
    /// The version string passed to the mount helper.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V5 => "v5",
            Self::V6 => "v6",
        }
    }
}

impl fmt::Display for BootstrapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootstrapVersion {
    type Err = NydusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v5" => Ok(Self::V5),
            "v6" => Ok(Self::V6),
            _ => Err(NydusError::encoding(
                "parse filesystem version",
                format!("unknown filesystem version {s:?}"),
            )),
        }
    }
}

/// Classify a bootstrap header.
///
/// `header` may be shorter than [`MAX_HEADER_SIZE`] when the bootstrap itself
/// is small.
///
/// # Errors
///
/// Returns [`NydusError::UnrecognizedFormat`] if the header matches neither
/// RAFS v5 nor RAFS v6.
pub fn detect_fs_version(header: &[u8]) -> NydusResult<BootstrapVersion> {
    let unrecognized = || NydusError::unrecognized_format("detect filesystem version", header.len());

    let (v5, _) = RafsV5SuperPrefix::read_from_prefix(header).map_err(|_| unrecognized())?;
    if v5.magic.get() == RAFS_V5_SUPER_MAGIC && v5.version.get() == RAFS_V5_SUPER_VERSION {
        return Ok(BootstrapVersion::V5);
    }

    if header.len() >= RAFS_V6_SUPER_BLOCK_SIZE {
        let erofs = header
            .get(RAFS_V6_SUPER_BLOCK_OFFSET..)
            .and_then(|sb| ErofsSuperPrefix::read_from_prefix(sb).ok());
        if let Some((sb, _)) = erofs {
            if sb.magic.get() == RAFS_V6_SUPER_MAGIC {
                return Ok(BootstrapVersion::V6);
            }
        }
    }

    Err(unrecognized())
}

/// Read up to [`MAX_HEADER_SIZE`] bytes from `reader` and classify them.
///
/// Short reads are retried until the header is full or the reader hits EOF.
///
/// # Errors
///
/// Returns an I/O error if reading fails, or a format error if the header is
/// not recognized.
pub fn read_fs_version<R: Read>(reader: R) -> NydusResult<BootstrapVersion> {
    let mut header = Vec::with_capacity(MAX_HEADER_SIZE);
    reader
        .take(MAX_HEADER_SIZE as u64)
        .read_to_end(&mut header)
        .map_err(|e| NydusError::io("read bootstrap header", e))?;

    tracing::trace!(len = header.len(), "Read bootstrap header");
    detect_fs_version(&header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nydus_common::ErrorKind;

    fn v5_header(len: usize) -> Vec<u8> {
        let mut header = vec![0u8; len];
        header[0..4].copy_from_slice(&RAFS_V5_SUPER_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&RAFS_V5_SUPER_VERSION.to_le_bytes());
        header
    }

    fn v6_header(len: usize) -> Vec<u8> {
        let mut header = vec![0u8; len];
        header[1024..1028].copy_from_slice(&RAFS_V6_SUPER_MAGIC.to_le_bytes());
        header
    }

    #[test]
    fn detects_v5() {
        assert_eq!(detect_fs_version(&v5_header(4096)).unwrap(), BootstrapVersion::V5);
    }

    #[test]
    fn detects_short_v5() {
        assert_eq!(detect_fs_version(&v5_header(8)).unwrap(), BootstrapVersion::V5);
    }

    #[test]
    fn v5_magic_with_wrong_version_is_rejected() {
        let mut header = v5_header(64);
        header[4..8].copy_from_slice(&0x400u32.to_le_bytes());
        let err = detect_fs_version(&header).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn detects_v6() {
        assert_eq!(detect_fs_version(&v6_header(4096)).unwrap(), BootstrapVersion::V6);
        assert_eq!(
            detect_fs_version(&v6_header(RAFS_V6_SUPER_BLOCK_SIZE)).unwrap(),
            BootstrapVersion::V6
        );
    }

    #[test]
    fn truncated_v6_is_rejected() {
        let err = detect_fs_version(&v6_header(RAFS_V6_SUPER_BLOCK_SIZE - 1)).unwrap_err();
        assert!(matches!(err, NydusError::UnrecognizedFormat { len: 1407, .. }));
    }

    #[test]
    fn empty_and_random_headers_are_rejected() {
        assert_eq!(detect_fs_version(&[]).unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(detect_fs_version(&[1, 2, 3]).unwrap_err().kind(), ErrorKind::Format);

        let noise: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8).collect();
        assert_eq!(detect_fs_version(&noise).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn read_stops_at_header_size() {
        let mut data = v6_header(4096);
        data.extend(std::iter::repeat_n(0xffu8, 8192));
        assert_eq!(read_fs_version(data.as_slice()).unwrap(), BootstrapVersion::V6);
    }

    #[test]
    fn reads_short_bootstrap_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("image.boot");
        std::fs::write(&path, v5_header(16)).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        assert_eq!(read_fs_version(&file).unwrap(), BootstrapVersion::V5);
    }

    #[test]
    fn read_failure_is_io() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("device gone"))
            }
        }
        let err = read_fs_version(Broken).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn version_strings() {
        assert_eq!(BootstrapVersion::V6.to_string(), "v6");
        assert_eq!("v5".parse::<BootstrapVersion>().unwrap(), BootstrapVersion::V5);
        let err = "v7".parse::<BootstrapVersion>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert_eq!(err.rule(), None);
        assert!(serde_json::from_str::<BootstrapVersion>("\"v7\"").is_err());
        assert_eq!(serde_json::to_string(&BootstrapVersion::V6).unwrap(), "\"v6\"");
    }
}
