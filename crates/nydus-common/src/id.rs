//! Snapshot and daemon identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{NydusError, NydusResult, ValidationRule};

/// Maximum length of an identifier.
const MAX_LENGTH: usize = 64;

/// Identifiers end up as path components, so only a conservative alphabet
/// is accepted and the first character must be alphanumeric.
fn validate(kind: &str, id: &str) -> NydusResult<()> {
    let invalid = || {
        NydusError::validation(
            format!("parse {kind} ID"),
            ValidationRule::InvalidIdentifier,
            format!("{id:?} must be 1-{MAX_LENGTH} characters of [A-Za-z0-9._-]"),
        )
    };

    if id.is_empty() || id.len() > MAX_LENGTH {
        return Err(invalid());
    }

    if !id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid());
    }

    Ok(())
}

/// A validated snapshot ID, as handed out by the snapshotter's metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Create a new snapshot ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> NydusResult<Self> {
        let id = id.into();
        validate("snapshot", &id)?;
        Ok(Self(id))
    }

    /// Get the snapshot ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// ID of a nydusd instance. Shared daemons serve many snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DaemonId(String);

impl DaemonId {
    /// Create a new daemon ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> NydusResult<Self> {
        let id = id.into();
        validate("daemon", &id)?;
        Ok(Self(id))
    }

    /// Get the daemon ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_id_traits {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = NydusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = NydusError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_id_traits!(SnapshotId);
impl_id_traits!(DaemonId);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn valid_snapshot_ids() {
        assert!(SnapshotId::new("42").is_ok());
        assert!(SnapshotId::new("sha256-abc123").is_ok());
        assert!(SnapshotId::new("layer_1.meta").is_ok());
    }

    #[test]
    fn invalid_snapshot_ids() {
        assert!(SnapshotId::new("").is_err());
        assert!(SnapshotId::new("..").is_err());
        assert!(SnapshotId::new("-invalid").is_err());
        assert!(SnapshotId::new("a/b").is_err());
        assert!(SnapshotId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn invalid_id_is_validation_error() {
        let err = DaemonId::new("bad id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.rule(), Some(ValidationRule::InvalidIdentifier));
        assert!(err.to_string().contains("parse daemon ID"));
    }

    #[test]
    fn serde_rejects_invalid_ids() {
        let id: DaemonId = serde_json::from_str("\"cm4ctq2s5uu0\"").unwrap();
        assert_eq!(id.as_str(), "cm4ctq2s5uu0");
        assert!(serde_json::from_str::<DaemonId>("\"../etc\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"cm4ctq2s5uu0\"");
    }

    proptest! {
        #[test]
        fn ids_never_escape_a_directory(id in "\\PC{0,80}") {
            if let Ok(parsed) = SnapshotId::new(id) {
                prop_assert!(!parsed.as_str().contains('/'));
                prop_assert!(!parsed.as_str().starts_with('.'));
            }
        }
    }
}
