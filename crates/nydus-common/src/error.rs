//! Common error types for nydus volume tooling.
//!
//! Every error carries a free-form `context` naming the operation and the
//! identifiers involved, plus a structured kind that callers can match on
//! through [`NydusError::kind`].

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`NydusError`].
pub type NydusResult<T> = Result<T, NydusError>;

/// Coarse classification of a [`NydusError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// File open or read failure.
    Io,
    /// Daemon, instance or configuration lookup failure.
    Resolution,
    /// Unrecognized bootstrap format version.
    Format,
    /// A verity or volume descriptor rule was violated.
    Validation,
    /// Malformed base64, malformed JSON or a schema mismatch.
    Encoding,
}

/// The specific validation rule a descriptor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationRule {
    /// Hash algorithm is neither sha1 nor sha256.
    UnsupportedAlgorithm,
    /// Hash value is not hex or has the wrong length for its algorithm.
    InvalidHashEncoding,
    /// Block count is zero or does not fit in 32 bits.
    InvalidBlockCount,
    /// Data or hash block size is outside 512..=524288.
    InvalidBlockSize,
    /// Hash tree offset is unaligned or overlaps the data region.
    InvalidOffset,
    /// Volume type and payload are inconsistent.
    InvalidVolume,
    /// Snapshot or daemon identifier is malformed.
    InvalidIdentifier,
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnsupportedAlgorithm => "unsupported hash algorithm",
            Self::InvalidHashEncoding => "invalid hash encoding",
            Self::InvalidBlockCount => "invalid block count",
            Self::InvalidBlockSize => "invalid block size",
            Self::InvalidOffset => "invalid hash offset",
            Self::InvalidVolume => "invalid virtual volume",
            Self::InvalidIdentifier => "invalid identifier",
        };
        f.write_str(name)
    }
}

/// Errors produced while building, validating or transporting descriptors.
#[derive(Error, Diagnostic, Debug)]
pub enum NydusError {
    /// I/O error.
    #[error("{context}: {source}")]
    #[diagnostic(code(nydus::io))]
    Io {
        /// Operation and identifiers involved.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A collaborator could not resolve a daemon, instance or configuration.
    #[error("{context}: {message}")]
    #[diagnostic(code(nydus::resolution))]
    Resolution {
        /// Operation and identifiers involved.
        context: String,
        /// What could not be resolved.
        message: String,
    },

    /// The bootstrap header matched no known format.
    #[error("{context}: unrecognized filesystem header ({len} bytes)")]
    #[diagnostic(
        code(nydus::format),
        help("Bootstrap files must start with a RAFS v5 or RAFS v6 superblock")
    )]
    UnrecognizedFormat {
        /// Operation and identifiers involved.
        context: String,
        /// Number of header bytes inspected.
        len: usize,
    },

    /// A descriptor violated a validation rule.
    #[error("{context}: {rule}: {message}")]
    #[diagnostic(code(nydus::validation))]
    Validation {
        /// Operation and identifiers involved.
        context: String,
        /// The first rule that failed.
        rule: ValidationRule,
        /// Details about the offending values.
        message: String,
    },

    /// Transport encoding or decoding failed.
    #[error("{context}: {message}")]
    #[diagnostic(code(nydus::encoding))]
    Encoding {
        /// Operation and identifiers involved.
        context: String,
        /// The decoder's message.
        message: String,
    },
}

impl NydusError {
    /// Create an I/O error.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a resolution error.
    pub fn resolution(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create an unrecognized format error for a header of `len` bytes.
    pub fn unrecognized_format(context: impl Into<String>, len: usize) -> Self {
        Self::UnrecognizedFormat {
            context: context.into(),
            len,
        }
    }

    /// Create a validation error.
    pub fn validation(
        context: impl Into<String>,
        rule: ValidationRule,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            context: context.into(),
            rule,
            message: message.into(),
        }
    }

    /// Create an encoding error.
    pub fn encoding(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encoding {
            context: context.into(),
            message: message.into(),
        }
    }

    /// The kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::UnrecognizedFormat { .. } => ErrorKind::Format,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Encoding { .. } => ErrorKind::Encoding,
        }
    }

    /// The failed rule, for validation errors.
    #[must_use]
    pub const fn rule(&self) -> Option<ValidationRule> {
        match self {
            Self::Validation { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    /// The context string attached to this error.
    #[must_use]
    pub fn context_str(&self) -> &str {
        match self {
            Self::Io { context, .. }
            | Self::Resolution { context, .. }
            | Self::UnrecognizedFormat { context, .. }
            | Self::Validation { context, .. }
            | Self::Encoding { context, .. } => context,
        }
    }

    /// Prefix the context with an outer operation.
    #[must_use]
    pub fn context(mut self, outer: impl fmt::Display) -> Self {
        {
            let slot = match &mut self {
                Self::Io { context, .. }
                | Self::Resolution { context, .. }
                | Self::UnrecognizedFormat { context, .. }
                | Self::Validation { context, .. }
                | Self::Encoding { context, .. } => context,
            };
            *slot = if slot.is_empty() {
                outer.to_string()
            } else {
                format!("{outer}: {slot}")
            };
        }
        self
    }
}

impl From<std::io::Error> for NydusError {
    fn from(err: std::io::Error) -> Self {
        Self::io("I/O error", err)
    }
}

impl From<serde_json::Error> for NydusError {
    fn from(err: serde_json::Error) -> Self {
        Self::encoding("JSON", err.to_string())
    }
}

impl From<base64::DecodeError> for NydusError {
    fn from(err: base64::DecodeError) -> Self {
        Self::encoding("base64", err.to_string())
    }
}

/// Attach context to fallible results.
pub trait ResultExt<T> {
    /// Prefix the error's context with `context`.
    ///
    /// # Errors
    ///
    /// Returns the original error, converted to [`NydusError`] and re-contextualized.
    fn context(self, context: impl fmt::Display) -> NydusResult<T>;

    /// Like [`ResultExt::context`], building the context lazily.
    ///
    /// # Errors
    ///
    /// Returns the original error, converted to [`NydusError`] and re-contextualized.
    fn with_context<C, F>(self, f: F) -> NydusResult<T>
    where
        C: fmt::Display,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<NydusError>,
{
    fn context(self, context: impl fmt::Display) -> NydusResult<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C, F>(self, f: F) -> NydusResult<T>
    where
        C: fmt::Display,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = NydusError::resolution("get daemon with ID d1", "daemon not found");
        assert_eq!(err.to_string(), "get daemon with ID d1: daemon not found");
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: NydusError = io_err.into();
        assert!(matches!(err, NydusError::Io { .. }));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn error_from_json_is_encoding() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: NydusError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn context_prefixes_outer_operation() {
        let err = NydusError::unrecognized_format("detect version", 12)
            .context("remote mount for snapshot 7");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(err.context_str(), "remote mount for snapshot 7: detect version");
        assert_eq!(
            err.to_string(),
            "remote mount for snapshot 7: detect version: unrecognized filesystem header (12 bytes)"
        );
    }

    #[test]
    fn result_ext_keeps_kind_and_rule() {
        let res: NydusResult<()> = Err(NydusError::validation(
            "dm-verity",
            ValidationRule::InvalidOffset,
            "offset 1",
        ));
        let err = res.context("decode volume").unwrap_err();
        assert_eq!(err.rule(), Some(ValidationRule::InvalidOffset));
        assert!(err.to_string().starts_with("decode volume: dm-verity: invalid hash offset"));
    }

    #[test]
    fn result_ext_converts_foreign_errors() {
        let res: Result<Vec<u8>, std::io::Error> = Err(std::io::Error::other("boom"));
        let err = res.with_context(|| format!("read {}", "/tmp/x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.context_str(), "read /tmp/x: I/O error");
    }
}
