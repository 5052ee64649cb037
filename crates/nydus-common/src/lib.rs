//! # nydus-common
//!
//! Shared utilities and types for nydus volume tooling.
//!
//! This crate provides common functionality used across the workspace:
//! - Snapshot and daemon identifiers
//! - Standard snapshotter filesystem layout
//! - The error type and its kinds

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{ErrorKind, NydusError, NydusResult, ResultExt, ValidationRule};
pub use id::{DaemonId, SnapshotId};
pub use paths::NydusPaths;
