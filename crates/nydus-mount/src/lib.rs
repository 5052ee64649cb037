//! # nydus-mount
//!
//! Overlay mount assembly for nydus snapshots.
//!
//! This crate provides:
//! - Interfaces to the daemon registry, instance cache and bootstrap layout
//! - Daemon configuration loading and serialization
//! - The `extraoption` record passed to `nydus-overlayfs`
//! - The mount assembler that ties them together

#![warn(missing_docs)]

pub mod assembler;
pub mod config;
pub mod daemon;
pub mod extra_option;
pub mod instance;
pub mod layout;
pub mod mount;

pub use assembler::{MountAssembler, MountRequest};
pub use config::DaemonConfig;
pub use daemon::{Daemon, DaemonRegistry, MemoryDaemonRegistry};
pub use extra_option::ExtraOption;
pub use instance::{InstanceCache, MemoryInstanceCache, RafsInstance};
pub use layout::{BootstrapResolver, LayoutBootstrapResolver};
pub use mount::MountSpec;
