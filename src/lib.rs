//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `sonic-workspace` and
//! enable `desktop-shims` to get the reqwest/tokio bridges wired into
//! `core-service` without listing each crate.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
