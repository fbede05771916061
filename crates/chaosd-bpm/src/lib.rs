//! # chaosd-bpm
//!
//! Background process management for fault injection.
//!
//! A [`ProcessBuilder`] assembles the command line that re-enters a
//! container's namespaces through the `nsexec` helper, optionally anchors
//! them with a `pause` process, and runs everything under `nice`. The
//! result is an unstarted [`ManagedProcess`] owned by the caller.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod builder;
pub mod namespace;
pub mod process;

pub use builder::{ProcessBuilder, ProcessFactory};
pub use namespace::{NamespaceKind, NamespaceOption};
pub use process::ManagedProcess;
