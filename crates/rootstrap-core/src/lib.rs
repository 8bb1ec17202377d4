//! # rootstrap-core
//!
//! Low-level Linux primitives that bracket every bootstrap phase.
//!
//! This crate provides safe abstractions over:
//! - **Privilege**: scoped `seteuid(2)` elevation and drop with guaranteed
//!   restore.
//! - **Namespaces**: private mount table and PID view for isolated phases.
//! - **Filesystem**: mount table snapshots and bounded-retry teardown.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod filesystem;
pub mod mock;
pub mod namespace;
pub mod privilege;

pub use namespace::{IsolationLayer, Isolator, NamespaceIsolator};
pub use privilege::{Credentials, PrivilegeController, PrivilegeMechanism, SetuidMechanism};
