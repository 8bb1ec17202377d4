//! Filesystem helpers for isolated phases.
//!
//! Mount table snapshots and the teardown that returns a private mount
//! table to its pre-phase shape.

pub mod mount;
