//! # rootstrap-bootstrap
//!
//! The bootstrap pipeline: backend registry, phase hooks, the phase
//! sequencer, the legacy driver handoff, and the orchestrator that ties
//! them to a definition file.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use rootstrap_bootstrap::orchestrator::Orchestrator;
//! use rootstrap_common::config::BootstrapConfig;
//!
//! let config = BootstrapConfig::new("/var/tmp/rootfs", "/usr/local/libexec");
//! let orchestrator = Orchestrator::from_config(config)?;
//! let _code = orchestrator.run(Path::new("alpine.def"));
//! # Ok::<(), rootstrap_common::error::BootstrapError>(())
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod hooks;
pub mod legacy;
pub mod mock;
pub mod orchestrator;
pub mod phase;
pub mod process;

pub use backend::{Backend, BackendRegistry};
pub use orchestrator::{Orchestrator, Outcome};
pub use phase::{PhaseReport, PhaseSequencer, SequenceReport, SequencerState};
