//! Fixed-order phase sequencer for native builds.
//!
//! Every phase runs as
//! `with_isolation(mode, || with_level(privilege, || body()))`, with the
//! mode and level taken from the phase itself. A failure stops the
//! sequence; nothing already written to the rootfs is rolled back.
//!
//! Each body reports the privilege and isolation it actually observed. For
//! isolated phases that report is produced in the child and carried back.

use std::fmt;
use std::path::Path;

use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_common::types::{Phase, PrivilegeState};
use rootstrap_core::{IsolationLayer, PrivilegeController};
use rootstrap_definition::Definition;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::hooks;
use crate::process::Launcher;

/// Position of the sequencer in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// About to run, or running, the given phase.
    Running(Phase),
    /// Every phase completed.
    Done,
    /// A phase failed; no later phase ran.
    Failed,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running(phase) => write!(f, "{phase}"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What a completed phase saw from inside its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// The phase that ran.
    pub phase: Phase,
    /// Privilege state during the body.
    pub privilege: PrivilegeState,
    /// Whether the body ran in an isolated context.
    pub isolated: bool,
}

/// Result of one pass through the sequencer.
#[derive(Debug)]
pub struct SequenceReport {
    /// Final state: [`SequencerState::Done`] or [`SequencerState::Failed`].
    pub state: SequencerState,
    /// Phases that completed, in order.
    pub completed: Vec<PhaseReport>,
    /// The phase that failed, if any.
    pub failed_phase: Option<Phase>,
    /// The error that stopped the sequence, if any.
    pub error: Option<BootstrapError>,
}

impl SequenceReport {
    /// Returns whether every phase completed.
    pub fn succeeded(&self) -> bool {
        self.state == SequencerState::Done
    }

    /// Converts the report into the completed phases or the failure.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the sequence.
    pub fn into_result(self) -> Result<Vec<PhaseReport>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.completed),
        }
    }
}

/// Drives the three phases against one backend and one rootfs.
#[derive(Debug)]
pub struct PhaseSequencer<'a> {
    privileges: &'a PrivilegeController,
    isolation: &'a IsolationLayer,
}

impl<'a> PhaseSequencer<'a> {
    /// Creates a sequencer borrowing the build's privilege and isolation
    /// contexts.
    pub const fn new(privileges: &'a PrivilegeController, isolation: &'a IsolationLayer) -> Self {
        Self {
            privileges,
            isolation,
        }
    }

    /// Runs every phase in order, stopping at the first failure.
    pub fn run(
        &self,
        backend: &dyn Backend,
        rootfs: &Path,
        definition: &Definition,
    ) -> SequenceReport {
        let mut completed = Vec::with_capacity(Phase::ORDER.len());
        let mut state = SequencerState::Running(Phase::PreBootstrap);

        while let SequencerState::Running(phase) = state {
            tracing::info!(%phase, backend = backend.name(), "entering phase");
            match self.run_phase(phase, backend, rootfs, definition) {
                Ok(report) => {
                    tracing::info!(%phase, privilege = %report.privilege, isolated = report.isolated, "phase completed");
                    completed.push(report);
                    state = phase.next().map_or(SequencerState::Done, SequencerState::Running);
                }
                Err(error) => {
                    tracing::debug!(%phase, %error, "phase failed");
                    return SequenceReport {
                        state: SequencerState::Failed,
                        completed,
                        failed_phase: Some(phase),
                        error: Some(error),
                    };
                }
            }
        }

        SequenceReport {
            state,
            completed,
            failed_phase: None,
            error: None,
        }
    }

    fn run_phase(
        &self,
        phase: Phase,
        backend: &dyn Backend,
        rootfs: &Path,
        definition: &Definition,
    ) -> Result<PhaseReport> {
        self.isolation
            .with_isolation(phase.isolation(), self.privileges, || {
                self.privileges
                    .with_level(phase.privilege(), || {
                        let report = PhaseReport {
                            phase,
                            privilege: self.privileges.state(),
                            isolated: self.isolation.is_isolated(),
                        };
                        let launcher = Launcher::for_scope(self.privileges);
                        self.body(phase, backend, rootfs, definition, &launcher)
                            .map(|()| report)
                    })
                    .and_then(|outcome| outcome)
            })
    }

    fn body(
        &self,
        phase: Phase,
        backend: &dyn Backend,
        rootfs: &Path,
        definition: &Definition,
        launcher: &Launcher,
    ) -> Result<()> {
        match phase {
            Phase::PreBootstrap => hooks::pre_bootstrap(rootfs, definition, launcher),
            Phase::ModulePopulation => populate(backend, rootfs, definition, launcher),
            Phase::PostBootstrap => hooks::post_bootstrap(
                rootfs,
                definition,
                self.isolation.is_isolated(),
                launcher,
            ),
        }
    }
}

fn populate(
    backend: &dyn Backend,
    rootfs: &Path,
    definition: &Definition,
    launcher: &Launcher,
) -> Result<()> {
    hooks::create_skeleton(rootfs)?;
    if backend.has_prepare() {
        backend.prepare(rootfs, definition, launcher)?;
    }
    backend.populate(rootfs, definition, launcher)?;
    if backend.has_finalize() {
        backend.finalize(rootfs, definition, launcher)?;
    }
    Ok(())
}
