//! Backend stand-in for exercising the pipeline without module programs.
//!
//! Clones share state, so a test can register one handle and inspect the
//! other after the run.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_core::Credentials;
use rootstrap_core::mock::MockMechanism;
use rootstrap_definition::Definition;

use crate::backend::{Backend, Stage};
use crate::process::Launcher;

#[derive(Debug, Default)]
struct RecorderState {
    calls: RefCell<Vec<String>>,
    fail: Cell<Option<Stage>>,
    root_during_populate: Cell<Option<bool>>,
    populate_credentials: Cell<Option<Credentials>>,
}

/// Backend that records each stage call and can be told to fail one.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    name: String,
    prepare: bool,
    finalize: bool,
    observe: Option<MockMechanism>,
    state: Rc<RecorderState>,
}

impl RecordingBackend {
    /// Backend with only the populate stage.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prepare: false,
            finalize: false,
            observe: None,
            state: Rc::new(RecorderState::default()),
        }
    }

    /// Declares the optional stages the backend has.
    #[must_use]
    pub fn with_stages(mut self, stages: &[Stage]) -> Self {
        self.prepare = stages.contains(&Stage::Prepare);
        self.finalize = stages.contains(&Stage::Finalize);
        self
    }

    /// Makes the given stage fail with a build error.
    #[must_use]
    pub fn failing(self, stage: Stage) -> Self {
        self.state.fail.set(Some(stage));
        self
    }

    /// Records whether `mechanism` is root while populate runs.
    #[must_use]
    pub fn observing(mut self, mechanism: MockMechanism) -> Self {
        self.observe = Some(mechanism);
        self
    }

    /// Stage names called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.calls.borrow().clone()
    }

    /// Simulated root status seen by the last populate call.
    pub fn root_during_populate(&self) -> Option<bool> {
        self.state.root_during_populate.get()
    }

    /// Spawn credentials the launcher carried into the last populate call.
    pub fn populate_credentials(&self) -> Option<Credentials> {
        self.state.populate_credentials.get()
    }

    fn record(&self, stage: Stage) -> Result<()> {
        self.state.calls.borrow_mut().push(stage.as_str().to_owned());
        if self.state.fail.get() == Some(stage) {
            return Err(BootstrapError::build(format!(
                "{} {stage} failed (simulated)",
                self.name
            )));
        }
        Ok(())
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_prepare(&self) -> bool {
        self.prepare
    }

    fn has_finalize(&self) -> bool {
        self.finalize
    }

    fn prepare(
        &self,
        _rootfs: &Path,
        _definition: &Definition,
        _launcher: &Launcher,
    ) -> Result<()> {
        self.record(Stage::Prepare)
    }

    fn populate(
        &self,
        _rootfs: &Path,
        _definition: &Definition,
        launcher: &Launcher,
    ) -> Result<()> {
        if let Some(mechanism) = &self.observe {
            self.state.root_during_populate.set(Some(mechanism.is_root()));
        }
        self.state.populate_credentials.set(launcher.credentials());
        self.record(Stage::Populate)
    }

    fn finalize(
        &self,
        _rootfs: &Path,
        _definition: &Definition,
        _launcher: &Launcher,
    ) -> Result<()> {
        self.record(Stage::Finalize)
    }
}
