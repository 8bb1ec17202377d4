//! In-memory stand-ins for the privilege and isolation mechanisms.
//!
//! They let the phase pipeline run end to end without root, namespaces, or
//! a setuid binary. Clones share state, so a test can keep one handle and
//! hand the other to the code under test.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_common::types::PrivilegeState;

use crate::namespace::Isolator;
use crate::privilege::{Credentials, PrivilegeController, PrivilegeMechanism};

#[derive(Debug, Default)]
struct MechanismState {
    can_elevate: Cell<bool>,
    fail_elevate: Cell<bool>,
    fail_lower: Cell<bool>,
    root: Cell<bool>,
    dropped: Cell<Option<Credentials>>,
    events: RefCell<Vec<String>>,
}

/// Privilege mechanism that flips a flag instead of calling `seteuid(2)`.
#[derive(Debug, Clone)]
pub struct MockMechanism {
    state: Rc<MechanismState>,
}

impl Default for MockMechanism {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMechanism {
    /// Mechanism that is able to elevate.
    pub fn new() -> Self {
        let state = MechanismState::default();
        state.can_elevate.set(true);
        Self {
            state: Rc::new(state),
        }
    }

    /// Mechanism for a process that can never regain root.
    pub fn unprivileged() -> Self {
        Self {
            state: Rc::new(MechanismState::default()),
        }
    }

    /// Reports spawn credentials: root while elevated, `dropped` otherwise.
    #[must_use]
    pub fn with_credentials(self, dropped: Credentials) -> Self {
        self.state.dropped.set(Some(dropped));
        self
    }

    /// Makes subsequent `elevate` calls fail.
    pub fn fail_elevate(&self, fail: bool) {
        self.state.fail_elevate.set(fail);
    }

    /// Makes subsequent `lower` calls fail.
    pub fn fail_lower(&self, fail: bool) {
        self.state.fail_lower.set(fail);
    }

    /// Whether the simulated effective uid is root.
    pub fn is_root(&self) -> bool {
        self.state.root.get()
    }

    /// Successful transitions, in order (`"elevate"` / `"lower"`).
    pub fn events(&self) -> Vec<String> {
        self.state.events.borrow().clone()
    }
}

impl PrivilegeMechanism for MockMechanism {
    fn can_elevate(&self) -> bool {
        self.state.can_elevate.get()
    }

    fn elevate(&self) -> Result<()> {
        if self.state.fail_elevate.get() {
            return Err(BootstrapError::privilege("simulated seteuid(0) failure"));
        }
        self.state.root.set(true);
        self.state.events.borrow_mut().push("elevate".into());
        Ok(())
    }

    fn lower(&self) -> Result<()> {
        if self.state.fail_lower.get() {
            return Err(BootstrapError::privilege("simulated seteuid failure"));
        }
        self.state.root.set(false);
        self.state.events.borrow_mut().push("lower".into());
        Ok(())
    }

    fn credentials(&self, state: PrivilegeState) -> Option<Credentials> {
        let dropped = self.state.dropped.get()?;
        Some(match state {
            PrivilegeState::Elevated => Credentials::ROOT,
            PrivilegeState::Dropped | PrivilegeState::Idle => dropped,
        })
    }
}

#[derive(Debug, Default)]
struct IsolatorState {
    entered: Cell<u32>,
    mounts: Cell<u32>,
    fail_setup: Cell<bool>,
}

/// Isolator that runs the operation in-process and counts entries.
///
/// Simulates a private mount table: [`InProcessIsolator::mount`] adds an
/// entry that the isolator removes on exit.
#[derive(Debug, Clone, Default)]
pub struct InProcessIsolator {
    state: Rc<IsolatorState>,
}

impl InProcessIsolator {
    /// Creates an isolator that always sets up successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes namespace setup fail before the operation runs.
    pub fn fail_setup(&self, fail: bool) {
        self.state.fail_setup.set(fail);
    }

    /// Number of isolated contexts created so far.
    pub fn entered(&self) -> u32 {
        self.state.entered.get()
    }

    /// Simulates a mount inside the isolated context.
    pub fn mount(&self) {
        self.state.mounts.set(self.state.mounts.get() + 1);
    }

    /// Mount entries that are currently attached.
    pub fn residual_mounts(&self) -> u32 {
        self.state.mounts.get()
    }
}

impl Isolator for InProcessIsolator {
    fn run_isolated(
        &self,
        _privileges: &PrivilegeController,
        op: &mut dyn FnMut() -> Result<String>,
    ) -> Result<String> {
        if self.state.fail_setup.get() {
            return Err(BootstrapError::isolation("simulated unshare failure"));
        }
        self.state.entered.set(self.state.entered.get() + 1);
        let result = op();
        self.state.mounts.set(0);
        result
    }
}
