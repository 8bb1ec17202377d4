//! Isolated execution contexts for bootstrap phases.
//!
//! An isolated phase runs in a forked child with a private mount table and
//! a private PID view. The child reports its outcome, including the value
//! the operation produced, over a pipe as JSON and takes its namespaces with
//! it when it exits, so the host mount table is the same after the phase as
//! before it, whatever the outcome.

pub mod mount;
pub mod pid;

use std::cell::Cell;

use rootstrap_common::error::{BootstrapError, ErrorReport, Result};
use rootstrap_common::types::IsolationMode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::privilege::PrivilegeController;

/// Strategy for running an operation in an isolated context.
pub trait Isolator {
    /// Runs `op` isolated and releases the context before returning.
    ///
    /// `op` yields its value encoded as JSON so it can cross a process
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Isolation`] if the context cannot be
    /// created or torn down, or the error `op` itself returned.
    fn run_isolated(
        &self,
        privileges: &PrivilegeController,
        op: &mut dyn FnMut() -> Result<String>,
    ) -> Result<String>;
}

/// Wraps phase bodies in the isolation their phase requires.
pub struct IsolationLayer {
    isolator: Box<dyn Isolator>,
    active: Cell<bool>,
}

impl std::fmt::Debug for IsolationLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationLayer")
            .field("active", &self.active.get())
            .finish_non_exhaustive()
    }
}

struct ActiveGuard<'a>(&'a Cell<bool>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl IsolationLayer {
    /// Creates a layer around the given isolator.
    pub fn new(isolator: Box<dyn Isolator>) -> Self {
        Self {
            isolator,
            active: Cell::new(false),
        }
    }

    /// Creates a layer backed by Linux mount and PID namespaces.
    pub fn namespaces() -> Self {
        Self::new(Box::new(NamespaceIsolator))
    }

    /// Returns whether the caller is currently inside an isolated context.
    pub fn is_isolated(&self) -> bool {
        self.active.get()
    }

    /// Runs `op` under the requested isolation mode and returns its value.
    ///
    /// In an isolated context the value is whatever `op` produced in the
    /// child, carried back as JSON.
    ///
    /// # Errors
    ///
    /// Returns an isolation error from setup, teardown, or the value
    /// transfer, or the error returned by `op`.
    pub fn with_isolation<T>(
        &self,
        mode: IsolationMode,
        privileges: &PrivilegeController,
        op: impl FnOnce() -> Result<T>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        match mode {
            IsolationMode::None => op(),
            IsolationMode::Isolated => {
                if self.active.get() {
                    return Err(BootstrapError::isolation(
                        "already inside an isolated context",
                    ));
                }
                let mut op = Some(op);
                let mut call = || {
                    let f = op.take().ok_or_else(|| {
                        BootstrapError::isolation("isolated operation invoked twice")
                    })?;
                    let value = f()?;
                    serde_json::to_string(&value).map_err(|e| {
                        BootstrapError::isolation(format!("cannot encode isolated result: {e}"))
                    })
                };
                self.active.set(true);
                let _guard = ActiveGuard(&self.active);
                let payload = self.isolator.run_isolated(privileges, &mut call)?;
                serde_json::from_str(&payload).map_err(|e| {
                    BootstrapError::isolation(format!("cannot decode isolated result: {e}"))
                })
            }
        }
    }
}

/// Outcome sent from the isolated child to the parent.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ChildReport {
    Ok { payload: String },
    Failed { error: ErrorReport },
}

/// Isolator built on `fork(2)` and `unshare(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceIsolator;

#[cfg(target_os = "linux")]
impl Isolator for NamespaceIsolator {
    #[allow(unsafe_code)]
    fn run_isolated(
        &self,
        privileges: &PrivilegeController,
        op: &mut dyn FnMut() -> Result<String>,
    ) -> Result<String> {
        use nix::unistd::{ForkResult, fork};

        let (reader, writer) = linux::report_pipe()?;

        // SAFETY: the bootstrap pipeline is single-threaded, so the child
        // cannot inherit a lock held by another thread.
        match unsafe { fork() }
            .map_err(|e| BootstrapError::isolation(format!("fork failed: {e}")))?
        {
            ForkResult::Child => {
                drop(reader);
                let code = linux::namespace_child(privileges, op, writer);
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                drop(writer);
                tracing::debug!(pid = child.as_raw(), "isolated child forked");
                let report = linux::read_report(reader);
                let status = linux::wait(child)?;
                linux::interpret(report, status)
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl Isolator for NamespaceIsolator {
    fn run_isolated(
        &self,
        _privileges: &PrivilegeController,
        _op: &mut dyn FnMut() -> Result<String>,
    ) -> Result<String> {
        Err(BootstrapError::Config {
            message: "Linux required for native bootstrap operations".into(),
        })
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::OwnedFd;

    use nix::errno::Errno;
    use nix::sys::signal::Signal;
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::Pid;

    use super::{ChildReport, mount, pid};
    use crate::filesystem::mount::{
        MountTable, SyscallUnmounter, UNMOUNT_ATTEMPTS, UNMOUNT_BACKOFF, teardown,
    };
    use crate::privilege::PrivilegeController;
    use rootstrap_common::error::{BootstrapError, Result};

    /// Pipe for the child report. Neither end survives `exec`, so programs
    /// a phase spawns can neither hold the stream open nor write into it.
    pub(super) fn report_pipe() -> Result<(OwnedFd, OwnedFd)> {
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
            .map_err(|e| BootstrapError::isolation(format!("pipe failed: {e}")))
    }

    /// Body of the first forked child. Returns its exit code.
    pub(super) fn namespace_child(
        privileges: &PrivilegeController,
        op: &mut dyn FnMut() -> Result<String>,
        writer: OwnedFd,
    ) -> i32 {
        if let Err(e) = nix::sys::prctl::set_pdeathsig(Signal::SIGKILL) {
            return send(writer, Err(BootstrapError::isolation(format!("prctl failed: {e}"))));
        }

        let setup = privileges
            .with_elevated(|| {
                mount::create_mount_namespace()?;
                pid::create_pid_namespace()
            })
            .and_then(|r| r);
        if let Err(e) = setup {
            return send(writer, Err(e));
        }

        // SAFETY: still single-threaded; the grandchild becomes PID 1 of the
        // new namespace.
        #[allow(unsafe_code)]
        let forked = unsafe { nix::unistd::fork() };
        match forked {
            Ok(nix::unistd::ForkResult::Child) => {
                let _ = nix::sys::prctl::set_pdeathsig(Signal::SIGKILL);
                let outcome = run_as_init(privileges, op);
                send(writer, outcome)
            }
            Ok(nix::unistd::ForkResult::Parent { child }) => {
                drop(writer);
                match wait(child) {
                    Ok(WaitStatus::Exited(_, code)) => code,
                    Ok(WaitStatus::Signaled(_, signal, _)) => 128 + signal as i32,
                    _ => 1,
                }
            }
            Err(e) => send(
                writer,
                Err(BootstrapError::isolation(format!("fork into PID namespace failed: {e}"))),
            ),
        }
    }

    fn run_as_init(
        privileges: &PrivilegeController,
        op: &mut dyn FnMut() -> Result<String>,
    ) -> Result<String> {
        let before = MountTable::snapshot()?;
        let result = op();
        let released = privileges
            .with_elevated(|| {
                let after = MountTable::snapshot()?;
                let _ = teardown(&before, &after, &SyscallUnmounter, UNMOUNT_ATTEMPTS, UNMOUNT_BACKOFF)?;
                let residual = MountTable::snapshot()?;
                let left = residual.added_since(&before).len();
                if left > 0 {
                    return Err(BootstrapError::isolation(format!(
                        "{left} private mount(s) still attached after teardown"
                    )));
                }
                Ok(())
            })
            .and_then(|r| r);
        result.and_then(|payload| released.map(|()| payload))
    }

    fn send(writer: OwnedFd, outcome: Result<String>) -> i32 {
        let (report, code) = match outcome {
            Ok(payload) => (ChildReport::Ok { payload }, 0),
            Err(e) => (ChildReport::Failed { error: e.report() }, 1),
        };
        let mut file = File::from(writer);
        match serde_json::to_vec(&report) {
            Ok(bytes) if file.write_all(&bytes).is_ok() => code,
            _ => 1,
        }
    }

    pub(super) fn read_report(reader: OwnedFd) -> Option<ChildReport> {
        let mut buf = String::new();
        let mut file = File::from(reader);
        if file.read_to_string(&mut buf).is_err() || buf.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&buf).ok()
    }

    pub(super) fn wait(child: Pid) -> Result<WaitStatus> {
        loop {
            match waitpid(child, None) {
                Err(Errno::EINTR) => {}
                Err(e) => {
                    return Err(BootstrapError::isolation(format!(
                        "waiting for isolated child {child} failed: {e}"
                    )));
                }
                Ok(status) => return Ok(status),
            }
        }
    }

    pub(super) fn interpret(report: Option<ChildReport>, status: WaitStatus) -> Result<String> {
        match (report, status) {
            (Some(ChildReport::Ok { payload }), WaitStatus::Exited(_, 0)) => Ok(payload),
            (Some(ChildReport::Failed { error }), _) => Err(error.into()),
            (_, WaitStatus::Signaled(_, signal, _)) => Err(BootstrapError::isolation(format!(
                "isolated phase terminated by {signal}"
            ))),
            (_, other) => Err(BootstrapError::isolation(format!(
                "isolated phase ended without a report ({other:?})"
            ))),
        }
    }
}
