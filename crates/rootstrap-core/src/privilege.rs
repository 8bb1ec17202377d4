//! Scoped privilege management for the bootstrap process.
//!
//! The process rests with unprivileged effective ids. Elevation and drops
//! happen only inside [`PrivilegeController::with_elevated`] and
//! [`PrivilegeController::with_dropped`], and the resting state is restored
//! on every exit path, including unwinding.
//!
//! Changing effective ids is not enough for spawned programs: a shell
//! resets its effective uid to the real one. Programs started inside a
//! scope therefore switch all of their ids to [`Credentials`] reported by
//! [`PrivilegeController::spawn_credentials`].

use std::cell::Cell;
use std::process::Command;

use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_common::types::{PrivilegeLevel, PrivilegeState};

/// OS-level mechanism that switches effective ids.
pub trait PrivilegeMechanism {
    /// Returns whether the process is able to regain root at all.
    fn can_elevate(&self) -> bool;

    /// Switches effective ids to root.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying syscalls fail.
    fn elevate(&self) -> Result<()>;

    /// Switches effective ids to the unprivileged target. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying syscalls fail.
    fn lower(&self) -> Result<()>;

    /// Ids a program spawned in the given state must run with, if the
    /// mechanism switches credentials at all.
    fn credentials(&self, _state: PrivilegeState) -> Option<Credentials> {
        None
    }
}

/// Real, effective, and saved ids for a spawned program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// User id for all three uid slots.
    pub uid: u32,
    /// Group id for all three gid slots.
    pub gid: u32,
}

impl Credentials {
    /// Full root.
    pub const ROOT: Self = Self::new(0, 0);

    /// Credentials for the given user and group.
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Makes `cmd` assume these ids between fork and exec.
    ///
    /// Supplementary groups are cleared whenever the child can still become
    /// root. If the switch fails the spawn fails.
    #[cfg(target_os = "linux")]
    #[allow(unsafe_code)]
    pub fn apply(self, cmd: &mut Command) {
        use std::os::unix::process::CommandExt;

        // SAFETY: the hook only issues setgroups/setresgid/setresuid, which
        // do not allocate or take locks in the forked child.
        let _ = unsafe { cmd.pre_exec(move || self.assume()) };
    }

    /// Stub for non-Linux platforms; the command keeps our ids.
    #[cfg(not(target_os = "linux"))]
    pub fn apply(self, _cmd: &mut Command) {}

    #[cfg(target_os = "linux")]
    fn assume(self) -> std::io::Result<()> {
        use nix::unistd::{Gid, Uid, seteuid, setgroups, setresgid, setresuid};

        if seteuid(Uid::from_raw(0)).is_ok() {
            setgroups(&[])?;
        }
        let gid = Gid::from_raw(self.gid);
        setresgid(gid, gid, gid)?;
        let uid = Uid::from_raw(self.uid);
        setresuid(uid, uid, uid)?;
        Ok(())
    }
}

/// Saved-set-user-ID mechanism built on `seteuid(2)` / `setegid(2)`.
///
/// A setuid-root launch lowers to the real ids. A launch as real root
/// lowers to `SUDO_UID`/`SUDO_GID` when present, else to `nobody`.
#[derive(Debug, Clone, Copy)]
pub struct SetuidMechanism {
    target_uid: u32,
    target_gid: u32,
    can_elevate: bool,
}

#[cfg(target_os = "linux")]
impl SetuidMechanism {
    /// Inspects the process credentials and picks the unprivileged target.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be read.
    pub fn detect() -> Result<Self> {
        use nix::unistd::{getresgid, getresuid};

        let uids = getresuid()
            .map_err(|e| BootstrapError::privilege(format!("getresuid failed: {e}")))?;
        let gids = getresgid()
            .map_err(|e| BootstrapError::privilege(format!("getresgid failed: {e}")))?;

        let mechanism = if uids.real.is_root() {
            Self {
                target_uid: env_id("SUDO_UID"),
                target_gid: env_id("SUDO_GID"),
                can_elevate: true,
            }
        } else {
            Self {
                target_uid: uids.real.as_raw(),
                target_gid: gids.real.as_raw(),
                can_elevate: uids.effective.is_root() || uids.saved.is_root(),
            }
        };
        tracing::debug!(
            real_uid = uids.real.as_raw(),
            target_uid = mechanism.target_uid,
            can_elevate = mechanism.can_elevate,
            "privilege mechanism detected"
        );
        Ok(mechanism)
    }
}

#[cfg(not(target_os = "linux"))]
impl SetuidMechanism {
    /// Stub for non-Linux platforms.
    ///
    /// # Errors
    ///
    /// Always returns an error: credential switching requires Linux.
    pub fn detect() -> Result<Self> {
        Err(BootstrapError::Config {
            message: "Linux required for privileged bootstrap".into(),
        })
    }
}

#[cfg(target_os = "linux")]
fn env_id(var: &str) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|id| *id != 0)
        .unwrap_or(rootstrap_common::constants::NOBODY_ID)
}

impl PrivilegeMechanism for SetuidMechanism {
    fn can_elevate(&self) -> bool {
        self.can_elevate
    }

    #[cfg(target_os = "linux")]
    fn elevate(&self) -> Result<()> {
        use nix::unistd::{Gid, Uid, setegid, seteuid};

        seteuid(Uid::from_raw(0))
            .map_err(|e| BootstrapError::privilege(format!("seteuid(0) failed: {e}")))?;
        setegid(Gid::from_raw(0))
            .map_err(|e| BootstrapError::privilege(format!("setegid(0) failed: {e}")))?;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn lower(&self) -> Result<()> {
        use nix::unistd::{Gid, Uid, geteuid, setegid, seteuid};

        // The gid can only change while the effective uid is still root.
        if geteuid().is_root() {
            setegid(Gid::from_raw(self.target_gid)).map_err(|e| {
                BootstrapError::privilege(format!("setegid({}) failed: {e}", self.target_gid))
            })?;
        }
        seteuid(Uid::from_raw(self.target_uid)).map_err(|e| {
            BootstrapError::privilege(format!("seteuid({}) failed: {e}", self.target_uid))
        })?;
        Ok(())
    }

    fn credentials(&self, state: PrivilegeState) -> Option<Credentials> {
        Some(match state {
            PrivilegeState::Elevated => Credentials::ROOT,
            PrivilegeState::Dropped | PrivilegeState::Idle => {
                Credentials::new(self.target_uid, self.target_gid)
            }
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn elevate(&self) -> Result<()> {
        Err(BootstrapError::privilege("Linux required for privilege escalation"))
    }

    #[cfg(not(target_os = "linux"))]
    fn lower(&self) -> Result<()> {
        Err(BootstrapError::privilege("Linux required for privilege drop"))
    }
}

/// Single per-build privilege token.
///
/// Not `Sync`: the state lives in a [`Cell`] and must not be shared across
/// threads.
pub struct PrivilegeController {
    mechanism: Box<dyn PrivilegeMechanism>,
    state: Cell<PrivilegeState>,
}

impl std::fmt::Debug for PrivilegeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegeController")
            .field("state", &self.state.get())
            .field("can_elevate", &self.mechanism.can_elevate())
            .finish_non_exhaustive()
    }
}

/// Restores the resting state when dropped, covering unwinding.
struct RestoreGuard<'a> {
    controller: &'a PrivilegeController,
    armed: bool,
}

impl RestoreGuard<'_> {
    fn release(mut self) -> Result<()> {
        self.armed = false;
        self.controller.restore()
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.controller.restore() {
                tracing::error!(error = %e, "failed to restore privileges while unwinding");
            }
        }
    }
}

impl PrivilegeController {
    /// Wraps a mechanism without touching the current credentials.
    pub fn new(mechanism: Box<dyn PrivilegeMechanism>) -> Self {
        Self {
            mechanism,
            state: Cell::new(PrivilegeState::Idle),
        }
    }

    /// Lowers to the resting credentials outside of any scope.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Privilege`] if a scope is active or the
    /// drop fails.
    pub fn settle(&self) -> Result<()> {
        let current = self.state.get();
        if current != PrivilegeState::Idle {
            return Err(BootstrapError::privilege(format!(
                "cannot settle privileges while {current}"
            )));
        }
        self.mechanism.lower()?;
        tracing::debug!("privileges lowered to resting state");
        Ok(())
    }

    /// Current privilege state.
    pub fn state(&self) -> PrivilegeState {
        self.state.get()
    }

    /// Returns whether elevation is possible at all.
    pub fn can_elevate(&self) -> bool {
        self.mechanism.can_elevate()
    }

    /// Ids a program spawned right now must run with.
    ///
    /// `None` means the mechanism does not switch credentials and spawned
    /// programs inherit ours.
    pub fn spawn_credentials(&self) -> Option<Credentials> {
        self.mechanism.credentials(self.state.get())
    }

    /// Runs `op` with root effective ids, then lowers again.
    ///
    /// `op` does not run when elevation is impossible or fails.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Privilege`] on nesting, missing capability,
    /// or a failed transition in either direction.
    pub fn with_elevated<T>(&self, op: impl FnOnce() -> T) -> Result<T> {
        self.scoped(PrivilegeState::Elevated, op)
    }

    /// Runs `op` with unprivileged effective ids, then restores.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Privilege`] on nesting or a failed
    /// transition.
    pub fn with_dropped<T>(&self, op: impl FnOnce() -> T) -> Result<T> {
        self.scoped(PrivilegeState::Dropped, op)
    }

    /// Runs `op` under the given privilege level.
    ///
    /// # Errors
    ///
    /// See [`Self::with_elevated`] and [`Self::with_dropped`].
    pub fn with_level<T>(&self, level: PrivilegeLevel, op: impl FnOnce() -> T) -> Result<T> {
        match level {
            PrivilegeLevel::Elevated => self.with_elevated(op),
            PrivilegeLevel::Unprivileged => self.with_dropped(op),
        }
    }

    fn scoped<T>(&self, target: PrivilegeState, op: impl FnOnce() -> T) -> Result<T> {
        let current = self.state.get();
        if current != PrivilegeState::Idle {
            return Err(BootstrapError::privilege(format!(
                "cannot enter {target} scope while already {current}"
            )));
        }

        match target {
            PrivilegeState::Elevated => {
                if !self.mechanism.can_elevate() {
                    return Err(BootstrapError::privilege(
                        "process lacks the capability to elevate (is the binary setuid root?)",
                    ));
                }
                if let Err(e) = self.mechanism.elevate() {
                    // Fail closed: a half-applied elevation must not linger.
                    self.mechanism.lower()?;
                    return Err(e);
                }
            }
            PrivilegeState::Dropped | PrivilegeState::Idle => self.mechanism.lower()?,
        }
        self.state.set(target);
        tracing::debug!(state = %target, "privilege scope entered");

        let guard = RestoreGuard {
            controller: self,
            armed: true,
        };
        let value = op();
        guard.release()?;
        Ok(value)
    }

    fn restore(&self) -> Result<()> {
        // On failure the state stays non-idle, so every later scope is refused.
        self.mechanism.lower()?;
        self.state.set(PrivilegeState::Idle);
        tracing::debug!("privilege scope left");
        Ok(())
    }
}
