//! Blocking subprocess helpers shared by backends, hooks, and the legacy
//! driver.
//!
//! Programs started inside a phase go through a [`Launcher`], which makes
//! them run with the ids of the phase's privilege scope rather than
//! whatever ids the bootstrap process happens to hold.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus};

use rootstrap_common::constants::{BUILDDEF_ENV, ROOTFS_ENV};
use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_core::{Credentials, PrivilegeController};

/// Maps an exit status to a shell-style exit code.
///
/// Death by signal maps to `128 + signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Runs a command to completion, treating a non-zero exit as a build error.
///
/// # Errors
///
/// Returns [`BootstrapError::Build`] if the command cannot be spawned or
/// exits unsuccessfully.
pub fn run(cmd: &mut Command, what: &str) -> Result<()> {
    tracing::debug!(command = ?cmd, "spawning {what}");
    let status = cmd
        .status()
        .map_err(|e| BootstrapError::build(format!("{what}: failed to spawn: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(BootstrapError::build(format!(
            "{what} exited with status {}",
            exit_code(status)
        )))
    }
}

/// Spawns phase programs with the credentials of a privilege scope.
///
/// The default launcher switches nothing; the program inherits our ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Launcher {
    credentials: Option<Credentials>,
}

impl Launcher {
    /// Launcher that switches spawned programs to `credentials`.
    pub const fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }

    /// Launcher for programs started in the controller's current scope.
    pub fn for_scope(privileges: &PrivilegeController) -> Self {
        Self::new(privileges.spawn_credentials())
    }

    /// Ids spawned programs will run with, if they are switched.
    pub const fn credentials(&self) -> Option<Credentials> {
        self.credentials
    }

    /// Like the free function `run`, after switching the command to this
    /// launcher's ids.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Build`] if the command cannot be spawned,
    /// cannot assume the ids, or exits unsuccessfully.
    pub fn run(&self, cmd: &mut Command, what: &str) -> Result<()> {
        if let Some(credentials) = self.credentials {
            tracing::trace!(
                uid = credentials.uid,
                gid = credentials.gid,
                "{what} runs with scope credentials"
            );
            credentials.apply(cmd);
        }
        run(cmd, what)
    }
}

/// Builds a `/bin/sh -e -c <script>` command for a definition section.
///
/// The script sees the rootfs and definition path in its environment.
pub fn shell_script(script: &str, rootfs: &Path, definition: &Path) -> Command {
    let mut cmd = Command::new("/bin/sh");
    let _ = cmd
        .args(["-e", "-c", script])
        .env(ROOTFS_ENV, rootfs)
        .env(BUILDDEF_ENV, definition);
    cmd
}
