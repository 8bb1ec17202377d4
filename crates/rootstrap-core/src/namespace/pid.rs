//! PID namespace isolation.
//!
//! Backend helpers run inside their own process ID space, where the
//! isolated phase's first child is PID 1. When it exits, the kernel kills
//! everything left in the namespace.

use rootstrap_common::error::{BootstrapError, Result};

/// Creates a new PID namespace for the children of the calling process.
///
/// After a successful call, the next `fork(2)` child will see
/// itself as PID 1 inside the new namespace.
///
/// # Errors
///
/// Returns an error if the `unshare(CLONE_NEWPID)` syscall fails.
#[cfg(target_os = "linux")]
pub fn create_pid_namespace() -> Result<()> {
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWPID)
        .map_err(|e| BootstrapError::isolation(format!("PID namespace creation failed: {e}")))?;
    tracing::debug!("PID namespace created");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: PID namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_pid_namespace() -> Result<()> {
    Err(BootstrapError::Config {
        message: "Linux required for native bootstrap operations".into(),
    })
}
