//! Mount namespace isolation.
//!
//! Gives the bootstrap child its own mount table so that mounts made while
//! populating the root filesystem never show up in the host's view.

use rootstrap_common::error::{BootstrapError, Result};

/// Creates a new mount namespace and makes `/` recursively private.
///
/// Without the propagation change, mounts made inside the namespace could
/// still propagate back to shared peers on the host.
///
/// # Errors
///
/// Returns an error if `unshare(CLONE_NEWNS)` or the propagation change fails.
#[cfg(target_os = "linux")]
pub fn create_mount_namespace() -> Result<()> {
    use nix::mount::{MsFlags, mount};
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWNS)
        .map_err(|e| BootstrapError::isolation(format!("mount namespace creation failed: {e}")))?;
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| BootstrapError::isolation(format!("making / private failed: {e}")))?;
    tracing::debug!("mount namespace created");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_mount_namespace() -> Result<()> {
    Err(BootstrapError::Config {
        message: "Linux required for native bootstrap operations".into(),
    })
}
