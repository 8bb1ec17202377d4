//! Configuration supplied by the invoking environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{BOOTSTRAP_LIBEXEC_SUBDIR, DEFAULT_LIBEXEC_DIR, LEGACY_DRIVER_NAME};
use crate::error::{BootstrapError, Result};

/// Root configuration for one bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Target root filesystem. Required for native builds only.
    pub rootfs: Option<PathBuf>,
    /// Installation libexec prefix used to locate helper programs.
    pub libexec_dir: PathBuf,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            rootfs: None,
            libexec_dir: PathBuf::from(DEFAULT_LIBEXEC_DIR),
        }
    }
}

impl BootstrapConfig {
    /// Creates a configuration for the given rootfs and libexec prefix.
    pub fn new(rootfs: impl Into<PathBuf>, libexec_dir: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: Some(rootfs.into()),
            libexec_dir: libexec_dir.into(),
        }
    }

    /// Returns the target rootfs, failing if the environment supplied none.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] when no rootfs is configured or
    /// the configured path is relative.
    pub fn require_rootfs(&self) -> Result<&Path> {
        let rootfs = self.rootfs.as_deref().ok_or_else(|| BootstrapError::Config {
            message: "no target root filesystem configured (set ROOTSTRAP_ROOTFS)".into(),
        })?;
        if !rootfs.is_absolute() {
            return Err(BootstrapError::Config {
                message: format!("rootfs path must be absolute: {}", rootfs.display()),
            });
        }
        Ok(rootfs)
    }

    /// Directory holding the bootstrap helper programs.
    pub fn bootstrap_libexec(&self) -> PathBuf {
        self.libexec_dir.join(BOOTSTRAP_LIBEXEC_SUBDIR)
    }

    /// Path of the frozen v1 driver.
    pub fn legacy_driver(&self) -> PathBuf {
        self.bootstrap_libexec().join(LEGACY_DRIVER_NAME)
    }

    /// Path of the external module program for a backend name.
    pub fn module_program(&self, name: &str) -> PathBuf {
        self.bootstrap_libexec()
            .join("modules")
            .join(format!("build-{name}.sh"))
    }
}
