//! Handoff to the frozen version-1 driver.
//!
//! Version-1 definitions never reach the phase pipeline. The driver is run
//! as a blocking subprocess and its exit code becomes ours.

use std::path::{Path, PathBuf};
use std::process::Command;

use rootstrap_common::config::BootstrapConfig;
use rootstrap_common::constants::ROOTFS_ENV;
use rootstrap_common::error::{BootstrapError, Result};

use crate::process;

/// The external driver that builds version-1 definitions.
#[derive(Debug, Clone)]
pub struct LegacyDriver {
    program: PathBuf,
    rootfs: Option<PathBuf>,
}

impl LegacyDriver {
    /// Creates a driver handle for an explicit program path.
    pub fn new(program: impl Into<PathBuf>, rootfs: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            rootfs,
        }
    }

    /// Locates the driver under the configured libexec directory.
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self::new(config.legacy_driver(), config.rootfs.clone())
    }

    /// Path of the driver program.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs the driver on `definition` and returns its exit code.
    ///
    /// The driver inherits our environment, plus `ROOTSTRAP_ROOTFS` when a
    /// rootfs is configured. Death by signal maps to `128 + signo`.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] if the driver is not installed, or
    /// [`BootstrapError::Build`] if it cannot be spawned.
    pub fn run(&self, definition: &Path) -> Result<i32> {
        if !self.program.is_file() {
            return Err(BootstrapError::Config {
                message: format!("legacy driver not found: {}", self.program.display()),
            });
        }
        let mut cmd = Command::new(&self.program);
        let _ = cmd.arg(definition);
        if let Some(rootfs) = &self.rootfs {
            let _ = cmd.env(ROOTFS_ENV, rootfs);
        }
        tracing::info!(driver = %self.program.display(), definition = %definition.display(), "handing off to legacy driver");
        let status = cmd.status().map_err(|e| {
            BootstrapError::build(format!(
                "failed to spawn {}: {e}",
                self.program.display()
            ))
        })?;
        let code = process::exit_code(status);
        tracing::debug!(code, "legacy driver exited");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn driver(dir: &Path, body: &str) -> PathBuf {
        let program = dir.join("driver-v1.sh");
        std::fs::write(&program, format!("#!/bin/sh\n{body}\n")).expect("write driver");
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        program
    }

    #[test]
    fn exit_code_passes_through() {
        let dir = tempfile::tempdir().expect("tempdir");
        let legacy = LegacyDriver::new(driver(dir.path(), "exit 7"), None);
        assert_eq!(legacy.run(Path::new("/tmp/def")).expect("run"), 7);
    }

    #[test]
    fn receives_definition_and_rootfs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("args");
        let body = format!("echo \"$1 $ROOTSTRAP_ROOTFS\" > {}", out.display());
        let legacy = LegacyDriver::new(
            driver(dir.path(), &body),
            Some(PathBuf::from("/build/rootfs")),
        );
        assert_eq!(legacy.run(Path::new("/defs/old.def")).expect("run"), 0);
        let seen = std::fs::read_to_string(out).expect("read");
        assert_eq!(seen.trim(), "/defs/old.def /build/rootfs");
    }

    #[test]
    fn signal_death_maps_to_128_plus_signo() {
        let dir = tempfile::tempdir().expect("tempdir");
        let legacy = LegacyDriver::new(driver(dir.path(), "kill -TERM $$"), None);
        assert_eq!(legacy.run(Path::new("/tmp/def")).expect("run"), 128 + 15);
    }

    #[test]
    fn missing_driver_is_config_error() {
        let config = BootstrapConfig::new("/build/rootfs", "/nonexistent/libexec");
        let legacy = LegacyDriver::from_config(&config);
        assert!(matches!(
            legacy.run(Path::new("/tmp/def")),
            Err(BootstrapError::Config { .. })
        ));
    }
}
