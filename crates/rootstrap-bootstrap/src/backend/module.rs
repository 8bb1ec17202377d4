//! Backends implemented by external module programs.
//!
//! Each built-in backend is a program under
//! `<libexec>/rootstrap/bootstrap/modules/build-<name>.sh`, invoked once
//! per stage with the stage name as its only argument.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use rootstrap_common::constants::{BUILDDEF_ENV, MODULE_ENV, ROOTFS_ENV};
use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_definition::Definition;

use super::Backend;
use crate::process::Launcher;

/// Stage argument passed to a module program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Optional pre-population stage.
    Prepare,
    /// Required population stage.
    Populate,
    /// Optional post-population stage.
    Finalize,
}

impl Stage {
    /// Argument string for the module program.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Populate => "populate",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter from the [`Backend`] contract to an external module program.
#[derive(Debug, Clone)]
pub struct ModuleBackend {
    name: String,
    program: PathBuf,
    prepare: bool,
    finalize: bool,
}

impl ModuleBackend {
    /// Creates a module backend with only the populate stage.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            prepare: false,
            finalize: false,
        }
    }

    /// Declares the optional stages the module program implements.
    #[must_use]
    pub fn with_stages(mut self, stages: &[Stage]) -> Self {
        self.prepare = stages.contains(&Stage::Prepare);
        self.finalize = stages.contains(&Stage::Finalize);
        self
    }

    /// Path of the module program.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn invoke(
        &self,
        stage: Stage,
        rootfs: &Path,
        definition: &Definition,
        launcher: &Launcher,
    ) -> Result<()> {
        if !self.program.is_file() {
            return Err(BootstrapError::build(format!(
                "bootstrap module program not found: {}",
                self.program.display()
            )));
        }
        tracing::info!(module = %self.name, %stage, "running bootstrap module");
        let mut cmd = Command::new(&self.program);
        let _ = cmd
            .arg(stage.as_str())
            .env(ROOTFS_ENV, rootfs)
            .env(BUILDDEF_ENV, definition.path())
            .env(MODULE_ENV, &self.name);
        launcher.run(&mut cmd, &format!("module {} {stage}", self.name))
    }
}

impl Backend for ModuleBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_prepare(&self) -> bool {
        self.prepare
    }

    fn has_finalize(&self) -> bool {
        self.finalize
    }

    fn prepare(&self, rootfs: &Path, definition: &Definition, launcher: &Launcher) -> Result<()> {
        self.invoke(Stage::Prepare, rootfs, definition, launcher)
    }

    fn populate(&self, rootfs: &Path, definition: &Definition, launcher: &Launcher) -> Result<()> {
        self.invoke(Stage::Populate, rootfs, definition, launcher)
    }

    fn finalize(&self, rootfs: &Path, definition: &Definition, launcher: &Launcher) -> Result<()> {
        self.invoke(Stage::Finalize, rootfs, definition, launcher)
    }
}
