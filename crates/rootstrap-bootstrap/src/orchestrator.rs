//! Top-level entry point for one bootstrap run.
//!
//! Loads the definition, picks the legacy or native path from its version,
//! and turns the outcome into a process exit code.

use std::path::Path;

use rootstrap_common::config::BootstrapConfig;
use rootstrap_common::constants::{BOOTSTRAP_KEY, SUCCESS_EXIT_CODE, VERSION_KEY};
use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_common::types::DefinitionVersion;
use rootstrap_core::{IsolationLayer, PrivilegeController, SetuidMechanism};
use rootstrap_definition::Definition;

use crate::backend::BackendRegistry;
use crate::legacy::LegacyDriver;
use crate::phase::{PhaseReport, PhaseSequencer};

/// How a successful run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The native pipeline completed every phase.
    Native {
        /// Backend that populated the rootfs.
        backend: String,
        /// Per-phase observations, in order.
        phases: Vec<PhaseReport>,
    },
    /// The legacy driver ran; its exit code is reported verbatim.
    Legacy {
        /// Exit code of the driver.
        code: i32,
    },
}

impl Outcome {
    /// Process exit code for this outcome.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Native { .. } => SUCCESS_EXIT_CODE,
            Self::Legacy { code } => *code,
        }
    }
}

/// Coordinates one build from definition file to exit code.
#[derive(Debug)]
pub struct Orchestrator {
    config: BootstrapConfig,
    registry: BackendRegistry,
    privileges: PrivilegeController,
    isolation: IsolationLayer,
}

impl Orchestrator {
    /// Creates an orchestrator from explicit parts.
    ///
    /// `privileges` is left as it is until a native build starts.
    pub const fn new(
        config: BootstrapConfig,
        registry: BackendRegistry,
        privileges: PrivilegeController,
        isolation: IsolationLayer,
    ) -> Self {
        Self {
            config,
            registry,
            privileges,
            isolation,
        }
    }

    /// Creates an orchestrator with the built-in backends, the platform
    /// privilege mechanism, and namespace isolation.
    ///
    /// Detection only reads the process credentials. Nothing is lowered
    /// until a native build passes its preflight checks, so the legacy
    /// driver runs with the credentials we were launched with.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Privilege`] if the process credentials
    /// cannot be read.
    pub fn from_config(config: BootstrapConfig) -> Result<Self> {
        let privileges = PrivilegeController::new(Box::new(SetuidMechanism::detect()?));
        let registry = BackendRegistry::builtin(&config);
        Ok(Self::new(
            config,
            registry,
            privileges,
            IsolationLayer::namespaces(),
        ))
    }

    /// The privilege controller this orchestrator drives.
    pub const fn privileges(&self) -> &PrivilegeController {
        &self.privileges
    }

    /// Runs the build and maps the result to an exit code.
    ///
    /// A failure is reported through exactly one `error!` event.
    pub fn run(&self, path: &Path) -> i32 {
        match self.execute(path) {
            Ok(outcome) => outcome.exit_code(),
            Err(e) => {
                tracing::error!(definition = %path.display(), error = %e, "bootstrap failed");
                e.exit_code()
            }
        }
    }

    /// Runs the build described by the definition at `path`.
    ///
    /// The definition is closed on every path out of this function.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: parse, backend resolution,
    /// configuration, privilege, isolation, or build.
    pub fn execute(&self, path: &Path) -> Result<Outcome> {
        let mut definition = Definition::load(path)?;
        let result = self.dispatch(&mut definition);
        definition.close();
        result
    }

    fn dispatch(&self, definition: &mut Definition) -> Result<Outcome> {
        let version = DefinitionVersion::from_header(definition.get(VERSION_KEY)).ok_or_else(
            || BootstrapError::Parse {
                path: definition.path().to_path_buf(),
                line: 0,
                message: format!(
                    "invalid {VERSION_KEY} {:?}: expected a positive integer",
                    definition.get(VERSION_KEY).unwrap_or_default()
                ),
            },
        )?;
        tracing::debug!(%version, "definition version");

        match version {
            DefinitionVersion::Legacy => {
                definition.close();
                let code = LegacyDriver::from_config(&self.config).run(definition.path())?;
                Ok(Outcome::Legacy { code })
            }
            DefinitionVersion::Native(_) => self.native(definition),
        }
    }

    fn native(&self, definition: &Definition) -> Result<Outcome> {
        let name = definition
            .get(BOOTSTRAP_KEY)
            .ok_or_else(|| BootstrapError::MissingBackend {
                path: definition.path().to_path_buf(),
            })?;
        let backend = self.registry.resolve(name)?;
        let rootfs = self.config.require_rootfs()?;
        if !self.privileges.can_elevate() {
            return Err(BootstrapError::privilege(
                "native builds need to elevate (is the binary setuid root?)",
            ));
        }
        self.privileges.settle()?;
        tracing::info!(backend = name, rootfs = %rootfs.display(), "starting native bootstrap");

        let phases = PhaseSequencer::new(&self.privileges, &self.isolation)
            .run(backend, rootfs, definition)
            .into_result()?;
        tracing::info!(backend = name, "bootstrap complete");
        Ok(Outcome::Native {
            backend: name.to_owned(),
            phases,
        })
    }
}
