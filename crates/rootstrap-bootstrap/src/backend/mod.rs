//! Population backends and the registry that resolves them by name.

pub mod module;

use std::collections::BTreeMap;
use std::path::Path;

use rootstrap_common::config::BootstrapConfig;
use rootstrap_common::error::{BootstrapError, Result};
use rootstrap_definition::Definition;

use crate::process::Launcher;

pub use self::module::{ModuleBackend, Stage};

/// Capability contract every population backend satisfies.
///
/// `populate` is required. `prepare` and `finalize` are optional stages;
/// a backend that has them reports so through `has_prepare` /
/// `has_finalize`. Every program a stage spawns goes through `launcher`.
pub trait Backend {
    /// Name the backend is registered under.
    fn name(&self) -> &str;

    /// Whether the backend has a stage to run before population.
    fn has_prepare(&self) -> bool {
        false
    }

    /// Whether the backend has a stage to run after population.
    fn has_finalize(&self) -> bool {
        false
    }

    /// Fetches whatever population needs, such as remote layers.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Build`] if preparation fails.
    fn prepare(
        &self,
        _rootfs: &Path,
        _definition: &Definition,
        _launcher: &Launcher,
    ) -> Result<()> {
        Ok(())
    }

    /// Populates the root filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Build`] if population fails.
    fn populate(&self, rootfs: &Path, definition: &Definition, launcher: &Launcher) -> Result<()>;

    /// Backend-specific cleanup after a successful population.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Build`] if cleanup fails.
    fn finalize(
        &self,
        _rootfs: &Path,
        _definition: &Definition,
        _launcher: &Launcher,
    ) -> Result<()> {
        Ok(())
    }
}

/// Built-in backend names and the optional stages their modules provide.
pub const BUILTIN_MODULES: [(&str, &[Stage]); 5] = [
    ("docker", &[Stage::Prepare]),
    ("yum", &[Stage::Finalize]),
    ("debootstrap", &[Stage::Finalize]),
    ("arch", &[Stage::Finalize]),
    ("busybox", &[]),
];

/// Closed mapping from backend name to implementation.
///
/// Resolution is exact string equality. Adding a backend means adding an
/// entry, never changing how names are matched.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn Backend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.backends.keys()).finish()
    }
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in module backends.
    pub fn builtin(config: &BootstrapConfig) -> Self {
        let mut registry = Self::new();
        for (name, stages) in BUILTIN_MODULES {
            let backend = ModuleBackend::new(name, config.module_program(name)).with_stages(stages);
            let _ = registry.register(name, Box::new(backend));
        }
        registry
    }

    /// Registers a backend, returning any backend it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        backend: Box<dyn Backend>,
    ) -> Option<Box<dyn Backend>> {
        self.backends.insert(name.into(), backend)
    }

    /// Resolves a backend by exact name.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::UnknownBackend`] if no entry matches.
    pub fn resolve(&self, name: &str) -> Result<&dyn Backend> {
        self.backends
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| BootstrapError::UnknownBackend {
                name: name.to_owned(),
            })
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}
