//! Domain primitive types used across the rootstrap workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_DEFINITION_VERSION;

/// Definition format version, derived once from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionVersion {
    /// Version `1`: handled by the frozen external driver.
    Legacy,
    /// Version 2 or later: handled by the native phase pipeline.
    Native(u32),
}

impl DefinitionVersion {
    /// Derives the version from the raw header value, if any.
    ///
    /// Returns `None` when a value is present but is not a positive integer.
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        let Some(raw) = value else {
            return Some(Self::Native(DEFAULT_DEFINITION_VERSION));
        };
        match raw.trim().parse::<u32>() {
            Ok(1) => Some(Self::Legacy),
            Ok(n) if n >= 2 => Some(Self::Native(n)),
            _ => None,
        }
    }

    /// Returns whether this version takes the legacy driver path.
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::Legacy)
    }
}

impl fmt::Display for DefinitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "v1 (legacy)"),
            Self::Native(n) => write!(f, "v{n}"),
        }
    }
}

/// Privilege a phase requires while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivilegeLevel {
    /// Effective root for the duration of the phase.
    Elevated,
    /// Explicitly lowered effective ids for the duration of the phase.
    Unprivileged,
}

/// Execution context a phase requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationMode {
    /// Private mount table and private PID view.
    Isolated,
    /// Run directly in the caller's context.
    None,
}

/// Current effective privilege of the build process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivilegeState {
    /// At rest between scoped operations; effective ids are unprivileged.
    Idle,
    /// Inside a scoped elevation.
    Elevated,
    /// Inside a scoped drop.
    Dropped,
}

impl fmt::Display for PrivilegeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Elevated => write!(f, "elevated"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

/// One ordered stage of the native build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Host-side preparation before the backend runs.
    PreBootstrap,
    /// The backend populates the root filesystem.
    ModulePopulation,
    /// Hooks that finish the root filesystem after population.
    PostBootstrap,
}

impl Phase {
    /// All phases, in execution order.
    pub const ORDER: [Self; 3] = [Self::PreBootstrap, Self::ModulePopulation, Self::PostBootstrap];

    /// Privilege the phase body runs under.
    pub const fn privilege(self) -> PrivilegeLevel {
        match self {
            Self::PreBootstrap => PrivilegeLevel::Unprivileged,
            Self::ModulePopulation | Self::PostBootstrap => PrivilegeLevel::Elevated,
        }
    }

    /// Isolation the phase body runs under.
    pub const fn isolation(self) -> IsolationMode {
        match self {
            Self::PreBootstrap => IsolationMode::None,
            Self::ModulePopulation | Self::PostBootstrap => IsolationMode::Isolated,
        }
    }

    /// Phase that follows this one, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::PreBootstrap => Some(Self::ModulePopulation),
            Self::ModulePopulation => Some(Self::PostBootstrap),
            Self::PostBootstrap => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreBootstrap => write!(f, "pre-bootstrap"),
            Self::ModulePopulation => write!(f, "module-population"),
            Self::PostBootstrap => write!(f, "post-bootstrap"),
        }
    }
}
