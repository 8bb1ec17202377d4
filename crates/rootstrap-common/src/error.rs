//! Unified error taxonomy for the rootstrap workspace.
//!
//! Every failure the bootstrap core can detect maps to exactly one variant.
//! None of them is recoverable inside the core: they surface to the
//! orchestrator, which reports a single diagnostic and exits non-zero.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::FATAL_EXIT_CODE;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The definition file is missing, unreadable, or structurally malformed.
    #[error("parse error in {}{}: {message}", path.display(), line_suffix(*line))]
    Parse {
        /// Definition file being parsed.
        path: PathBuf,
        /// 1-based line number, or 0 when the error is not tied to a line.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A native definition has no `Bootstrap` header.
    #[error("definition {} does not contain a Bootstrap: line", path.display())]
    MissingBackend {
        /// Definition file lacking the key.
        path: PathBuf,
    },

    /// The `Bootstrap` header names a backend nobody registered.
    #[error("unknown bootstrap module: {name}")]
    UnknownBackend {
        /// Requested backend name, verbatim.
        name: String,
    },

    /// Privilege escalation or drop failed, or was attempted out of contract.
    #[error("privilege error: {message}")]
    Privilege {
        /// Description of the failed transition.
        message: String,
    },

    /// Namespace creation or mount teardown failed.
    #[error("isolation error: {message}")]
    Isolation {
        /// Description of the isolation failure.
        message: String,
    },

    /// A backend or phase hook failed to populate the root filesystem.
    #[error("build error: {message}")]
    Build {
        /// Description of the build failure.
        message: String,
    },

    /// The invoking environment supplied unusable configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

fn line_suffix(line: usize) -> String {
    if line == 0 {
        String::new()
    } else {
        format!(":{line}")
    }
}

impl BootstrapError {
    /// Shorthand for a [`BootstrapError::Build`].
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// Shorthand for a [`BootstrapError::Privilege`].
    pub fn privilege(message: impl Into<String>) -> Self {
        Self::Privilege {
            message: message.into(),
        }
    }

    /// Shorthand for a [`BootstrapError::Isolation`].
    pub fn isolation(message: impl Into<String>) -> Self {
        Self::Isolation {
            message: message.into(),
        }
    }

    /// Process exit code reported for this error.
    ///
    /// All errors the core raises are fatal and share one code.
    pub const fn exit_code(&self) -> i32 {
        FATAL_EXIT_CODE
    }

    /// Serialisable summary used to carry an error across a process boundary.
    pub fn report(&self) -> ErrorReport {
        let (kind, message) = match self {
            Self::Privilege { message } => (ErrorKind::Privilege, message.clone()),
            Self::Isolation { message } => (ErrorKind::Isolation, message.clone()),
            Self::Build { message } => (ErrorKind::Build, message.clone()),
            other => (ErrorKind::Build, other.to_string()),
        };
        ErrorReport { kind, message }
    }
}

/// Category carried by an [`ErrorReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Maps back to [`BootstrapError::Privilege`].
    Privilege,
    /// Maps back to [`BootstrapError::Isolation`].
    Isolation,
    /// Maps back to [`BootstrapError::Build`].
    Build,
}

/// Error summary that survives serialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl From<ErrorReport> for BootstrapError {
    fn from(report: ErrorReport) -> Self {
        match report.kind {
            ErrorKind::Privilege => Self::privilege(report.message),
            ErrorKind::Isolation => Self::isolation(report.message),
            ErrorKind::Build => Self::build(report.message),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BootstrapError>;
