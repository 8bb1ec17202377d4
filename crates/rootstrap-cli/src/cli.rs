//! Command-line surface of the `rootstrap` binary.

use std::path::PathBuf;

use clap::Parser;
use rootstrap_common::config::BootstrapConfig;
use rootstrap_common::constants::{DEFAULT_LIBEXEC_DIR, LIBEXEC_DIR_ENV, ROOTFS_ENV};

/// Build a container root filesystem from a definition file.
#[derive(Parser, Debug)]
#[command(name = "rootstrap", version, about, long_about = None)]
pub struct Cli {
    /// Path to the bootstrap definition file.
    pub definition: PathBuf,

    /// Target root filesystem directory.
    #[arg(long, env = ROOTFS_ENV)]
    pub rootfs: Option<PathBuf>,

    /// Installation libexec prefix holding the bootstrap helpers.
    #[arg(long, env = LIBEXEC_DIR_ENV, default_value = DEFAULT_LIBEXEC_DIR)]
    pub libexec_dir: PathBuf,

    /// Log at debug level regardless of `RUST_LOG`.
    #[arg(short, long)]
    pub debug: bool,
}

impl Cli {
    /// Configuration for the orchestrator.
    pub fn config(&self) -> BootstrapConfig {
        BootstrapConfig {
            rootfs: self.rootfs.clone(),
            libexec_dir: self.libexec_dir.clone(),
        }
    }

    /// Default log filter directive when `RUST_LOG` is unset.
    pub const fn log_level(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_fill_config() {
        let cli = Cli::try_parse_from([
            "rootstrap",
            "--rootfs",
            "/var/tmp/rootfs",
            "--libexec-dir",
            "/opt/libexec",
            "alpine.def",
        ])
        .expect("should parse");
        assert_eq!(cli.definition, PathBuf::from("alpine.def"));
        let config = cli.config();
        assert_eq!(config.rootfs.as_deref(), Some(std::path::Path::new("/var/tmp/rootfs")));
        assert_eq!(config.libexec_dir, PathBuf::from("/opt/libexec"));
    }

    #[test]
    fn debug_raises_log_level() {
        let cli = Cli::try_parse_from(["rootstrap", "-d", "x.def"]).expect("should parse");
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn definition_is_required() {
        assert!(Cli::try_parse_from(["rootstrap"]).is_err());
    }
}
