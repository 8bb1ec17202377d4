//! # rootstrap: root filesystem bootstrapper
//!
//! Reads a bootstrap definition and either hands it to the legacy driver
//! or runs the native phase pipeline against the target rootfs. Meant to be
//! installed setuid root; privileges are lowered as soon as a native build
//! passes its checks, while the legacy driver keeps the launch credentials.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod cli;

use anyhow::Context;
use clap::Parser;
use rootstrap_bootstrap::Orchestrator;
use rootstrap_common::constants::FATAL_EXIT_CODE;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new(cli.log_level())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("bootstrap failed: {e:#}");
            FATAL_EXIT_CODE
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let orchestrator = Orchestrator::from_config(cli.config())
        .context("failed to read process credentials")?;
    Ok(orchestrator.run(&cli.definition))
}
