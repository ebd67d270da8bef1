//! Command-line interface definitions for the `zonewright` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `zonewright` binary.
#[derive(Debug, Parser)]
#[command(
    name = "zonewright",
    about = "Provision and tear down ephemeral illumos zones for test runs",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create the zone, resuming from any recorded progress.
    #[command(
        name = "create",
        about = "Create the zone, resuming from any recorded progress"
    )]
    Create(StateArgs),
    /// Destroy whatever the recorded state says exists.
    #[command(
        name = "destroy",
        about = "Destroy whatever the recorded state says exists"
    )]
    Destroy(StateArgs),
    /// Print the recorded state as JSON.
    #[command(name = "status", about = "Print the recorded state as JSON")]
    Status(StateArgs),
}

/// Arguments shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct StateArgs {
    /// State file to use instead of the configured `state_path`.
    ///
    /// Relative paths are resolved against the current directory.
    #[arg(long, value_name = "PATH")]
    pub(crate) state: Option<String>,
}
