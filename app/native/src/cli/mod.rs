//! Command-line interface for Mirage.
//!
//! Display list commands edit the persisted list that a running fleet restores
//! from. `simulate` runs the fleet engine itself against a simulated display
//! subsystem.

mod commands;
mod output;

use clap::Parser;
pub use commands::Cli;

use crate::error::MirageError;

/// Runs the CLI.
///
/// Parses command-line arguments and executes the appropriate command.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn run() -> Result<(), MirageError> {
    let cli = Cli::parse();
    cli.execute()
}
