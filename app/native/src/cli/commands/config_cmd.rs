//! Settings file commands.

use std::path::PathBuf;

use clap::Subcommand;

use crate::config::template::{create_config_file, generate_config_template};
use crate::config::{config_paths, get_config_path};
use crate::error::MirageError;

/// Settings management commands.
#[derive(Subcommand, Debug)]
#[command(next_display_order = None)]
pub enum ConfigCommands {
    /// Write a settings file with every option documented.
    ///
    /// All options are commented out, so the file behaves like the defaults
    /// until you uncomment what you want to change.
    #[command(
        name = "init",
        after_long_help = r#"Examples:
  mirage config init                        # Create settings at the default location
  mirage config init --force                # Overwrite existing settings
  mirage config init --path ./settings.jsonc  # Create at a custom path
  mirage config init --stdout               # Print the template to stdout"#
    )]
    Init {
        /// Overwrite an existing settings file.
        #[arg(long, short)]
        force: bool,

        /// Custom path for the settings file.
        #[arg(long, short, value_name = "PATH")]
        path: Option<PathBuf>,

        /// Print the template to stdout instead of writing a file.
        #[arg(long)]
        stdout: bool,
    },

    /// Show where Mirage looks for its settings file.
    Path,
}

/// Executes a settings subcommand.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cmd: &ConfigCommands) -> Result<(), MirageError> {
    match cmd {
        ConfigCommands::Init { force, path, stdout } => {
            if *stdout {
                println!("{}", generate_config_template());
                Ok(())
            } else {
                init_config(*force, path.clone())
            }
        }
        ConfigCommands::Path => {
            show_config_path();
            Ok(())
        }
    }
}

fn init_config(force: bool, custom_path: Option<PathBuf>) -> Result<(), MirageError> {
    let config_path = custom_path
        .or_else(|| config_paths().into_iter().next())
        .unwrap_or_else(|| PathBuf::from("settings.jsonc"));

    if config_path.exists() && !force {
        return Err(MirageError::ConfigError(format!(
            "Settings file already exists at: {}\nUse --force to overwrite.",
            config_path.display()
        )));
    }

    create_config_file(&config_path).map_err(|e| {
        MirageError::ConfigError(format!("Failed to create {}: {e}", config_path.display()))
    })?;

    println!("Settings file created at: {}", config_path.display());
    Ok(())
}

fn show_config_path() {
    println!("Settings file search paths (in priority order):\n");

    crate::config::init();
    let active = get_config_path();
    for (i, path) in config_paths().iter().enumerate() {
        let marker = if Some(path) == active {
            " (active)"
        } else if path.exists() {
            " (exists)"
        } else {
            ""
        };
        println!("  {}. {}{}", i + 1, path.display(), marker);
    }

    if active.is_none() {
        println!("\nNo settings file loaded. Run 'mirage config init' to create one.");
    }
}
