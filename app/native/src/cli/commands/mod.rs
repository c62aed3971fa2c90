//! CLI command definitions using Clap.
//!
//! - `displays` - editing the persisted display list
//! - `simulate` - restore pass against the simulated display subsystem
//! - `config_cmd` - settings file management
//! - `types` - argument types shared across commands

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Generator, Shell, generate};
use colored::Colorize;

use crate::error::MirageError;
use crate::{config, schema};

pub mod config_cmd;
pub mod displays;
pub mod simulate;
pub mod types;

pub use config_cmd::ConfigCommands;
use displays::{Catalog, NewDisplay};
pub use simulate::SimulateArgs;
use types::{CliDirection, ModeArg, PixelArg, SizeArg};

/// Application version from Cargo.toml.
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Mirage CLI - manage a fleet of virtual displays.
#[derive(Parser, Debug)]
#[command(name = "mirage")]
#[command(author, version = APP_VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a custom settings file.
    ///
    /// Overrides the default settings search paths.
    /// Supports JSONC format (JSON with comments).
    #[arg(long, short, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the display list.
    ///
    /// Overrides `storePath` from the settings file.
    #[arg(long, global = true, value_name = "PATH", env = "MIRAGE_STORE")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
#[command(next_display_order = None)]
pub enum Commands {
    /// List configured displays.
    List {
        /// Output in JSON format instead of a table.
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Add a display to the list.
    #[command(after_long_help = r#"Examples:
  mirage add Desk                                  # 1920x1080@60, next free serial
  mirage add Studio --serial 7 --mode 2560x1440@60:hidpi
  mirage add Wide --mode 3440x1440@100 --mode 2560x1080 --size 800x335"#)]
    Add {
        /// Display name.
        name: String,

        /// Serial number. Defaults to the smallest unused one.
        #[arg(long)]
        serial: Option<u32>,

        /// Physical size in millimetres.
        #[arg(long, default_value = "600x340", value_name = "WxH")]
        size: SizeArg,

        /// Display mode as WIDTHxHEIGHT[@RATE][:hidpi]. Repeat for several modes.
        #[arg(long = "mode", short, value_name = "MODE")]
        modes: Vec<ModeArg>,

        /// Reject modes whose backing store exceeds this many pixels.
        #[arg(long, value_name = "WxH")]
        max_pixels: Option<PixelArg>,

        /// Add the display without enabling it on the next restore.
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a display from the list.
    Remove {
        /// Display id, serial number or name.
        display: String,
    },

    /// Move a display up or down in the list.
    Move {
        /// Display id, serial number or name.
        display: String,

        #[arg(value_enum)]
        direction: CliDirection,
    },

    /// Replace the modes of a display.
    Modes {
        /// Display id, serial number or name.
        display: String,

        /// Modes as WIDTHxHEIGHT[@RATE][:hidpi].
        #[arg(required = true, value_name = "MODE")]
        modes: Vec<ModeArg>,
    },

    /// Rename a display.
    Rename {
        /// Display id, serial number or name.
        display: String,

        /// New name.
        name: String,
    },

    /// Print the smallest serial number not in use.
    #[command(name = "next-serial")]
    NextSerial,

    /// Restore the display list against a simulated display subsystem.
    Simulate(SimulateArgs),

    /// Settings file management commands.
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Output the settings JSON Schema.
    ///
    /// Can be redirected to a file for use with editors that support JSON
    /// Schema validation.
    Schema,

    /// Generate shell completions.
    ///
    /// Usage:
    ///   eval "$(mirage completions --shell zsh)"
    ///   mirage completions --shell fish > ~/.config/fish/completions/mirage.fish
    Completions {
        /// The shell to generate completions for.
        #[arg(long, short, value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Executes the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command execution fails.
    pub fn execute(&self) -> Result<(), MirageError> {
        if let Some(path) = &self.config {
            if !path.exists() {
                return Err(MirageError::ConfigError(format!(
                    "Settings file not found: {}",
                    path.display()
                )));
            }
            config::set_custom_config_path(path.clone());
        }

        match &self.command {
            Commands::Schema => {
                println!("{}", schema::generate_schema_json());
                return Ok(());
            }
            Commands::Completions { shell } => {
                Self::print_completions(*shell);
                return Ok(());
            }
            Commands::Config(cmd) => return config_cmd::execute(cmd),
            _ => {}
        }

        let settings = config::init();
        let store_path = config::store_path(settings, self.store.clone());
        tracing::debug!(path = %store_path.display(), "using display list");

        match &self.command {
            Commands::List { json } => displays::print_list(&Catalog::open(store_path)?, *json),
            Commands::Add { name, serial, size, modes, max_pixels, disabled } => {
                let mut catalog = Catalog::open(store_path)?;
                let added = catalog.add(NewDisplay {
                    name: name.clone(),
                    serial: *serial,
                    physical_size: size.0,
                    modes: modes.iter().map(|m| m.0).collect(),
                    max_pixels: max_pixels.map(|p| p.0),
                    enabled: !disabled,
                })?;
                println!("Added {} with serial {}.", added.name.bold(), added.serial_num);
                Ok(())
            }
            Commands::Remove { display } => {
                let removed = Catalog::open(store_path)?.remove(display)?;
                println!("Removed {}.", removed.name.bold());
                Ok(())
            }
            Commands::Move { display, direction } => {
                if !Catalog::open(store_path)?.move_display(display, (*direction).into())? {
                    println!("{}", "Already at the edge of the list.".dimmed());
                }
                Ok(())
            }
            Commands::Modes { display, modes } => {
                Catalog::open(store_path)?.set_modes(display, modes.iter().map(|m| m.0).collect())
            }
            Commands::Rename { display, name } => Catalog::open(store_path)?.rename(display, name),
            Commands::NextSerial => {
                println!("{}", Catalog::open(store_path)?.next_serial());
                Ok(())
            }
            Commands::Simulate(args) => simulate::execute(args, store_path, settings.fleet.clone()),
            Commands::Schema | Commands::Completions { .. } | Commands::Config(_) => Ok(()),
        }
    }

    /// Prints shell completions to stdout.
    fn print_completions<G: Generator>(generator: G) {
        let mut cmd = Self::command();
        generate(generator, &mut cmd, "mirage", &mut io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() { Cli::command().debug_assert(); }

    #[test]
    fn test_cli_parses_add_with_modes() {
        let cli = Cli::try_parse_from([
            "mirage",
            "add",
            "Desk",
            "--serial",
            "3",
            "--mode",
            "2560x1440@60:hidpi",
            "--mode",
            "1920x1080",
        ])
        .unwrap();

        let Commands::Add { name, serial, modes, disabled, .. } = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(name, "Desk");
        assert_eq!(serial, Some(3));
        assert_eq!(modes.len(), 2);
        assert!(modes[0].0.hi_dpi);
        assert!(!disabled);
    }

    #[test]
    fn test_cli_parses_move_direction() {
        let cli = Cli::try_parse_from(["mirage", "move", "Desk", "up"]).unwrap();
        assert!(matches!(cli.command, Commands::Move { direction: CliDirection::Up, .. }));
    }

    #[test]
    fn test_cli_modes_requires_a_mode() {
        assert!(Cli::try_parse_from(["mirage", "modes", "Desk"]).is_err());
    }

    #[test]
    fn test_cli_global_store_flag() {
        let cli = Cli::try_parse_from(["mirage", "list", "--store", "/tmp/d.json"]).unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/d.json")));
    }

    #[test]
    fn test_cli_simulate_flags() {
        let cli = Cli::try_parse_from(["mirage", "simulate", "-p", "2560x1440", "--mirror"]).unwrap();
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate command");
        };
        assert_eq!(args.physical.len(), 1);
        assert!(args.mirror);
        assert!(Cli::try_parse_from(["mirage", "simulate", "--mirror", "--stack"]).is_err());
    }
}
