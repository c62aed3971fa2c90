//! `mirage simulate`: runs a restore pass against the simulated display subsystem.
//!
//! The persisted list is loaded into memory, so nothing the simulation does is
//! written back.

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use tabled::settings::object::Columns;
use tabled::settings::{Alignment, Modify, Style};
use tabled::{Table, Tabled};

use super::types::PixelArg;
use crate::cli::output;
use crate::config::FleetSettings;
use crate::error::MirageError;
use crate::modules::fleet::sim::{MirrorMode, SimulatedOs};
use crate::modules::fleet::store::{ConfigPersistence, FileConfigStore, MemoryConfigStore};
use crate::modules::fleet::topology::TopologySnapshot;
use crate::modules::fleet::{DisplayStatus, FleetActor, FleetManager};

/// Arguments of `mirage simulate`.
#[derive(Args, Debug, Clone, Default)]
pub struct SimulateArgs {
    /// Plug in a physical display of this resolution before restoring.
    /// Repeat for several displays.
    #[arg(long = "physical", short = 'p', value_name = "WxH")]
    pub physical: Vec<PixelArg>,

    /// Make new managed displays collapse into a mirror set.
    #[arg(long, conflicts_with = "stack")]
    pub mirror: bool,

    /// Make new managed displays stack at identical bounds.
    #[arg(long)]
    pub stack: bool,

    /// Output in JSON format instead of tables.
    #[arg(long, short = 'j')]
    pub json: bool,
}

/// Everything a simulation run produced.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationReport {
    statuses: Vec<DisplayStatus>,
    restore_failures: Vec<crate::modules::fleet::types::RestoreFailure>,
    topology: Option<TopologySnapshot>,
}

/// Runs the simulation.
///
/// # Errors
///
/// Returns an error if the list cannot be loaded or the runtime fails to start.
pub fn execute(args: &SimulateArgs, store_path: PathBuf, settings: FleetSettings) -> Result<(), MirageError> {
    let configs = FileConfigStore::new(store_path).load()?;

    let os = SimulatedOs::new(settings.identity());
    for PixelArg(size) in &args.physical {
        os.add_physical_display(size.width, size.height);
    }
    if args.mirror {
        os.set_mirror_new_displays(MirrorMode::Flagged);
    }
    os.set_stack_new_displays(args.stack);

    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
    let report = runtime.block_on(async {
        let manager =
            FleetManager::new(settings, os.platform(), Box::new(MemoryConfigStore::with_configs(configs)))?;
        let fleet = FleetActor::spawn(manager);

        let restore_failures = fleet.restore()?.await?;
        let report = SimulationReport {
            statuses: fleet.statuses().await?,
            restore_failures,
            topology: fleet.topology().await?,
        };
        fleet.shutdown().await?;
        Ok::<_, MirageError>(report)
    })?;

    if args.json {
        output::print_highlighted_json(&serde_json::to_value(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Serial")]
        serial: u32,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Display")]
        display: String,
        #[tabled(rename = "Generation")]
        generation: String,
    }

    #[derive(Tabled)]
    struct TopologyRow {
        #[tabled(rename = "ID")]
        id: u32,
        #[tabled(rename = "Serial")]
        serial: u32,
        #[tabled(rename = "Managed")]
        managed: String,
        #[tabled(rename = "Bounds")]
        bounds: String,
        #[tabled(rename = "Mirror")]
        mirror: String,
        #[tabled(rename = "Main")]
        main: String,
    }

    let rows: Vec<StatusRow> = report
        .statuses
        .iter()
        .map(|s| StatusRow {
            name: output::truncate(&s.config.name, 32),
            serial: s.config.serial_num,
            state: output::format_state(s.state),
            display: output::format_optional(s.runtime.map(|r| r.display_id)),
            generation: output::format_optional(s.runtime.map(|r| r.generation)),
        })
        .collect();

    if rows.is_empty() {
        println!("{}", "No displays configured.".dimmed());
    } else {
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(3..5)).with(Alignment::right()))
            .to_string();
        println!("{}", "Fleet".bold());
        println!("{table}");
    }

    for failure in &report.restore_failures {
        println!("{} {} (serial {}): {}", "Failed:".red(), failure.name, failure.serial, failure.message);
    }

    if let Some(topology) = &report.topology {
        let rows: Vec<TopologyRow> = topology
            .displays
            .iter()
            .map(|d| TopologyRow {
                id: d.id,
                serial: d.serial_number,
                managed: output::format_bool(d.is_managed),
                bounds: format!("{}x{} at {}, {}", d.bounds.width, d.bounds.height, d.bounds.x, d.bounds.y),
                mirror: output::format_bool(d.has_mirror_flags()),
                main: output::format_bool(topology.is_main(d.id)),
            })
            .collect();
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(2..3)).with(Alignment::center()))
            .with(Modify::new(Columns::new(4..6)).with(Alignment::center()))
            .to_string();
        println!("{}", "Topology".bold());
        println!("{table}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::fleet::types::{DEFAULT_MODE, DisplayConfig, PhysicalSize};

    #[test]
    fn test_simulation_restores_persisted_displays() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("displays.json");
        let mut config = DisplayConfig::new("Desk", 1, PhysicalSize::new(600, 340), vec![DEFAULT_MODE]);
        config.desired_enabled = true;
        FileConfigStore::new(path.clone()).save(&[config]).unwrap();

        let args = SimulateArgs { json: true, ..SimulateArgs::default() };
        execute(&args, path.clone(), FleetSettings::default()).unwrap();

        // The simulation never writes back.
        let reloaded = FileConfigStore::new(path).load().unwrap();
        assert_eq!(reloaded.len(), 1);
    }
}
