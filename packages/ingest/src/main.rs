#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the traffic event ingestion tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use traffic_sweep_cli_utils::IndicatifProgress;
use traffic_sweep_discover_models::DiscoveryMode;
use traffic_sweep_ingest::config::IngestConfig;
use traffic_sweep_ingest::shutdown::Shutdown;
use traffic_sweep_ingest::{build_discovery, event_stats, grid_cells, run_discovery};

#[derive(Parser)]
#[command(name = "traffic_sweep_ingest", about = "Traffic event discovery tool")]
struct Cli {
    /// TOML file merged over the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery passes until interrupted (the default)
    Run {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
        /// Sweep an in-memory map instead of a live browser session.
        /// Writes to `simulate.output_path`, never to the real event list.
        #[arg(long)]
        simulate: bool,
    },
    /// Print the cells one grid cycle polls
    Cells {
        /// Cell size in degrees (overrides `grid.grid_size`)
        #[arg(long)]
        grid_size: Option<f64>,
    },
    /// Summarise a durable event list
    Stats {
        /// Event list to read (defaults to the configured output path)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = traffic_sweep_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = IngestConfig::load(cli.config.as_deref())?;

    let command = cli.command.unwrap_or(Commands::Run {
        once: false,
        simulate: false,
    });

    match command {
        Commands::Run { once, simulate } => {
            let config = if simulate {
                log::info!("Simulated run, writing to {}", config.simulate.output_path.display());
                config.simulated()
            } else {
                config
            };

            let shutdown = Shutdown::new();
            let _signals = shutdown.listen_for_ctrl_c();

            let progress = match config.mode {
                DiscoveryMode::Sweep => IndicatifProgress::events_spinner(&multi, "Sweeping"),
                DiscoveryMode::Grid => IndicatifProgress::steps_bar(&multi, "Polling cells", 0),
            };

            let mut discovery =
                build_discovery(&config, simulate, shutdown.flag(), progress).await?;
            let summary = run_discovery(&config, discovery.as_mut(), &shutdown, once).await?;

            println!(
                "{} events ({} unique fingerprints) saved to {}",
                summary.events,
                summary.unique_fingerprints,
                summary.output_path.display()
            );
        }
        Commands::Cells { grid_size } => {
            let size = grid_size.unwrap_or(config.grid.grid_size);
            let cells = grid_cells(&config.bounds, size)?;
            println!(
                "{:>5} {:>11} {:>11} {:>11} {:>11}",
                "#", "BOTTOM", "TOP", "LEFT", "RIGHT"
            );
            println!("{}", "-".repeat(53));
            for (i, cell) in cells.iter().enumerate() {
                println!(
                    "{:>5} {:>11.5} {:>11.5} {:>11.5} {:>11.5}",
                    i + 1,
                    cell.lat_min,
                    cell.lat_max,
                    cell.lon_min,
                    cell.lon_max
                );
            }
            println!("\n{} cells of {size}° over {}", cells.len(), config.bounds);
        }
        Commands::Stats { path } => {
            let path = path.unwrap_or_else(|| config.output_path());
            let stats = event_stats(&path)?;
            println!("{}", path.display());
            print!("{stats}");
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
