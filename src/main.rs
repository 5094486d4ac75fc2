pub mod models {
    pub mod citylearn;
    pub mod xstock;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod error;
pub mod frame;
pub mod idf;
pub mod schema;
pub mod utils;
pub mod services {
    pub mod neighborhood;
    pub mod normalize;
    pub mod schedule;
    pub mod simulate;
    pub mod sync;
    pub mod weather;
}

use crate::client::{DatasetFetcher, HttpTransport};
use crate::config::{load_env_file, Config};
use crate::db::store::Store;
use crate::error::{Error, Result};
use crate::models::xstock::{DatasetKey, MetadataFilters};
use crate::services::simulate::{EnergyPlusEngine, OpenStudioTranslator, Orchestrator};
use crate::services::{neighborhood, sync};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "xstock-citylearn", version, about = "Building-stock datasets to CityLearn neighborhoods")]
struct Cli {
    /// Env file loaded before configuration is read; defaults to ./.env when present.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    /// Store file; overrides XSTOCK_DATABASE.
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store management.
    Database {
        #[command(subcommand)]
        action: DatabaseCommand,
    },
    /// Dataset synchronization.
    Dataset {
        #[command(subcommand)]
        action: DatasetCommand,
    },
    /// Simulate one building and store its CityLearn documents.
    Simulate(SimulateArgs),
    /// Write the CityLearn input bundle for a set of simulated buildings.
    Neighborhood(NeighborhoodArgs),
}

#[derive(Debug, Subcommand)]
enum DatabaseCommand {
    /// Create the store from the versioned schema.
    Build {
        /// Delete an existing store first.
        #[arg(long)]
        overwrite: bool,
        /// Apply pending schema changes to an existing store.
        #[arg(long)]
        apply_changes: bool,
    },
}

#[derive(Debug, Args)]
struct DatasetArgs {
    dataset_type: String,
    weather_source: String,
    year_of_publication: i64,
    release: i64,
}

impl DatasetArgs {
    fn key(&self) -> DatasetKey {
        DatasetKey::new(&self.dataset_type, &self.weather_source, self.year_of_publication, self.release)
    }
}

#[derive(Debug, Subcommand)]
enum DatasetCommand {
    /// Mirror a dataset release into the store.
    Insert {
        #[command(flatten)]
        dataset: DatasetArgs,
        /// JSON file mapping metadata columns to allowed values.
        #[arg(long)]
        filters: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct SimulateArgs {
    #[command(flatten)]
    dataset: DatasetArgs,
    bldg_id: i64,
    upgrade: i64,
    /// Seed for the attribute perturbation; defaults to a hash of the simulation id.
    #[arg(long, conflicts_with = "unseeded")]
    seed: Option<u64>,
    /// Keep the attribute template unperturbed.
    #[arg(long)]
    unseeded: bool,
}

#[derive(Debug, Args)]
struct NeighborhoodArgs {
    /// CSV with dataset_type,weather_source,year_of_publication,release,bldg_id,upgrade columns.
    buildings: PathBuf,
    #[arg(long)]
    output_directory: PathBuf,
}

fn read_filters(path: &PathBuf) -> Result<MetadataFilters> {
    let content = std::fs::read_to_string(path)?;
    let de = &mut serde_json::Deserializer::from_str(&content);
    serde_path_to_error::deserialize(de)
        .map_err(|e| Error::InvalidFilter(format!("{} at {}: {}", path.display(), e.path(), e.inner())))
}

fn run(cli: Cli) -> Result<()> {
    let mut cfg = Config::from_env()?;
    if let Some(database) = cli.database {
        cfg.database = database;
    }
    info!(
        "Config loaded (database={}, dataset_root={}, max_request_retries={}, request_timeout={}s)",
        cfg.database.display(),
        cfg.dataset_root_url,
        cfg.max_request_retries.get(),
        cfg.request_timeout.as_secs()
    );
    let store = Store::new(&cfg.database);

    match cli.command {
        Command::Database {
            action: DatabaseCommand::Build { overwrite, apply_changes },
        } => {
            store.bootstrap(&cfg.schema_source(), overwrite, apply_changes)?;
            info!("Store ready at {}", store.path().display());
        }
        Command::Dataset {
            action: DatasetCommand::Insert { dataset, filters },
        } => {
            let filters = filters.as_ref().map(read_filters).transpose()?;
            let fetcher = DatasetFetcher::new(
                Box::new(HttpTransport::new(cfg.request_timeout)),
                cfg.endpoints(),
                cfg.retry_policy(),
            );
            let report = sync::synchronize(&store, &fetcher, &dataset.key(), filters.as_ref(), &cfg.weather_provider)?;
            if report.no_matching_buildings {
                warn!("Dataset {} stored without buildings: no metadata row matched the filters", dataset.key());
            } else {
                info!(
                    "Synchronized {} building(s) of dataset {} ({} weather station(s) resolved)",
                    report.buildings,
                    report.dataset_id,
                    report.weather.resolved.len()
                );
            }
        }
        Command::Simulate(args) => {
            let key = args.dataset.key();
            let seed = match (args.seed, args.unseeded) {
                (_, true) => None,
                (Some(seed), false) => Some(seed),
                (None, false) => Some(utils::stable_seed(&key.simulation_id(args.bldg_id, args.upgrade))),
            };
            let orchestrator = Orchestrator::new(
                &store,
                Box::new(OpenStudioTranslator {
                    executable: cfg.openstudio_exe.clone(),
                }),
                Box::new(EnergyPlusEngine {
                    executable: cfg.energyplus_exe.clone(),
                    idd: cfg.energyplus_idd.clone(),
                }),
                &cfg.output_root,
            );
            let report = orchestrator.simulate(&key, args.bldg_id, args.upgrade, seed)?;
            info!(
                "Simulation {} complete: {} result row(s) in {}",
                report.simulation_id,
                report.result_rows,
                report.working_directory.display()
            );
        }
        Command::Neighborhood(args) => {
            let members = neighborhood::read_members(&args.buildings)?;
            let report = neighborhood::assemble(&store, &members, &args.output_directory)?;
            info!(
                "Neighborhood of {} building(s) written to {}",
                report.buildings.len(),
                report.output_directory.display()
            );
        }
    }
    Ok(())
}

/// Explicit env file, else `./.env` when present. Returns the loaded path.
fn configure_env(explicit: Option<&PathBuf>) -> Result<Option<PathBuf>> {
    let path = match explicit {
        Some(path) if !path.is_file() => {
            return Err(Error::Config(format!("env file not found: {}", path.display())));
        }
        Some(path) => path.clone(),
        None => {
            let default_path = std::env::current_dir()?.join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            default_path
        }
    };
    load_env_file(&path)?;
    Ok(Some(path))
}

fn main() {
    let cli = Cli::parse();
    let loaded_env = match configure_env(cli.env_file.as_ref()) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(path) = loaded_env {
        info!("Environment loaded from {}", path.display());
    }
    info!(
        "xstock-citylearn {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
