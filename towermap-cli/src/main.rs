use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::CacheOptions;

/// Cached cell tower search over OpenCelliD
#[derive(Parser)]
#[command(name = "towermap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database holding cached towers and quota counters
    #[arg(long, env = "TOWERMAP_DB", default_value = "towermap.db", global = true)]
    db: PathBuf,

    /// OpenCelliD API key (cache-only when absent)
    #[arg(long, env = "OPENCELLID_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Provider calls allowed per UTC day
    #[arg(long, env = "TOWERMAP_DAILY_LIMIT", global = true)]
    daily_limit: Option<u32>,

    /// Log search decisions and provider calls to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search towers around a coordinate
    Search {
        /// Latitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Search radius in km
        #[arg(short, long, default_value = "10")]
        radius: f64,

        /// Output result as JSON
        #[arg(short, long, conflicts_with = "geojson")]
        json: bool,

        /// Output towers as a GeoJSON FeatureCollection
        #[arg(short, long)]
        geojson: bool,
    },

    /// Search around every coordinate in a CSV file
    Batch {
        /// Input CSV file
        input: PathBuf,

        /// Output CSV file (defaults to <input>_towers.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column name for latitude
        #[arg(long, default_value = "lat")]
        lat_col: String,

        /// Column name for longitude
        #[arg(long, default_value = "lon")]
        lon_col: String,

        /// Search radius in km
        #[arg(short, long, default_value = "10")]
        radius: f64,
    },

    /// Show a cached tower by id
    Tower {
        /// Tower id
        id: u64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show quota usage and cached tower counts
    Status {
        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show how many provider calls a search would need
    Plan {
        /// Latitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Search radius in km
        #[arg(short, long, default_value = "10")]
        radius: f64,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "towermap=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = CacheOptions {
        db: cli.db,
        api_key: cli.api_key,
        daily_limit: cli.daily_limit,
    };

    match cli.command {
        Commands::Search {
            lat,
            lon,
            radius,
            json,
            geojson,
        } => commands::search::run(&options, lat, lon, radius, json, geojson),
        Commands::Batch {
            input,
            output,
            lat_col,
            lon_col,
            radius,
        } => commands::batch::run(&options, input, output, lat_col, lon_col, radius),
        Commands::Tower { id, json } => commands::tower::run(&options, id, json),
        Commands::Status { json } => commands::status::run(&options, json),
        Commands::Plan { lat, lon, radius } => commands::plan::run(&options, lat, lon, radius),
    }
}
