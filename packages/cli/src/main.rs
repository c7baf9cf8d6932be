#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the backyard ecology toolkit.
//!
//! Downloads bird detection data from `BirdWeather` and Haikubox into CSV
//! files and builds the static dashboard page. Run with a subcommand for
//! scripted use, or without one for an interactive menu.
//!
//! Uses `indicatif-log-bridge` (via
//! [`backyard_ecology_cli_utils::init_logger`]) so that log lines and
//! progress bars never fight for the terminal.

mod commands;
mod interactive;

use std::path::PathBuf;

use backyard_ecology_fetch_models::DateWindow;
use backyard_ecology_source::registry;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::commands::{DetectionsOptions, HaikuboxOptions, StationsOptions};

/// Earliest date `BirdWeather` downloads start from by default.
const BIRDWEATHER_START: NaiveDate = match NaiveDate::from_ymd_opt(2018, 1, 1) {
    Some(date) => date,
    None => panic!("invalid BirdWeather start date"),
};

/// Earliest date Haikubox downloads start from by default.
const HAIKUBOX_START: NaiveDate = match NaiveDate::from_ymd_opt(2023, 1, 1) {
    Some(date) => date,
    None => panic!("invalid Haikubox start date"),
};

#[derive(Parser)]
#[command(name = "backyard_ecology", about = "Backyard ecology data toolkit")]
struct Cli {
    /// Fetch settings (retry, pacing, page and chunk sizes, tiling) as TOML
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every `BirdWeather` detection inside each county box
    Detections {
        /// Comma-separated region ids (default: `duval_fl,st_johns_fl`)
        #[arg(long)]
        regions: Option<String>,
        /// Start date, YYYY-MM-DD (default: 2018-01-01)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End date, YYYY-MM-DD (default: today)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Detections per page
        #[arg(long)]
        page_size: Option<u32>,
        /// Directory for the CSV files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Discover `BirdWeather` stations in a region with tiled queries
    Stations {
        /// Region id (default: `florida`)
        #[arg(long)]
        region: Option<String>,
        /// Start date, YYYY-MM-DD (default: 2018-01-01)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End date, YYYY-MM-DD (default: today)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Directory for the CSV files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Also fetch per-day species counts for the discovered stations
        #[arg(long)]
        daily_counts: bool,
    },
    /// Poll Haikubox devices for per-day species counts
    Haikubox {
        /// Comma-separated serial codes (default: the configured devices)
        #[arg(long)]
        serials: Option<String>,
        /// Start date, YYYY-MM-DD (default: 2023-01-01)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End date, YYYY-MM-DD (default: today)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Directory for the CSV file
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,
    },
    /// Build the HTML dashboard from saved plot metadata
    Dashboard {
        /// Directory holding the plot metadata JSON files
        #[arg(long, default_value = "docs/dashboard_plots")]
        plots_dir: PathBuf,
        /// Output HTML file
        #[arg(long, default_value = "docs/index.html")]
        out: PathBuf,
    },
    /// List configured regions and devices
    Regions,
}

/// Today's date in local time.
fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Splits a comma-separated list, dropping blanks.
fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    default_from: NaiveDate,
) -> Result<DateWindow, Box<dyn std::error::Error>> {
    Ok(DateWindow::new(
        from.unwrap_or(default_from),
        to.unwrap_or_else(today),
    )?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = backyard_ecology_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    let Some(command) = cli.command else {
        return interactive::run(&config, &multi).await;
    };

    match command {
        Commands::Detections {
            regions,
            from,
            to,
            page_size,
            out_dir,
        } => {
            let regions = regions.as_deref().map_or_else(
                || {
                    registry::DEFAULT_DETECTION_REGIONS
                        .iter()
                        .map(ToString::to_string)
                        .collect()
                },
                split_list,
            );
            let options = DetectionsOptions {
                regions,
                window: window(from, to, BIRDWEATHER_START)?,
                page_size,
                out_dir,
            };
            commands::detections(&config, &options, &multi).await?;
        }
        Commands::Stations {
            region,
            from,
            to,
            out_dir,
            daily_counts,
        } => {
            let options = StationsOptions {
                region: region.unwrap_or_else(|| registry::DEFAULT_STATION_REGION.to_string()),
                window: window(from, to, BIRDWEATHER_START)?,
                out_dir,
                daily_counts,
            };
            commands::stations(&config, &options, &multi).await?;
        }
        Commands::Haikubox {
            serials,
            from,
            to,
            out_dir,
        } => {
            let options = HaikuboxOptions {
                serials: serials.as_deref().map(split_list).unwrap_or_default(),
                window: window(from, to, HAIKUBOX_START)?,
                out_dir,
            };
            commands::haikubox(&config, &options, &multi).await?;
        }
        Commands::Dashboard { plots_dir, out } => commands::dashboard(&plots_dir, &out)?,
        Commands::Regions => commands::list_regions(),
    }

    Ok(())
}
