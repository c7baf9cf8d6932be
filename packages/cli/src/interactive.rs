//! Menu-driven front end.
//!
//! Walks the user through the same options the subcommands take, using
//! `dialoguer` prompts with the usual defaults pre-filled.

use std::path::{Path, PathBuf};

use backyard_ecology_cli_utils::MultiProgress;
use backyard_ecology_fetch::config::FetchConfig;
use backyard_ecology_fetch_models::DateWindow;
use backyard_ecology_source::registry::{self, RegionKind};
use chrono::NaiveDate;
use dialoguer::{Confirm, Input, MultiSelect, Select};

use crate::commands::{self, DetectionsOptions, HaikuboxOptions, StationsOptions};
use crate::{BIRDWEATHER_START, HAIKUBOX_START, today};

/// Top-level tool selection.
enum Tool {
    Detections,
    Stations,
    Haikubox,
    Dashboard,
    Regions,
}

impl Tool {
    const ALL: &[Self] = &[
        Self::Detections,
        Self::Stations,
        Self::Haikubox,
        Self::Dashboard,
        Self::Regions,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Detections => "Download county detections (BirdWeather)",
            Self::Stations => "Discover stations and daily counts (BirdWeather)",
            Self::Haikubox => "Download Haikubox daily counts",
            Self::Dashboard => "Build dashboard",
            Self::Regions => "List regions",
        }
    }
}

/// Prompts for a tool and its options, then runs it.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected tool fails.
pub async fn run(config: &FetchConfig, multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    println!("Backyard Ecology Toolkit");
    println!();

    let labels: Vec<&str> = Tool::ALL.iter().map(Tool::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match Tool::ALL[idx] {
        Tool::Detections => {
            let counties: Vec<_> = registry::all_regions()
                .into_iter()
                .filter(|r| r.kind == RegionKind::County)
                .collect();
            let labels: Vec<String> = counties
                .iter()
                .map(|r| format!("{} ({})", r.id, r.name))
                .collect();
            let defaults = vec![true; counties.len()];
            let selected = MultiSelect::new()
                .with_prompt("Regions (space=toggle, enter=confirm)")
                .items(&labels)
                .defaults(&defaults)
                .interact()?;
            if selected.is_empty() {
                println!("No regions selected.");
                return Ok(());
            }

            let window = prompt_window(BIRDWEATHER_START)?;
            let page_size: u32 = Input::new()
                .with_prompt("Detections per page")
                .default(config.pagination.page_size)
                .interact_text()?;
            let out_dir = prompt_dir("Output directory", Path::new("."))?;

            let options = DetectionsOptions {
                regions: selected.iter().map(|&i| counties[i].id.clone()).collect(),
                window,
                page_size: Some(page_size),
                out_dir,
            };
            commands::detections(config, &options, multi).await?;
        }
        Tool::Stations => {
            let regions = registry::all_regions();
            let labels: Vec<String> = regions
                .iter()
                .map(|r| format!("{} ({})", r.id, r.name))
                .collect();
            let default = regions
                .iter()
                .position(|r| r.id == registry::DEFAULT_STATION_REGION)
                .unwrap_or(0);
            let idx = Select::new()
                .with_prompt("Region to search")
                .items(&labels)
                .default(default)
                .interact()?;

            let window = prompt_window(BIRDWEATHER_START)?;
            let daily_counts = Confirm::new()
                .with_prompt("Also fetch daily counts for the discovered stations?")
                .default(true)
                .interact()?;
            let out_dir = prompt_dir("Output directory", Path::new("."))?;

            let options = StationsOptions {
                region: regions[idx].id.clone(),
                window,
                out_dir,
                daily_counts,
            };
            commands::stations(config, &options, multi).await?;
        }
        Tool::Haikubox => {
            let serials: String = Input::new()
                .with_prompt("Serial codes (comma-separated)")
                .default(registry::haikubox_serials().join(","))
                .interact_text()?;
            let window = prompt_window(HAIKUBOX_START)?;
            let out_dir = prompt_dir("Output directory", Path::new("data"))?;

            let options = HaikuboxOptions {
                serials: crate::split_list(&serials),
                window,
                out_dir,
            };
            commands::haikubox(config, &options, multi).await?;
        }
        Tool::Dashboard => {
            let plots_dir = prompt_dir("Plots directory", Path::new("docs/dashboard_plots"))?;
            let out = prompt_dir("Output file", Path::new("docs/index.html"))?;
            commands::dashboard(&plots_dir, &out)?;
        }
        Tool::Regions => commands::list_regions(),
    }

    Ok(())
}

fn prompt_window(default_from: NaiveDate) -> Result<DateWindow, Box<dyn std::error::Error>> {
    let from: NaiveDate = Input::new()
        .with_prompt("From (YYYY-MM-DD)")
        .default(default_from)
        .interact_text()?;
    let to: NaiveDate = Input::new()
        .with_prompt("To (YYYY-MM-DD)")
        .default(today())
        .interact_text()?;
    Ok(DateWindow::new(from, to)?)
}

fn prompt_dir(prompt: &str, default: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let text: String = Input::new()
        .with_prompt(prompt)
        .default(default.display().to_string())
        .interact_text()?;
    Ok(PathBuf::from(text))
}
