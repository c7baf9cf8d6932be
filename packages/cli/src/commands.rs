//! The work behind each subcommand, shared by the flag-driven and
//! interactive front ends.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use backyard_ecology_cli_utils::{IndicatifProgress, MultiProgress, progress_for};
use backyard_ecology_export::write_csv;
use backyard_ecology_fetch::config::FetchConfig;
use backyard_ecology_fetch::transport::{HttpTransport, Transport};
use backyard_ecology_fetch_models::{DateWindow, FlatRecord};
use backyard_ecology_source::birdweather::BirdWeather;
use backyard_ecology_source::flatten::{
    self, DAILY_COUNT_FIELDS, DETECTION_FIELDS, HAIKUBOX_FIELDS, STATION_FIELDS,
};
use backyard_ecology_source::haikubox::Haikubox;
use backyard_ecology_source::registry;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Options for county detection downloads.
pub struct DetectionsOptions {
    pub regions: Vec<String>,
    pub window: DateWindow,
    pub page_size: Option<u32>,
    pub out_dir: PathBuf,
}

/// Options for station discovery.
pub struct StationsOptions {
    pub region: String,
    pub window: DateWindow,
    pub out_dir: PathBuf,
    pub daily_counts: bool,
}

/// Options for Haikubox polling.
pub struct HaikuboxOptions {
    pub serials: Vec<String>,
    pub window: DateWindow,
    pub out_dir: PathBuf,
}

/// Loads the fetch config from `path`, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> CliResult<FetchConfig> {
    Ok(match path {
        Some(path) => FetchConfig::load(path)?,
        None => FetchConfig::default(),
    })
}

fn http_transport(config: &FetchConfig) -> CliResult<HttpTransport> {
    Ok(HttpTransport::new(config.retry.request_timeout())?)
}

/// Downloads detections for each region into `birdweather_<region>.csv`.
///
/// Each region is written as soon as it completes; a failing region is
/// logged and the rest still run.
pub async fn detections(
    config: &FetchConfig,
    options: &DetectionsOptions,
    multi: &MultiProgress,
) -> CliResult {
    let mut client = BirdWeather::new(http_transport(config)?, config.clone());
    if let Some(page_size) = options.page_size {
        client.set_page_size(page_size);
    }

    let steps = IndicatifProgress::steps_bar(multi, "Regions", options.regions.len() as u64);
    let mut failed = Vec::new();

    for id in &options.regions {
        steps.set_message(format!("Regions ({id})"));
        if let Err(e) = detections_for_region(&mut client, id, options, multi).await {
            log::error!("{id}: {e}");
            failed.push(id.as_str());
        }
        steps.inc(1);
    }
    steps.finish_and_clear();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "{} of {} regions failed: {}",
            failed.len(),
            options.regions.len(),
            failed.join(", ")
        )
        .into())
    }
}

async fn detections_for_region<T: Transport>(
    client: &mut BirdWeather<T>,
    id: &str,
    options: &DetectionsOptions,
    multi: &MultiProgress,
) -> CliResult {
    let region = registry::region(id)?;
    let progress = progress_for(multi, &format!("Detections {}", region.id), 5_000);

    let nodes = client
        .detections(&region.id, &region.bbox, &options.window, &progress)
        .await?;
    progress.finish(format!("{}: {} detections", region.id, nodes.len()));

    let rows: Vec<FlatRecord> = nodes.iter().map(flatten::detection).collect();
    let path = options.out_dir.join(format!("birdweather_{}.csv", region.id));
    write_csv(&path, &rows, DETECTION_FIELDS)?;
    Ok(())
}

/// Discovers stations in a region and optionally fetches their daily
/// counts.
pub async fn stations(
    config: &FetchConfig,
    options: &StationsOptions,
    multi: &MultiProgress,
) -> CliResult {
    let region = registry::region(&options.region)?;
    let mut client = BirdWeather::new(http_transport(config)?, config.clone());

    let progress = progress_for(multi, &format!("Stations {}", region.id), 1);
    let stations = client
        .stations(&region.id, &region.bbox, &options.window, &progress)
        .await?;
    progress.finish(format!("{}: {} stations", region.id, stations.len()));

    let rows: Vec<FlatRecord> = stations.records().iter().map(flatten::station).collect();
    let path = options
        .out_dir
        .join(format!("birdweather_stations_{}.csv", region.id));
    write_csv(&path, &rows, STATION_FIELDS)?;

    if !options.daily_counts {
        return Ok(());
    }

    let progress = progress_for(multi, "Daily counts", 1);
    let counts = client
        .daily_counts(stations.records(), &options.window, &progress)
        .await;
    progress.finish_and_clear();

    let Some(window) = counts.window else {
        log::warn!("No daily counts fetched for {}", region.id);
        return Ok(());
    };

    let rows: Vec<FlatRecord> = counts
        .report
        .records
        .iter()
        .flat_map(flatten::daily_count)
        .collect();
    let path = options
        .out_dir
        .join(format!("birdweather_daily_counts_{}.csv", region.id));
    write_csv(&path, &rows, DAILY_COUNT_FIELDS)?;

    log::info!(
        "Daily counts {window}: {} rows from {}/{} chunks",
        rows.len(),
        counts.report.chunks - counts.report.failures.len(),
        counts.report.chunks
    );
    for failure in &counts.report.failures {
        log::warn!(
            "Chunk {} ({} stations, first {}) failed: {}",
            failure.index + 1,
            failure.ids.len(),
            failure.ids.first().map_or("-", String::as_str),
            failure.error
        );
    }
    Ok(())
}

/// Polls every Haikubox device day by day into
/// `haikubox_bird_detections.csv`.
pub async fn haikubox(
    config: &FetchConfig,
    options: &HaikuboxOptions,
    multi: &MultiProgress,
) -> CliResult {
    let serials = if options.serials.is_empty() {
        registry::haikubox_serials()
    } else {
        options.serials.clone()
    };
    if serials.is_empty() {
        return Err("No Haikubox serial codes configured".into());
    }

    let mut client = Haikubox::new(http_transport(config)?, &config.retry)
        .with_pacing(config.polling.pacing());

    for serial in &serials {
        match client.device_info(serial).await {
            Ok(Some(info)) => log::info!(
                "Device {serial}: {}",
                info.get("name").and_then(|v| v.as_str()).unwrap_or("(unnamed)")
            ),
            Ok(None) => log::warn!("Device {serial} not found"),
            Err(e) => log::warn!("Device {serial}: info unavailable: {e}"),
        }
    }

    let progress = progress_for(multi, "Haikubox daily counts", 100);
    let report = client
        .daily_counts(&serials, &options.window, &progress)
        .await;
    progress.finish_and_clear();

    if report.is_total_failure() {
        return Err(format!(
            "All {} device-days failed for {}; last error: {}",
            report.failures.len(),
            options.window,
            report
                .failures
                .last()
                .map_or_else(String::new, |f| f.error.to_string())
        )
        .into());
    }
    if !report.failures.is_empty() {
        log::warn!("{} device-days could not be fetched", report.failures.len());
    }
    if report.rows.is_empty() {
        log::warn!("No daily data returned for {}", options.window);
        return Ok(());
    }

    let path = options.out_dir.join("haikubox_bird_detections.csv");
    write_csv(&path, &report.rows, HAIKUBOX_FIELDS)?;
    log_haikubox_summary(&report.rows);
    Ok(())
}

fn log_haikubox_summary(rows: &[FlatRecord]) {
    let distinct = |key: &str| {
        rows.iter()
            .filter_map(|r| r.get(key).and_then(|v| v.as_str()))
            .collect::<BTreeSet<_>>()
            .len()
    };
    let detections: u64 = rows
        .iter()
        .filter_map(|r| r.get("count").and_then(|v| v.as_u64()))
        .sum();
    log::info!(
        "Summary: {} days, {} species, {detections} detections",
        distinct("date"),
        distinct("species_name")
    );
}

/// Renders the HTML dashboard.
pub fn dashboard(plots_dir: &Path, out: &Path) -> CliResult {
    let count = backyard_ecology_dashboard::write_dashboard(plots_dir, out)?;
    println!("Dashboard written to {} ({count} plots)", out.display());
    Ok(())
}

/// Prints the configured regions.
pub fn list_regions() {
    println!("{:<14} {:<8} {:<24} BOUNDS (sw → ne)", "ID", "KIND", "NAME");
    println!("{}", "-".repeat(80));
    for region in registry::all_regions() {
        println!(
            "{:<14} {:<8} {:<24} ({:.2}, {:.2}) → ({:.2}, {:.2})",
            region.id,
            format!("{:?}", region.kind).to_lowercase(),
            region.name,
            region.bbox.sw.lat,
            region.bbox.sw.lon,
            region.bbox.ne.lat,
            region.bbox.ne.lon,
        );
    }
    println!();
    println!("Haikubox devices: {}", registry::haikubox_serials().join(", "));
}
