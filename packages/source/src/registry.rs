//! Region and device registry, loaded from embedded TOML configs.
//!
//! Each `.toml` file in `packages/source/regions/` is baked into the binary
//! at compile time via [`include_str!`]. Adding a region means creating a
//! new TOML file and adding it to the list below.

use backyard_ecology_fetch_models::BoundingBox;
use serde::Deserialize;

use crate::SourceError;

/// Region TOML configs embedded at compile time.
const REGION_TOMLS: &[(&str, &str)] = &[
    // ── County detection boxes ───────────────────────────────────────
    ("duval_fl", include_str!("../regions/duval_fl.toml")),
    ("st_johns_fl", include_str!("../regions/st_johns_fl.toml")),
    // ── Statewide station discovery ──────────────────────────────────
    ("florida", include_str!("../regions/florida.toml")),
];

const HAIKUBOX_TOML: &str = include_str!("../devices/haikubox.toml");

/// Regions fetched by default for county detections.
pub const DEFAULT_DETECTION_REGIONS: &[&str] = &["duval_fl", "st_johns_fl"];

/// Region used by default for station discovery.
pub const DEFAULT_STATION_REGION: &str = "florida";

/// What a region is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// A county box small enough to paginate directly.
    County,
    /// A statewide box that must be tiled.
    State,
}

/// A named geographic extent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Region {
    /// Stable identifier, used in output file names.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What the region is used for.
    pub kind: RegionKind,
    /// The extent to query.
    pub bbox: BoundingBox,
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    serials: Vec<String>,
}

/// Parses one region TOML document.
///
/// # Errors
///
/// Returns [`SourceError::Config`] if the TOML is malformed.
pub fn parse_region_toml(toml_str: &str) -> Result<Region, SourceError> {
    Ok(toml::de::from_str(toml_str)?)
}

/// Returns all configured regions, parsed from embedded TOML.
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_regions() -> Vec<Region> {
    REGION_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_region_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Looks up a region by id.
///
/// # Errors
///
/// Returns [`SourceError::UnknownRegion`] if no region has this id.
pub fn region(id: &str) -> Result<Region, SourceError> {
    let regions = all_regions();
    if let Some(region) = regions.iter().find(|r| r.id == id) {
        return Ok(region.clone());
    }
    Err(SourceError::UnknownRegion {
        id: id.to_string(),
        known: regions
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Serial codes of the configured Haikubox devices.
///
/// # Panics
///
/// Panics if the embedded device list is malformed.
#[must_use]
pub fn haikubox_serials() -> Vec<String> {
    toml::de::from_str::<DeviceList>(HAIKUBOX_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse haikubox.toml: {e}"))
        .serials
}
