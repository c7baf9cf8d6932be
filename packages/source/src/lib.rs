#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Bird detection data sources.
//!
//! Two upstream APIs are supported:
//!
//! - [`birdweather`]: the `BirdWeather` GraphQL API (county detections,
//!   statewide station discovery, per-station daily counts).
//! - [`haikubox`]: the Haikubox REST API (per-device daily counts).
//!
//! Both drive the shared [`backyard_ecology_fetch`] engine, and [`flatten`]
//! turns their nested JSON into CSV-ready rows. Regions and devices come
//! from the embedded TOML [`registry`].

pub mod birdweather;
pub mod flatten;
pub mod haikubox;
pub mod registry;

use backyard_ecology_fetch::FetchError;

/// Errors that can occur during data source operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The fetch engine gave up.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An embedded or user-supplied TOML config did not parse.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// No region with this id is configured.
    #[error("Unknown region '{id}' (known: {known})")]
    UnknownRegion {
        /// The requested id.
        id: String,
        /// Comma-separated list of configured ids.
        known: String,
    },
}
