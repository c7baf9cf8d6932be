//! Tunable fetch settings, loadable from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) gives
//! the stock behavior:
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! request_timeout_secs = 60
//!
//! [retry.backoff]
//! base_ms = 1000
//! max_jitter_ms = 100
//!
//! [pagination]
//! page_size = 500
//! pacing_ms = 250
//!
//! [chunks]
//! chunk_size = 25
//! pacing_ms = 1000
//!
//! [polling]
//! pacing_ms = 500
//!
//! [[tiling]]
//! rows = 2
//! cols = 2
//! page_size = 100
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::chunked::ChunkConfig;
use crate::executor::RetryConfig;
use crate::paginate::PaginationConfig;
use crate::tiled::{TilingStrategy, default_strategies};

/// Errors loading a [`FetchConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or has the wrong shape.
    #[error("invalid fetch config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Pacing for one-request-per-item polling (a device-day at a time).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Pause between consecutive requests, in milliseconds.
    pub pacing_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { pacing_ms: 500 }
    }
}

impl PollingConfig {
    #[must_use]
    pub const fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// All fetch-engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retry and backoff settings.
    pub retry: RetryConfig,
    /// Page size and inter-page pacing.
    pub pagination: PaginationConfig,
    /// Batch size and pacing for id-chunked requests.
    pub chunks: ChunkConfig,
    /// Pacing for per-item polling.
    pub polling: PollingConfig,
    /// Tiling escalation ladder, coarsest first.
    pub tiling: Vec<TilingStrategy>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            pagination: PaginationConfig::default(),
            chunks: ChunkConfig::default(),
            polling: PollingConfig::default(),
            tiling: default_strategies(),
        }
    }
}

impl FetchConfig {
    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] if the text does not parse.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Toml`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("Loaded fetch config from {}", path.display());
        Ok(config)
    }
}
