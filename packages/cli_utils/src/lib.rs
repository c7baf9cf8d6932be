#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing shared by the backyard ecology binaries.
//!
//! Fetch progress (pages of detections, tiles of a station sweep, chunks
//! of daily counts, Haikubox device-days) is reported through the fetch
//! engine's [`ProgressCallback`]. On a terminal that lands on `indicatif`
//! bars; under cron or CI it falls back to periodic log lines. Log output
//! goes through `indicatif-log-bridge` (see [`init_logger`]) so it never
//! tears a bar.

use std::io::IsTerminal as _;
use std::sync::Arc;
use std::time::Duration;

use backyard_ecology_fetch::progress::{LogProgress, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {msg} ({pos} so far)";
const FETCH_TEMPLATE: &str = "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{eta}]";
const STEPS_TEMPLATE: &str = "{msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]";

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// [`ProgressCallback`] backed by an `indicatif` bar.
///
/// A fetch usually learns its size only after the first response
/// (`totalCount`, the tile count of a grid, the number of chunks), so the
/// bar can start as a spinner and switch to a sized bar on the first
/// `set_total`.
pub struct IndicatifProgress {
    bar: ProgressBar,
    sized_style: ProgressStyle,
}

impl IndicatifProgress {
    /// A fetch bar: spinner first, sized bar with ETA once the total is
    /// known.
    #[must_use]
    pub fn records_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template(SPINNER_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        Arc::new(Self {
            bar,
            sized_style: bar_style(FETCH_TEMPLATE),
        })
    }

    /// An outer bar over a known number of steps, such as the regions of
    /// a detections run.
    #[must_use]
    pub fn steps_bar(
        multi: &MultiProgress,
        message: &str,
        total: u64,
    ) -> Arc<dyn ProgressCallback> {
        let style = bar_style(STEPS_TEMPLATE);
        let bar = multi.add(ProgressBar::new(total).with_style(style.clone()));
        bar.set_message(message.to_string());

        Arc::new(Self {
            bar,
            sized_style: style,
        })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.sized_style.clone());
    }

    fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Picks a progress reporter: an `indicatif` bar when stderr is a
/// terminal, otherwise a [`LogProgress`] that logs every `log_every` units.
#[must_use]
pub fn progress_for(multi: &MultiProgress, message: &str, log_every: u64) -> Arc<dyn ProgressCallback> {
    if std::io::stderr().is_terminal() {
        IndicatifProgress::records_bar(multi, message)
    } else {
        LogProgress::new(message, log_every)
    }
}

/// Installs `pretty_env_logger` (filtered by `RUST_LOG`) behind
/// `indicatif-log-bridge` and returns the [`MultiProgress`] every bar
/// must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_err()
    {
        log::debug!("Logger already installed");
    }
    log::set_max_level(level);

    multi
}
