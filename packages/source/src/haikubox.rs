//! Haikubox REST source.
//!
//! Daily counts are only available one device-day at a time, so a run
//! over N devices and D days issues N×D requests, paced to be kind to the
//! API. A 404 means the device has no data for that day.

use std::sync::Arc;
use std::time::Duration;

use backyard_ecology_fetch::executor::{Executor, RetryConfig};
use backyard_ecology_fetch::progress::ProgressCallback;
use backyard_ecology_fetch::transport::{ApiRequest, Transport};
use backyard_ecology_fetch_models::{DateWindow, FlatRecord};
use chrono::NaiveDate;
use serde_json::Value;

use crate::SourceError;
use crate::flatten;

/// Public REST API base URL.
pub const API_BASE: &str = "https://api.haikubox.com";

/// Default pause between consecutive requests. Matches the default
/// `[polling]` pacing of `FetchConfig`.
pub const DEFAULT_PACING: Duration = Duration::from_millis(500);

/// A device-day that could not be fetched.
#[derive(Debug)]
pub struct FailedDay {
    /// Device serial code.
    pub serial: String,
    /// The day that failed.
    pub date: NaiveDate,
    /// Why it failed.
    pub error: SourceError,
}

/// Result of a daily-count run.
#[derive(Debug, Default)]
pub struct DailyReport {
    /// Flattened rows sorted by `(date, species_name)`.
    pub rows: Vec<FlatRecord>,
    /// Device-days that were skipped.
    pub failures: Vec<FailedDay>,
    /// Device-days that returned 404 or no species.
    pub empty_days: u64,
}

impl DailyReport {
    /// Whether every device-day failed, as opposed to the devices simply
    /// having no data.
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        !self.failures.is_empty() && self.rows.is_empty() && self.empty_days == 0
    }
}

/// Client for the Haikubox REST API.
pub struct Haikubox<T: Transport> {
    executor: Executor<T>,
    base_url: String,
    pacing: Duration,
}

impl<T: Transport> Haikubox<T> {
    /// Creates a client against the public API with the default pacing.
    #[must_use]
    pub fn new(transport: T, retry: &RetryConfig) -> Self {
        Self {
            executor: Executor::new(transport, retry),
            base_url: API_BASE.to_string(),
            pacing: DEFAULT_PACING,
        }
    }

    /// Points the client at a different base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Overrides the pause between requests.
    #[must_use]
    pub const fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// The underlying executor.
    #[must_use]
    pub const fn executor(&self) -> &Executor<T> {
        &self.executor
    }

    fn request(&self, path: &str, params: Vec<(String, String)>, label: String) -> ApiRequest {
        ApiRequest::Rest {
            url: format!("{}{path}", self.base_url),
            params,
            label,
        }
    }

    /// Fetches device metadata. Returns `None` for an unknown serial.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`] if the request fails.
    pub async fn device_info(&mut self, serial: &str) -> Result<Option<Value>, SourceError> {
        let request = self.request(
            &format!("/haikubox/{serial}"),
            Vec::new(),
            format!("haikubox {serial} info"),
        );
        Ok(self.executor.execute(&request).await?)
    }

    /// Fetches one device-day of species counts. Returns `None` if the
    /// device has no data for that day.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`] if the request fails.
    pub async fn daily_count(
        &mut self,
        serial: &str,
        date: NaiveDate,
    ) -> Result<Option<Value>, SourceError> {
        let request = self.request(
            &format!("/haikubox/{serial}/daily-count"),
            vec![("date".to_string(), date.to_string())],
            format!("haikubox {serial} {date}"),
        );
        Ok(self.executor.execute(&request).await?)
    }

    /// Fetches daily counts for every device and every day in `window`.
    ///
    /// Failed device-days are logged and recorded in
    /// [`DailyReport::failures`]; the run carries on with the next day.
    pub async fn daily_counts(
        &mut self,
        serials: &[String],
        window: &DateWindow,
        progress: &Arc<dyn ProgressCallback>,
    ) -> DailyReport {
        let total = serials.len() as u64 * window.num_days();
        log::info!(
            "Fetching daily counts for {} devices over {} days ({total} requests)",
            serials.len(),
            window.num_days()
        );
        progress.set_total(total);
        progress.set_position(0);

        let mut report = DailyReport::default();
        let mut issued = 0_u64;

        for serial in serials {
            for date in window.days() {
                if issued > 0 && !self.pacing.is_zero() {
                    tokio::time::sleep(self.pacing).await;
                }
                issued += 1;

                match self.daily_count(serial, date).await {
                    Ok(Some(body)) => {
                        let rows = flatten::haikubox_daily(serial, date, &body);
                        if rows.is_empty() {
                            report.empty_days += 1;
                        }
                        report.rows.extend(rows);
                    }
                    Ok(None) => report.empty_days += 1,
                    Err(error) => {
                        log::warn!("haikubox {serial} {date}: skipped: {error}");
                        report.failures.push(FailedDay {
                            serial: serial.clone(),
                            date,
                            error,
                        });
                    }
                }
                progress.inc(1);
            }
        }

        sort_rows(&mut report.rows);
        log::info!(
            "Haikubox download complete: {} rows, {} empty days, {} failures",
            report.rows.len(),
            report.empty_days,
            report.failures.len()
        );
        report
    }
}

fn text<'a>(row: &'a FlatRecord, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Sorts rows by `(date, species_name)`. Dates are ISO strings, so string
/// order is chronological.
pub fn sort_rows(rows: &mut [FlatRecord]) {
    rows.sort_by(|a, b| {
        text(a, "date")
            .cmp(text(b, "date"))
            .then_with(|| text(a, "species_name").cmp(text(b, "species_name")))
    });
}
