//! Fixed-size id batches with inter-request pacing.
//!
//! Some endpoints accept a list of ids per request (station ids for daily
//! counts, for example). [`fetch_in_chunks`] splits the id list into
//! ordered chunks, sends one request per chunk, and keeps going when a
//! chunk fails: the failure is logged and recorded in the
//! [`ChunkReport`] and the remaining chunks still run.

use std::sync::Arc;
use std::time::Duration;

use backyard_ecology_fetch_models::DateWindow;
use serde::Deserialize;
use tokio::time::Instant;

use crate::FetchError;
use crate::executor::Executor;
use crate::progress::ProgressCallback;
use crate::transport::{ApiRequest, Transport};

/// Chunk size and pacing for batched requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Ids per request.
    pub chunk_size: usize,
    /// Minimum time between the starts of consecutive requests, in
    /// milliseconds.
    pub pacing_ms: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            pacing_ms: 1000,
        }
    }
}

impl ChunkConfig {
    #[must_use]
    pub const fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// A chunk that could not be fetched.
#[derive(Debug)]
pub struct ChunkFailure {
    /// Zero-based chunk index.
    pub index: usize,
    /// The ids the chunk covered.
    pub ids: Vec<String>,
    /// Why it failed.
    pub error: FetchError,
}

/// Outcome of a chunked fetch.
#[derive(Debug, Default)]
pub struct ChunkReport {
    /// Records from every successful chunk, in chunk order.
    pub records: Vec<serde_json::Value>,
    /// Chunks that were skipped.
    pub failures: Vec<ChunkFailure>,
    /// Total number of chunks attempted.
    pub chunks: usize,
}

impl ChunkReport {
    /// Whether every chunk succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids belonging to failed chunks.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures
            .iter()
            .flat_map(|f| f.ids.iter().map(String::as_str))
            .collect()
    }
}

/// Splits `ids` into consecutive chunks of at most `size` (a size of zero
/// is treated as one).
#[must_use]
pub fn chunk(ids: &[String], size: usize) -> Vec<&[String]> {
    ids.chunks(size.max(1)).collect()
}

/// Fetches records for `ids` in chunks of `config.chunk_size`.
///
/// `build` turns one chunk of ids plus the date window into a request;
/// `extract` pulls the record list out of a successful response body. A
/// `None` body (a REST 404) yields no records.
///
/// After each request the loop sleeps for the configured pacing minus the
/// time the request itself took, so a slow request is not followed by a
/// full extra pause.
///
/// Per-chunk failures never abort the run; they end up in
/// [`ChunkReport::failures`].
pub async fn fetch_in_chunks<T, B, E>(
    executor: &mut Executor<T>,
    ids: &[String],
    config: &ChunkConfig,
    window: &DateWindow,
    build: B,
    extract: E,
    progress: &Arc<dyn ProgressCallback>,
) -> ChunkReport
where
    T: Transport,
    B: Fn(&[String], &DateWindow) -> ApiRequest,
    E: Fn(serde_json::Value) -> Result<Vec<serde_json::Value>, FetchError>,
{
    let chunks = chunk(ids, config.chunk_size);
    let total = chunks.len();
    let pacing = config.pacing();
    let mut report = ChunkReport {
        chunks: total,
        ..ChunkReport::default()
    };

    progress.set_total(total as u64);
    progress.set_position(0);

    for (index, ids) in chunks.into_iter().enumerate() {
        let request = build(ids, window);
        let label = request.label().to_string();
        let started = Instant::now();

        let outcome = match executor.execute(&request).await {
            Ok(Some(body)) => extract(body),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(records) => {
                log::debug!(
                    "{label}: chunk {}/{total}: {} records",
                    index + 1,
                    records.len()
                );
                report.records.extend(records);
            }
            Err(e) => {
                log::warn!(
                    "{label}: chunk {}/{total} ({} ids) skipped: {e}",
                    index + 1,
                    ids.len()
                );
                report.failures.push(ChunkFailure {
                    index,
                    ids: ids.to_vec(),
                    error: e,
                });
            }
        }
        progress.inc(1);

        if index + 1 < total {
            let remaining = pacing.saturating_sub(started.elapsed());
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }
        }
    }

    if !report.is_complete() {
        log::warn!(
            "{} of {total} chunks failed ({} ids without data)",
            report.failures.len(),
            report.failed_ids().len()
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::executor::RetryConfig;
    use crate::progress::{RecordingProgress, null_progress};
    use crate::testing::MockTransport;
    use crate::transport::RawResponse;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| i.to_string()).collect()
    }

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn build(ids: &[String], window: &DateWindow) -> ApiRequest {
        ApiRequest::GraphQl {
            endpoint: "https://graphql.invalid/graphql".to_string(),
            query: "query counts { ... }".to_string(),
            variables: json!({
                "stationIds": ids,
                "period": {"from": window.from, "to": window.to},
            }),
            label: "daily counts".to_string(),
        }
    }

    fn extract(body: serde_json::Value) -> Result<Vec<serde_json::Value>, FetchError> {
        Ok(body["data"]["counts"].as_array().cloned().unwrap_or_default())
    }

    /// Echoes one record per requested station id.
    fn echo_transport() -> MockTransport {
        MockTransport::from_handler(|request| {
            let counts: Vec<_> = request
                .variable("stationIds")
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default()
                .into_iter()
                .map(|id| json!({"stationId": id}))
                .collect();
            Ok(RawResponse::json(200, &json!({"data": {"counts": counts}})))
        })
    }

    fn config(chunk_size: usize, pacing_ms: u64) -> ChunkConfig {
        ChunkConfig {
            chunk_size,
            pacing_ms,
        }
    }

    fn requested_ids(request: &ApiRequest) -> Vec<String> {
        request
            .variable("stationIds")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    #[test]
    fn chunking_preserves_order_and_sizes() {
        let ids = ids(101);
        let chunks = chunk(&ids, 50);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 50);
        assert_eq!(chunks[1].len(), 50);
        assert_eq!(chunks[2], ["101".to_string()]);
        assert_eq!(chunks.concat(), ids);
    }

    #[test]
    fn zero_chunk_size_is_treated_as_one() {
        assert_eq!(chunk(&ids(3), 0).len(), 3);
        assert!(chunk(&[], 10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_follow_id_order() {
        let mut executor = Executor::new(echo_transport(), &RetryConfig::default());
        let ids = ids(101);

        let report = fetch_in_chunks(
            &mut executor,
            &ids,
            &config(50, 0),
            &window(),
            build,
            extract,
            &null_progress(),
        )
        .await;

        assert!(report.is_complete());
        assert_eq!(report.chunks, 3);
        let requests = executor.transport().requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requested_ids(&requests[0]), ids[..50]);
        assert_eq!(requested_ids(&requests[1]), ids[50..100]);
        assert_eq!(requested_ids(&requests[2]), ["101"]);

        let returned: Vec<_> = report
            .records
            .iter()
            .filter_map(|r| r["stationId"].as_str())
            .collect();
        assert_eq!(returned, ids);
        assert_eq!(requests[0].variable("period").unwrap()["from"], "2024-01-01");
    }

    #[tokio::test(start_paused = true)]
    async fn paces_between_chunks_but_not_after_last() {
        let mut executor = Executor::new(echo_transport(), &RetryConfig::default());
        let start = Instant::now();

        fetch_in_chunks(
            &mut executor,
            &ids(75),
            &config(25, 1000),
            &window(),
            build,
            extract,
            &null_progress(),
        )
        .await;

        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_shortens_the_pause() {
        // A 429 on the first chunk costs a 600ms backoff.
        let transport = MockTransport::sequence(vec![
            Ok(RawResponse::empty(429)),
            Ok(RawResponse::json(200, &json!({"data": {"counts": []}}))),
        ]);
        let retry = RetryConfig {
            backoff: crate::backoff::BackoffPolicy {
                base_ms: 600,
                max_jitter_ms: 0,
                ..crate::backoff::BackoffPolicy::default()
            },
            ..RetryConfig::default()
        };
        let mut executor = Executor::new(transport, &retry);
        let start = Instant::now();

        fetch_in_chunks(
            &mut executor,
            &ids(2),
            &config(1, 1000),
            &window(),
            build,
            extract,
            &null_progress(),
        )
        .await;

        // Chunk 1 spends 600ms in backoff, then waits the remaining 400ms.
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_is_skipped_and_recorded() {
        // The second chunk (ids 3 and 4) is rejected outright.
        let transport = MockTransport::from_handler(|request| {
            let ids = requested_ids(request);
            if ids.first().map(String::as_str) == Some("3") {
                return Ok(RawResponse::empty(400));
            }
            let counts: Vec<_> = ids.iter().map(|id| json!({"stationId": id})).collect();
            Ok(RawResponse::json(200, &json!({"data": {"counts": counts}})))
        });
        let mut executor = Executor::new(transport, &RetryConfig::default());
        let progress = Arc::new(RecordingProgress::default());
        let observer: Arc<dyn ProgressCallback> = progress.clone();

        let report = fetch_in_chunks(
            &mut executor,
            &ids(6),
            &config(2, 0),
            &window(),
            build,
            extract,
            &observer,
        )
        .await;

        assert_eq!(report.chunks, 3);
        assert_eq!(report.records.len(), 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failed_ids(), ["3", "4"]);
        assert!(matches!(
            report.failures[0].error,
            FetchError::Status { status: 400, .. }
        ));
        assert_eq!(progress.total.load(std::sync::atomic::Ordering::Relaxed), 3);
        assert_eq!(progress.position.load(std::sync::atomic::Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn extraction_errors_are_recorded_too() {
        let mut executor = Executor::new(echo_transport(), &RetryConfig::default());

        let report = fetch_in_chunks(
            &mut executor,
            &ids(4),
            &config(2, 0),
            &window(),
            build,
            |_| {
                Err(FetchError::MalformedResponse {
                    label: "daily counts".to_string(),
                    message: "missing data.counts".to_string(),
                })
            },
            &null_progress(),
        )
        .await;

        assert!(report.records.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(executor.transport().request_count(), 2);
    }
}
