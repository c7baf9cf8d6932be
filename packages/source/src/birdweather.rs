//! `BirdWeather` GraphQL source.
//!
//! Three call sites share one [`Executor`]:
//!
//! - county detections: a single bounding box, paginated directly;
//! - station discovery: a statewide box, tiled with escalation;
//! - daily counts: station ids in chunks, over a window narrowed to the
//!   earliest detection any discovered station reports.

use std::sync::Arc;

use backyard_ecology_fetch::chunked::{ChunkReport, fetch_in_chunks};
use backyard_ecology_fetch::config::FetchConfig;
use backyard_ecology_fetch::executor::Executor;
use backyard_ecology_fetch::paginate::{ConnectionQuery, PaginationConfig, paginate};
use backyard_ecology_fetch::progress::ProgressCallback;
use backyard_ecology_fetch::record_set::{RecordSet, record_id};
use backyard_ecology_fetch::tiled::{TiledDiscovery, discover_tiled};
use backyard_ecology_fetch::transport::{ApiRequest, Transport};
use backyard_ecology_fetch::FetchError;
use backyard_ecology_fetch_models::{BoundingBox, DateWindow};
use chrono::NaiveDate;
use serde_json::{Map, Value, json};

use crate::SourceError;

/// Public GraphQL endpoint.
pub const GRAPHQL_URL: &str = "https://app.birdweather.com/graphql";

/// Detections inside a bounding box, cursor-paginated.
pub const DETECTIONS_QUERY: &str = r"
query detections(
  $first: Int,
  $after: String,
  $period: InputDuration,
  $ne: InputLocation,
  $sw: InputLocation
) {
  detections(first: $first, after: $after, period: $period, ne: $ne, sw: $sw) {
    totalCount
    pageInfo { hasNextPage endCursor }
    nodes {
      id
      timestamp
      certainty
      confidence
      probability
      score
      coords { lat lon }
      species { id commonName scientificName ebirdCode }
      station { id name }
      soundscape { id url startTime endTime }
    }
  }
}
";

/// Stations inside a bounding box, cursor-paginated.
pub const STATIONS_QUERY: &str = r"
query stations(
  $first: Int,
  $after: String,
  $period: InputDuration,
  $ne: InputLocation,
  $sw: InputLocation
) {
  stations(first: $first, after: $after, period: $period, ne: $ne, sw: $sw) {
    totalCount
    pageInfo { hasNextPage endCursor }
    nodes {
      id
      name
      type
      timezone
      coords { lat lon }
      earliestDetectionAt
      latestDetectionAt
    }
  }
}
";

/// Per-day species counts for a set of stations.
pub const DAILY_COUNTS_QUERY: &str = r"
query dailyDetectionCounts($period: InputDuration, $stationIds: [ID!]) {
  dailyDetectionCounts(period: $period, stationIds: $stationIds) {
    date
    dayOfYear
    total
    counts {
      speciesId
      count
      species { id commonName scientificName }
    }
  }
}
";

const DAILY_COUNTS_FIELD: &str = "dailyDetectionCounts";

/// Result of a daily-count run.
#[derive(Debug)]
pub struct DailyCounts {
    /// The window actually queried, or `None` if no station had data
    /// inside the requested window.
    pub window: Option<DateWindow>,
    /// Per-chunk outcome; `records` holds the raw `dailyDetectionCounts`
    /// entries.
    pub report: ChunkReport,
}

/// Client for the `BirdWeather` GraphQL API.
pub struct BirdWeather<T: Transport> {
    executor: Executor<T>,
    endpoint: String,
    config: FetchConfig,
}

impl<T: Transport> BirdWeather<T> {
    /// Creates a client against the public endpoint.
    #[must_use]
    pub fn new(transport: T, config: FetchConfig) -> Self {
        Self {
            executor: Executor::new(transport, &config.retry),
            endpoint: GRAPHQL_URL.to_string(),
            config,
        }
    }

    /// Points the client at a different endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// The underlying executor.
    #[must_use]
    pub const fn executor(&self) -> &Executor<T> {
        &self.executor
    }

    fn box_query(
        &self,
        query: &str,
        connection: &str,
        bbox: &BoundingBox,
        window: &DateWindow,
        label: String,
    ) -> ConnectionQuery {
        let mut variables = Map::new();
        variables.insert("period".to_string(), period(window));
        variables.insert("ne".to_string(), json!(bbox.ne));
        variables.insert("sw".to_string(), json!(bbox.sw));
        ConnectionQuery {
            endpoint: self.endpoint.clone(),
            query: query.to_string(),
            variables,
            connection: connection.to_string(),
            label,
        }
    }

    /// Fetches every detection inside `bbox` during `window`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`] if any page cannot be fetched.
    pub async fn detections(
        &mut self,
        region_id: &str,
        bbox: &BoundingBox,
        window: &DateWindow,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<Vec<Value>, SourceError> {
        log::info!("Fetching detections for {region_id} ({window})");
        let query = self.box_query(
            DETECTIONS_QUERY,
            "detections",
            bbox,
            window,
            format!("detections {region_id}"),
        );
        let nodes = paginate(
            &mut self.executor,
            &query,
            &self.config.pagination,
            progress,
        )
        .await?;

        let fetched = nodes.len();
        let mut detections = RecordSet::new("id");
        let added = detections.extend(nodes);
        if added < fetched {
            log::warn!(
                "{region_id}: dropped {} detections repeated across pages",
                fetched - added
            );
        }
        log::info!("{region_id}: retrieved {} detections", detections.len());
        Ok(detections.into_records())
    }

    /// Discovers every station inside `bbox`, tiling the box and escalating
    /// to finer grids when tiles time out.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`] if even the finest tiling fails.
    pub async fn stations(
        &mut self,
        region_id: &str,
        bbox: &BoundingBox,
        window: &DateWindow,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<RecordSet, SourceError> {
        let label = format!("stations {region_id}");
        let tiling = self.config.tiling.clone();
        let discovery = TiledDiscovery {
            bbox: *bbox,
            strategies: &tiling,
            pacing: self.config.pagination.pacing(),
            id_field: "id",
            label: &label,
        };

        let endpoint = self.endpoint.clone();
        let build = |tile: &BoundingBox| {
            let mut variables = Map::new();
            variables.insert("period".to_string(), period(window));
            variables.insert("ne".to_string(), json!(tile.ne));
            variables.insert("sw".to_string(), json!(tile.sw));
            ConnectionQuery {
                endpoint: endpoint.clone(),
                query: STATIONS_QUERY.to_string(),
                variables,
                connection: "stations".to_string(),
                label: label.clone(),
            }
        };

        let stations = discover_tiled(&mut self.executor, &discovery, build, progress).await?;
        if stations.without_id() > 0 {
            log::warn!(
                "{region_id}: {} stations had no id and could not be deduplicated",
                stations.without_id()
            );
        }
        Ok(stations)
    }

    /// Fetches daily species counts for `stations`.
    ///
    /// The requested window is first narrowed to the earliest
    /// `earliestDetectionAt` across the stations; if that lies after the
    /// window's end, nothing is fetched. Chunks that fail are skipped and
    /// reported in [`DailyCounts::report`].
    pub async fn daily_counts(
        &mut self,
        stations: &[Value],
        window: &DateWindow,
        progress: &Arc<dyn ProgressCallback>,
    ) -> DailyCounts {
        let ids: Vec<String> = stations.iter().filter_map(|s| record_id(s, "id")).collect();

        let narrowed = match earliest_detection(stations) {
            Some(earliest) => window.narrowed_to(earliest),
            None => Some(*window),
        };
        let Some(narrowed) = narrowed else {
            log::info!(
                "No station has detections before {}; skipping daily counts",
                window.to
            );
            return DailyCounts {
                window: None,
                report: ChunkReport::default(),
            };
        };
        if narrowed != *window {
            log::info!("Narrowed daily-count window to {narrowed}");
        }

        log::info!(
            "Fetching daily counts for {} stations in chunks of {}",
            ids.len(),
            self.config.chunks.chunk_size
        );

        let endpoint = self.endpoint.clone();
        let build = |chunk: &[String], window: &DateWindow| ApiRequest::GraphQl {
            endpoint: endpoint.clone(),
            query: DAILY_COUNTS_QUERY.to_string(),
            variables: json!({
                "period": period(window),
                "stationIds": chunk,
            }),
            label: format!("daily counts ({} stations)", chunk.len()),
        };

        let report = fetch_in_chunks(
            &mut self.executor,
            &ids,
            &self.config.chunks,
            &narrowed,
            build,
            extract_daily_counts,
            progress,
        )
        .await;

        DailyCounts {
            window: Some(narrowed),
            report,
        }
    }

    /// Overrides the detection page size.
    pub const fn set_page_size(&mut self, page_size: u32) {
        self.config.pagination.page_size = page_size;
    }

    /// The pagination settings in effect.
    #[must_use]
    pub const fn pagination(&self) -> &PaginationConfig {
        &self.config.pagination
    }
}

/// The `InputDuration` variable for a window.
fn period(window: &DateWindow) -> Value {
    json!({"from": window.from, "to": window.to})
}

/// Parses the calendar date from an ISO-8601 timestamp or date string.
fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?;
    NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d").ok()
}

/// The earliest `earliestDetectionAt` date across `stations`.
#[must_use]
pub fn earliest_detection(stations: &[Value]) -> Option<NaiveDate> {
    stations
        .iter()
        .filter_map(|s| s.get("earliestDetectionAt").and_then(parse_date))
        .min()
}

fn extract_daily_counts(body: Value) -> Result<Vec<Value>, FetchError> {
    match body.get("data").and_then(|d| d.get(DAILY_COUNTS_FIELD)) {
        Some(Value::Array(rows)) => Ok(rows.clone()),
        Some(Value::Null) => Ok(Vec::new()),
        _ => Err(FetchError::MalformedResponse {
            label: DAILY_COUNTS_FIELD.to_string(),
            message: format!("missing data.{DAILY_COUNTS_FIELD}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use backyard_ecology_fetch::executor::RetryConfig;
    use backyard_ecology_fetch::progress::null_progress;
    use backyard_ecology_fetch::testing::{MockTransport, connection_body};
    use backyard_ecology_fetch::tiled::TilingStrategy;
    use backyard_ecology_fetch::transport::RawResponse;
    use backyard_ecology_fetch_models::LatLon;

    use super::*;

    fn window(from: (i32, u32, u32), to: (i32, u32, u32)) -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(from.0, from.1, from.2).unwrap(),
            NaiveDate::from_ymd_opt(to.0, to.1, to.2).unwrap(),
        )
        .unwrap()
    }

    fn duval() -> BoundingBox {
        BoundingBox::new(LatLon::new(30.65, -81.20), LatLon::new(30.00, -82.10))
    }

    fn config() -> FetchConfig {
        FetchConfig {
            retry: RetryConfig {
                max_attempts: 2,
                ..RetryConfig::default()
            },
            ..FetchConfig::default()
        }
    }

    fn graphql_variables(request: &ApiRequest) -> Value {
        match request {
            ApiRequest::GraphQl { variables, .. } => variables.clone(),
            ApiRequest::Rest { .. } => Value::Null,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn detections_send_box_and_period() {
        let transport = MockTransport::sequence(vec![
            Ok(RawResponse::json(
                200,
                &connection_body("detections", &[json!({"id": "1"})], Some(2), Some("c1"), true),
            )),
            Ok(RawResponse::json(
                200,
                &connection_body("detections", &[json!({"id": "2"})], Some(2), None, false),
            )),
        ]);
        let mut client = BirdWeather::new(transport, config());

        let nodes = client
            .detections(
                "duval_fl",
                &duval(),
                &window((2018, 1, 1), (2025, 10, 22)),
                &null_progress(),
            )
            .await
            .unwrap();

        assert_eq!(nodes.len(), 2);
        let requests = client.executor().transport().requests();
        let first = graphql_variables(&requests[0]);
        assert_eq!(first["period"], json!({"from": "2018-01-01", "to": "2025-10-22"}));
        assert_eq!(first["ne"], json!({"lat": 30.65, "lon": -81.20}));
        assert_eq!(first["sw"], json!({"lat": 30.00, "lon": -82.10}));
        assert_eq!(first["first"], 500);
        assert!(first["after"].is_null());
        assert_eq!(graphql_variables(&requests[1])["after"], "c1");
    }

    #[tokio::test(start_paused = true)]
    async fn detections_repeated_across_pages_are_kept_once() {
        let transport = MockTransport::sequence(vec![
            Ok(RawResponse::json(
                200,
                &connection_body(
                    "detections",
                    &[json!({"id": 1}), json!({"id": 2})],
                    Some(3),
                    Some("c1"),
                    true,
                ),
            )),
            Ok(RawResponse::json(
                200,
                &connection_body(
                    "detections",
                    &[json!({"id": 2}), json!({"id": 3})],
                    Some(3),
                    None,
                    false,
                ),
            )),
        ]);
        let mut client = BirdWeather::new(transport, config());

        let nodes = client
            .detections("duval_fl", &duval(), &window((2024, 1, 1), (2024, 1, 31)), &null_progress())
            .await
            .unwrap();

        let ids: Vec<String> = nodes.iter().filter_map(|n| record_id(n, "id")).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn page_size_override_applies() {
        let transport = MockTransport::sequence(vec![Ok(RawResponse::json(
            200,
            &connection_body("detections", &[], Some(0), None, false),
        ))]);
        let mut client = BirdWeather::new(transport, config());
        client.set_page_size(100);

        client
            .detections("duval_fl", &duval(), &window((2024, 1, 1), (2024, 1, 2)), &null_progress())
            .await
            .unwrap();

        assert_eq!(client.pagination().page_size, 100);
        let requests = client.executor().transport().requests();
        assert_eq!(graphql_variables(&requests[0])["first"], 100);
    }

    #[tokio::test(start_paused = true)]
    async fn stations_are_discovered_across_tiles_without_duplicates() {
        let transport = MockTransport::from_handler(|request| {
            let nodes = [
                json!({"id": "1", "earliestDetectionAt": "2021-06-01T10:00:00Z"}),
                json!({"id": format!("{}", request.variable("sw").unwrap()["lat"])}),
            ];
            Ok(RawResponse::json(
                200,
                &connection_body("stations", &nodes, None, None, false),
            ))
        });
        let mut client = BirdWeather::new(
            transport,
            FetchConfig {
                tiling: vec![TilingStrategy::new(2, 2, 100)],
                ..config()
            },
        );

        let stations = client
            .stations("florida", &duval(), &window((2018, 1, 1), (2025, 1, 1)), &null_progress())
            .await
            .unwrap();

        // One shared station plus one per tile row (two tiles per row share
        // the same southern edge).
        assert_eq!(stations.len(), 3);
        let requests = client.executor().transport().requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(graphql_variables(&requests[0])["first"], 100);
    }

    #[test]
    fn earliest_detection_ignores_missing_and_bad_dates() {
        let stations = [
            json!({"id": "a", "earliestDetectionAt": "2022-05-03T00:00:00Z"}),
            json!({"id": "b", "earliestDetectionAt": null}),
            json!({"id": "c", "earliestDetectionAt": "garbage"}),
            json!({"id": "d", "earliestDetectionAt": "2020-11-30T23:59:59-05:00"}),
        ];
        assert_eq!(
            earliest_detection(&stations),
            NaiveDate::from_ymd_opt(2020, 11, 30)
        );
        assert_eq!(earliest_detection(&[]), None);
    }

    fn counts_transport() -> MockTransport {
        MockTransport::from_handler(|request| {
            let ids = request
                .variable("stationIds")
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default();
            let rows: Vec<_> = ids
                .iter()
                .map(|id| json!({"date": "2024-01-01", "total": 1, "counts": [{"speciesId": id, "count": 1}]}))
                .collect();
            Ok(RawResponse::json(
                200,
                &json!({"data": {"dailyDetectionCounts": rows}}),
            ))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn daily_counts_narrow_window_and_chunk_ids() {
        let mut client = BirdWeather::new(counts_transport(), config());
        let stations: Vec<_> = (0..30)
            .map(|i| json!({"id": i.to_string(), "earliestDetectionAt": "2023-02-10T08:00:00Z"}))
            .collect();

        let counts = client
            .daily_counts(&stations, &window((2018, 1, 1), (2024, 12, 31)), &null_progress())
            .await;

        assert_eq!(counts.window, Some(window((2023, 2, 10), (2024, 12, 31))));
        assert!(counts.report.is_complete());
        assert_eq!(counts.report.chunks, 2);
        assert_eq!(counts.report.records.len(), 30);

        let requests = client.executor().transport().requests();
        let first = graphql_variables(&requests[0]);
        assert_eq!(first["stationIds"].as_array().unwrap().len(), 25);
        assert_eq!(first["period"]["from"], "2023-02-10");
        assert_eq!(
            graphql_variables(&requests[1])["stationIds"].as_array().unwrap().len(),
            5
        );
    }

    #[tokio::test(start_paused = true)]
    async fn daily_counts_skip_when_stations_start_after_window() {
        let mut client = BirdWeather::new(counts_transport(), config());
        let stations = [json!({"id": "1", "earliestDetectionAt": "2025-01-01T00:00:00Z"})];

        let counts = client
            .daily_counts(&stations, &window((2024, 1, 1), (2024, 12, 31)), &null_progress())
            .await;

        assert_eq!(counts.window, None);
        assert_eq!(counts.report.chunks, 0);
        assert_eq!(client.executor().transport().request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_chunk_is_reported_not_fatal() {
        let calls = AtomicUsize::new(0);
        let transport = MockTransport::from_handler(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(RawResponse::json(200, &json!({"data": {}})))
            } else {
                Ok(RawResponse::json(
                    200,
                    &json!({"data": {"dailyDetectionCounts": [{"date": "2024-01-01"}]}}),
                ))
            }
        });
        let mut client = BirdWeather::new(transport, config());
        let stations: Vec<_> = (0..50).map(|i| json!({"id": i})).collect();

        let counts = client
            .daily_counts(&stations, &window((2024, 1, 1), (2024, 1, 31)), &null_progress())
            .await;

        assert_eq!(counts.report.chunks, 2);
        assert_eq!(counts.report.failures.len(), 1);
        assert_eq!(counts.report.failures[0].ids.len(), 25);
        assert_eq!(counts.report.records.len(), 1);
    }
}
