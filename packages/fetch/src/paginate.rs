//! Cursor pagination over a GraphQL connection.
//!
//! A connection is any field shaped like
//! `{ totalCount, pageInfo { hasNextPage endCursor }, nodes [...] }`.
//! The [`Paginator`] walks it one page at a time, passing `first` and
//! `after` on top of the caller's base variables, and refuses to loop when
//! the API hands back a cursor it has already seen.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use backyard_ecology_fetch_models::PageInfo;
use serde::Deserialize;

use crate::FetchError;
use crate::executor::Executor;
use crate::progress::ProgressCallback;
use crate::transport::{ApiRequest, Transport};

/// Default number of nodes requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Page size and inter-page pacing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Nodes requested per page (`first`).
    pub page_size: u32,
    /// Pause between successful page fetches, in milliseconds.
    pub pacing_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pacing_ms: 250,
        }
    }
}

impl PaginationConfig {
    /// The inter-page pause as a [`Duration`].
    #[must_use]
    pub const fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// A paginated GraphQL query: document, base variables, and the name of
/// the connection field under `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionQuery {
    /// GraphQL endpoint URL.
    pub endpoint: String,
    /// Query document declaring at least `$first` and `$after`.
    pub query: String,
    /// Variables sent with every page (`first`/`after` are added on top).
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Connection field name under `data` (e.g. `"detections"`).
    pub connection: String,
    /// Short description for log messages.
    pub label: String,
}

impl ConnectionQuery {
    fn page_request(&self, first: u32, after: Option<&str>) -> ApiRequest {
        let mut variables = self.variables.clone();
        variables.insert("first".to_string(), first.into());
        variables.insert(
            "after".to_string(),
            after.map_or(serde_json::Value::Null, Into::into),
        );
        ApiRequest::GraphQl {
            endpoint: self.endpoint.clone(),
            query: self.query.clone(),
            variables: serde_json::Value::Object(variables),
            label: self.label.clone(),
        }
    }
}

/// One page of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    /// The page's nodes.
    pub nodes: Vec<serde_json::Value>,
    /// `totalCount` if the API reported it.
    pub total_count: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionPayload {
    #[serde(default)]
    total_count: Option<u64>,
    page_info: PageInfo,
    #[serde(default)]
    nodes: Option<Vec<serde_json::Value>>,
}

/// Walks a connection page by page.
///
/// Each call to [`next_page`](Self::next_page) issues at most one logical
/// request. The sequence is finite: it ends when the API reports no next
/// page, and fails with [`FetchError::StalledCursor`] if the API reports a
/// next page without a fresh cursor.
pub struct Paginator<'a, T: Transport> {
    executor: &'a mut Executor<T>,
    query: &'a ConnectionQuery,
    page_size: u32,
    pacing: Duration,
    cursor: Option<String>,
    seen_cursors: BTreeSet<String>,
    pages_fetched: u32,
    finished: bool,
}

impl<'a, T: Transport> Paginator<'a, T> {
    #[must_use]
    pub fn new(
        executor: &'a mut Executor<T>,
        query: &'a ConnectionQuery,
        config: &PaginationConfig,
    ) -> Self {
        Self {
            executor,
            query,
            page_size: config.page_size.max(1),
            pacing: config.pacing(),
            cursor: None,
            seen_cursors: BTreeSet::new(),
            pages_fetched: 0,
            finished: false,
        }
    }

    /// Fetches the next page, or returns `Ok(None)` once the connection is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Propagates executor failures, and returns
    /// [`FetchError::MalformedResponse`] or [`FetchError::StalledCursor`]
    /// when the response cannot be paginated further.
    pub async fn next_page(&mut self) -> Result<Option<Page>, FetchError> {
        if self.finished {
            return Ok(None);
        }

        if self.pages_fetched > 0 && !self.executor.backed_off() && !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }

        let request = self
            .query
            .page_request(self.page_size, self.cursor.as_deref());
        let Some(body) = self.executor.execute(&request).await? else {
            self.finished = true;
            return Ok(None);
        };

        let payload = self.extract_connection(body)?;
        self.pages_fetched += 1;

        let page = Page {
            number: self.pages_fetched,
            nodes: payload.nodes.unwrap_or_default(),
            total_count: payload.total_count,
        };

        if payload.page_info.has_next_page {
            self.advance(payload.page_info.end_cursor)?;
        } else {
            self.finished = true;
        }

        Ok(Some(page))
    }

    /// Drains the remaining pages into one vector, reporting node counts to
    /// `progress` as they arrive.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`next_page`](Self::next_page).
    pub async fn collect_all(
        mut self,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<Vec<serde_json::Value>, FetchError> {
        let mut nodes = Vec::new();
        while let Some(page) = self.next_page().await? {
            if page.number == 1
                && let Some(total) = page.total_count
            {
                progress.set_total(total);
            }
            progress.inc(page.nodes.len() as u64);
            log::debug!(
                "{}: page {} returned {} nodes ({} so far)",
                self.query.label,
                page.number,
                page.nodes.len(),
                nodes.len() + page.nodes.len(),
            );
            nodes.extend(page.nodes);
        }
        Ok(nodes)
    }

    fn extract_connection(&self, body: serde_json::Value) -> Result<ConnectionPayload, FetchError> {
        let malformed = |message: String| FetchError::MalformedResponse {
            label: self.query.label.clone(),
            message,
        };

        let connection = body
            .get("data")
            .and_then(|data| data.get(&self.query.connection))
            .filter(|c| c.is_object())
            .cloned()
            .ok_or_else(|| malformed(format!("missing data.{}", self.query.connection)))?;

        serde_json::from_value(connection).map_err(|e| malformed(e.to_string()))
    }

    /// Moves to `next`. Every cursor ever used is remembered, so both an
    /// unchanged cursor and a cycle back to an older one are rejected.
    fn advance(&mut self, next: Option<String>) -> Result<(), FetchError> {
        match next {
            Some(next) if self.seen_cursors.insert(next.clone()) => {
                self.cursor = Some(next);
                Ok(())
            }
            cursor => Err(FetchError::StalledCursor {
                label: self.query.label.clone(),
                cursor,
            }),
        }
    }
}

/// Fetches every node of a connection.
///
/// # Errors
///
/// See [`Paginator::next_page`].
pub async fn paginate<T: Transport>(
    executor: &mut Executor<T>,
    query: &ConnectionQuery,
    config: &PaginationConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<Vec<serde_json::Value>, FetchError> {
    Paginator::new(executor, query, config)
        .collect_all(progress)
        .await
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::executor::RetryConfig;
    use crate::progress::null_progress;
    use crate::testing::{MockTransport, connection_body};
    use crate::transport::RawResponse;

    fn query() -> ConnectionQuery {
        let mut variables = serde_json::Map::new();
        variables.insert("period".to_string(), json!({"from": "2024-01-01", "to": "2024-01-31"}));
        ConnectionQuery {
            endpoint: "https://graphql.invalid/graphql".to_string(),
            query: "query detections($first: Int, $after: String) { ... }".to_string(),
            variables,
            connection: "detections".to_string(),
            label: "detections".to_string(),
        }
    }

    fn nodes(range: std::ops::Range<u64>) -> Vec<serde_json::Value> {
        range.map(|i| json!({"id": i.to_string()})).collect()
    }

    /// A synthetic API holding `total` nodes and serving them `first` at a
    /// time with the offset encoded in the cursor.
    fn synthetic_api(total: u64) -> MockTransport {
        MockTransport::from_handler(move |request| {
            let first = request
                .variable("first")
                .and_then(|v| v.as_u64())
                .unwrap_or(1);
            let offset = request
                .variable("after")
                .and_then(|v| v.as_str().and_then(|s| s.parse::<u64>().ok()))
                .unwrap_or(0);
            let end = (offset + first).min(total);
            let cursor = end.to_string();
            Ok(RawResponse::json(
                200,
                &connection_body(
                    "detections",
                    &nodes(offset..end),
                    Some(total),
                    Some(&cursor),
                    end < total,
                ),
            ))
        })
    }

    fn pagination(page_size: u32) -> PaginationConfig {
        PaginationConfig {
            page_size,
            pacing_ms: 250,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_every_record_regardless_of_page_size() {
        for page_size in [1, 7, 10, 100, 500] {
            let mut executor = Executor::new(synthetic_api(100), &RetryConfig::default());
            let all = paginate(&mut executor, &query(), &pagination(page_size), &null_progress())
                .await
                .unwrap();

            let ids: BTreeSet<&str> = all.iter().filter_map(|n| n["id"].as_str()).collect();
            assert_eq!(all.len(), 100, "page size {page_size}");
            assert_eq!(ids.len(), 100, "page size {page_size}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_page_scenario_uses_returned_cursor() {
        let transport = MockTransport::sequence(vec![
            Ok(RawResponse::json(
                200,
                &connection_body("detections", &nodes(0..500), Some(503), Some("c1"), true),
            )),
            Ok(RawResponse::json(
                200,
                &connection_body("detections", &nodes(500..503), Some(503), Some("c2"), false),
            )),
        ]);
        let mut executor = Executor::new(transport, &RetryConfig::default());

        let all = paginate(&mut executor, &query(), &pagination(500), &null_progress())
            .await
            .unwrap();
        assert_eq!(all.len(), 503);

        let requests = executor.transport().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].variable("after"), Some(serde_json::Value::Null));
        assert_eq!(requests[0].variable("first"), Some(json!(500)));
        assert_eq!(requests[1].variable("after"), Some(json!("c1")));
        // Base variables ride along on every page.
        assert_eq!(requests[1].variable("period"), query().variables.get("period").cloned());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_cursor_is_detected() {
        let page = connection_body("detections", &nodes(0..2), None, Some("same"), true);
        let transport = MockTransport::sequence(vec![Ok(RawResponse::json(200, &page))]);
        let mut executor = Executor::new(transport, &RetryConfig::default());

        let err = paginate(&mut executor, &query(), &pagination(2), &null_progress())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::StalledCursor { cursor: Some(ref c), .. } if c == "same"
        ));
        assert_eq!(executor.transport().request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cycling_cursors_are_detected() {
        let transport = MockTransport::sequence(vec![
            Ok(RawResponse::json(200, &connection_body("detections", &[], None, Some("a"), true))),
            Ok(RawResponse::json(200, &connection_body("detections", &[], None, Some("b"), true))),
            Ok(RawResponse::json(200, &connection_body("detections", &[], None, Some("a"), true))),
        ]);
        let mut executor = Executor::new(transport, &RetryConfig::default());

        let err = paginate(&mut executor, &query(), &pagination(2), &null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::StalledCursor { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn next_page_without_cursor_is_stalled() {
        let page = connection_body("detections", &nodes(0..1), None, None, true);
        let transport = MockTransport::sequence(vec![Ok(RawResponse::json(200, &page))]);
        let mut executor = Executor::new(transport, &RetryConfig::default());

        let err = paginate(&mut executor, &query(), &pagination(1), &null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::StalledCursor { cursor: None, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_connection_is_malformed() {
        let transport = MockTransport::sequence(vec![Ok(RawResponse::json(
            200,
            &json!({"data": {"stations": {}}}),
        ))]);
        let mut executor = Executor::new(transport, &RetryConfig::default());

        let err = paginate(&mut executor, &query(), &pagination(1), &null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn paces_between_pages_but_not_after_backoff() {
        // Three pages, no failures: two pacing sleeps.
        let mut executor = Executor::new(synthetic_api(3), &RetryConfig::default());
        let started = Instant::now();
        paginate(&mut executor, &query(), &pagination(1), &null_progress())
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(500));

        // Page 1 needs a retry (504 → 1s gateway backoff), so the pacing
        // before page 2 is skipped.
        let transport = MockTransport::sequence(vec![
            Ok(RawResponse::empty(504)),
            Ok(RawResponse::json(
                200,
                &connection_body("detections", &nodes(0..1), None, Some("c1"), true),
            )),
            Ok(RawResponse::json(
                200,
                &connection_body("detections", &nodes(1..2), None, Some("c2"), false),
            )),
        ]);
        let mut executor = Executor::new(transport, &RetryConfig::default());
        let started = Instant::now();
        let all = paginate(&mut executor, &query(), &pagination(1), &null_progress())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn next_page_yields_pages_lazily() {
        let mut executor = Executor::new(synthetic_api(5), &RetryConfig::default());
        let query = query();
        let mut paginator = Paginator::new(&mut executor, &query, &pagination(2));

        let first = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(first.nodes.len(), 2);
        assert_eq!(first.total_count, Some(5));

        let second = paginator.next_page().await.unwrap().unwrap();
        let third = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(second.nodes.len() + third.nodes.len(), 3);
        assert!(paginator.next_page().await.unwrap().is_none());
        assert!(paginator.next_page().await.unwrap().is_none());
        drop(paginator);
        assert_eq!(executor.transport().request_count(), 3);
    }
}
