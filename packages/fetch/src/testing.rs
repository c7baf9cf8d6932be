//! In-memory [`Transport`] for tests.
//!
//! [`MockTransport`] answers each request from a handler closure and keeps
//! a log of every request it saw, so tests can drive the executor,
//! paginator and friends against a synthetic API and then assert on the
//! exact requests that were issued.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::transport::{ApiRequest, RawResponse, Transport, TransportError};

type Handler = dyn Fn(&ApiRequest) -> Result<RawResponse, TransportError> + Send + Sync;

/// Scripted transport backed by a closure.
pub struct MockTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    /// Answers every request by calling `handler`.
    pub fn from_handler<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replays `responses` in order, repeating the last one once the script
    /// runs out.
    ///
    /// # Panics
    ///
    /// Panics if `responses` is empty.
    #[must_use]
    pub fn sequence(responses: Vec<Result<RawResponse, TransportError>>) -> Self {
        assert!(!responses.is_empty(), "MockTransport needs at least one response");
        let queue = Mutex::new(VecDeque::from(responses));
        Self::from_handler(move |_| {
            let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
            if queue.len() > 1 {
                queue.pop_front().unwrap_or_else(|| Ok(RawResponse::empty(500)))
            } else {
                queue
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Ok(RawResponse::empty(500)))
            }
        })
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        (self.handler)(request)
    }
}

/// A GraphQL request against a placeholder endpoint.
#[must_use]
pub fn graphql_request(variables: serde_json::Value) -> ApiRequest {
    ApiRequest::GraphQl {
        endpoint: "https://graphql.invalid/graphql".to_string(),
        query: "query test { test }".to_string(),
        variables,
        label: "test query".to_string(),
    }
}

/// A REST request against a placeholder URL.
#[must_use]
pub fn rest_request(params: &[(&str, &str)]) -> ApiRequest {
    ApiRequest::Rest {
        url: "https://rest.invalid/resource/1".to_string(),
        params: params
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        label: "test resource".to_string(),
    }
}

/// Builds a GraphQL connection response body
/// `{"data": {<connection>: {totalCount, pageInfo, nodes}}}`.
#[must_use]
pub fn connection_body(
    connection: &str,
    nodes: &[serde_json::Value],
    total_count: Option<u64>,
    end_cursor: Option<&str>,
    has_next_page: bool,
) -> serde_json::Value {
    serde_json::json!({
        "data": {
            connection: {
                "totalCount": total_count,
                "pageInfo": {
                    "hasNextPage": has_next_page,
                    "endCursor": end_cursor,
                },
                "nodes": nodes,
            }
        }
    })
}
