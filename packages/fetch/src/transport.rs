//! The HTTP seam.
//!
//! The executor never touches `reqwest` directly; it hands an
//! [`ApiRequest`] to a [`Transport`] and gets back the raw status and body.
//! [`HttpTransport`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("backyard-ecology/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One remote call, fully described.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    /// A GraphQL `{query, variables}` POST.
    GraphQl {
        /// GraphQL endpoint URL.
        endpoint: String,
        /// Query document.
        query: String,
        /// Query variables (a JSON object).
        variables: serde_json::Value,
        /// Short description for log messages.
        label: String,
    },
    /// A REST `GET` with query parameters. A 404 response means "no data".
    Rest {
        /// Resource URL.
        url: String,
        /// Query-string parameters.
        params: Vec<(String, String)>,
        /// Short description for log messages.
        label: String,
    },
}

impl ApiRequest {
    /// Short description for log messages.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::GraphQl { label, .. } | Self::Rest { label, .. } => label,
        }
    }

    /// Whether a 404 should be read as an empty result rather than an
    /// error. True for REST resource lookups.
    #[must_use]
    pub const fn not_found_is_empty(&self) -> bool {
        matches!(self, Self::Rest { .. })
    }

    /// Looks up a GraphQL variable (or REST query parameter) by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<serde_json::Value> {
        match self {
            Self::GraphQl { variables, .. } => variables.get(name).cloned(),
            Self::Rest { params, .. } => params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| serde_json::Value::String(v.clone())),
        }
    }
}

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// A response with a JSON body.
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    /// A response with an empty body.
    #[must_use]
    pub const fn empty(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// Failure to obtain any HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The request or response body was interrupted mid-flight.
    #[error("request interrupted: {0}")]
    Interrupted(String),
    /// Anything else (bad URL, TLS setup, builder errors). Not retried.
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if a retry might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Interrupted(_)
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() || e.is_request() {
            Self::Interrupted(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Sends requests to a remote API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the request and returns the raw response, whatever its
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if no HTTP response was received.
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a client with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Other`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let builder = match request {
            ApiRequest::GraphQl {
                endpoint,
                query,
                variables,
                ..
            } => self
                .client
                .post(endpoint)
                .json(&json!({ "query": query, "variables": variables })),
            ApiRequest::Rest { url, params, .. } => self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(params),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(RawResponse { status, body })
    }
}
