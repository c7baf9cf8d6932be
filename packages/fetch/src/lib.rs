#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Resilient paginated bulk-fetch engine.
//!
//! Pulls large result sets out of rate-limited, occasionally failing
//! GraphQL and REST APIs. The pieces stack as follows:
//!
//! - [`backoff`]: how long to sleep before a retry, per error class.
//! - [`executor`]: one logical request, classified and retried.
//! - [`paginate`]: cursor pagination over a GraphQL connection.
//! - [`tiled`]: tiled bounding-box discovery with finer-grid escalation.
//! - [`chunked`]: fixed-size id batches with inter-request pacing.
//!
//! Everything runs sequentially: one request is in flight at a time and
//! all waiting is done with explicit sleeps.

pub mod backoff;
pub mod chunked;
pub mod config;
pub mod executor;
pub mod paginate;
pub mod progress;
pub mod record_set;
pub mod tiled;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backyard_ecology_fetch_models as models;

use strum_macros::{AsRefStr, Display, EnumIter};

use crate::transport::TransportError;

/// Classification of a transient failure, used to pick a backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// HTTP 429.
    RateLimited,
    /// HTTP 500, 502 or 503, or a 2xx whose body was truncated or garbled.
    ServerError,
    /// Network-level timeout, connection failure or reset.
    Timeout,
    /// HTTP 504.
    GatewayTimeout,
}

/// Errors produced by the fetch engine.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The response body was not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a status that is neither success nor
    /// transient.
    #[error("{label}: HTTP {status}")]
    Status {
        /// Label of the request that failed.
        label: String,
        /// HTTP status code.
        status: u16,
    },

    /// The API accepted the request but reported application-level errors
    /// (malformed query, schema mismatch). Never retried.
    #[error("{label}: API reported errors: {message}")]
    Application {
        /// Label of the request that failed.
        label: String,
        /// The serialized error list.
        message: String,
    },

    /// A transient failure persisted through every allowed attempt.
    #[error("{label}: gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Label of the request that failed.
        label: String,
        /// Number of attempts made.
        attempts: u32,
        /// The failure observed on the final attempt.
        last_error: Box<Self>,
    },

    /// The API reported more pages but the cursor did not advance.
    #[error("{label}: pagination cursor did not advance (cursor: {cursor:?})")]
    StalledCursor {
        /// Label of the paginated query.
        label: String,
        /// The cursor that was returned again (or `None` if the API
        /// reported more pages without giving a cursor).
        cursor: Option<String>,
    },

    /// The response was JSON but did not have the expected shape.
    #[error("{label}: malformed response: {message}")]
    MalformedResponse {
        /// Label of the request.
        label: String,
        /// What was missing or wrong.
        message: String,
    },

    /// Every tiling strategy failed.
    #[error("tiled discovery failed at all {levels} tiling levels: {last_error}")]
    EscalationExhausted {
        /// Number of tiling levels attempted.
        levels: usize,
        /// The failure that aborted the finest level.
        last_error: Box<Self>,
    },
}

impl FetchError {
    /// Returns `true` for [`FetchError::RetryExhausted`], the failure that
    /// partition-level callers (tiles, chunks) recover from.
    #[must_use]
    pub const fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}
