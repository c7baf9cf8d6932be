//! Resilient request executor.
//!
//! [`Executor::execute`] turns one [`ApiRequest`] into a parsed JSON body,
//! retrying transient failures according to the [`BackoffPolicy`]:
//!
//! | Outcome | Handling |
//! |---|---|
//! | 2xx, valid JSON, no `errors` list | returned |
//! | 2xx with a GraphQL `errors` list | [`FetchError::Application`], no retry |
//! | 2xx with a truncated/garbled body | retried as [`ErrorClass::ServerError`] |
//! | 404 on a REST lookup | `Ok(None)` |
//! | 429 / 500 / 502 / 503 / 504 | retried |
//! | timeout, connection failure | retried |
//! | anything else | [`FetchError::Status`], no retry |
//!
//! When the attempts run out the caller gets
//! [`FetchError::RetryExhausted`] carrying the last failure.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::backoff::{BackoffPolicy, GatewayTimeoutTracker};
use crate::transport::{ApiRequest, RawResponse, Transport};
use crate::{ErrorClass, FetchError};

/// Retry tuning for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per logical request, including the first.
    pub max_attempts: u32,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Delay curves.
    pub backoff: BackoffPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            request_timeout_secs: 60,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryConfig {
    /// The per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Snapshot of a failed attempt, logged before each backoff sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptState {
    /// 1-based attempt number that just failed.
    pub attempt: u32,
    /// How the failure was classified.
    pub class: ErrorClass,
    /// Time since the first attempt of this logical request started.
    pub elapsed: Duration,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt {} failed ({}) after {:.1}s",
            self.attempt,
            self.class,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Result of a single attempt, before retry bookkeeping.
enum AttemptOutcome {
    Success(Option<serde_json::Value>),
    Transient {
        class: ErrorClass,
        error: FetchError,
    },
    Permanent(FetchError),
}

/// Issues requests through a [`Transport`] with classification and retry.
///
/// One executor is shared by every paginator, tile and chunk of a run so
/// that the gateway-timeout streak is tracked across logical requests.
pub struct Executor<T: Transport> {
    transport: T,
    policy: BackoffPolicy,
    max_attempts: u32,
    gateway_timeouts: GatewayTimeoutTracker,
    backed_off: bool,
}

impl<T: Transport> Executor<T> {
    #[must_use]
    pub fn new(transport: T, config: &RetryConfig) -> Self {
        Self {
            transport,
            policy: config.backoff.clone(),
            max_attempts: config.max_attempts.max(1),
            gateway_timeouts: GatewayTimeoutTracker::new(config.backoff.gateway_timeout_streak),
            backed_off: false,
        }
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the most recent [`execute`](Self::execute) call slept for
    /// backoff at least once. Pacing between pages is skipped in that case.
    #[must_use]
    pub const fn backed_off(&self) -> bool {
        self.backed_off
    }

    /// Executes one logical request.
    ///
    /// Returns `Ok(None)` when a REST resource does not exist (HTTP 404).
    ///
    /// # Errors
    ///
    /// * [`FetchError::RetryExhausted`] if every attempt failed transiently.
    /// * [`FetchError::Application`] if the API reported query errors.
    /// * [`FetchError::Status`] / [`FetchError::Transport`] for
    ///   non-retryable failures.
    pub async fn execute(
        &mut self,
        request: &ApiRequest,
    ) -> Result<Option<serde_json::Value>, FetchError> {
        self.backed_off = false;
        let label = request.label();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let (class, error) = match self.attempt_once(request).await {
                AttemptOutcome::Success(body) => {
                    self.gateway_timeouts.reset();
                    return Ok(body);
                }
                AttemptOutcome::Permanent(e) => {
                    self.gateway_timeouts.reset();
                    log::error!("{label}: permanent failure, not retrying: {e}");
                    return Err(e);
                }
                AttemptOutcome::Transient { class, error } => (class, error),
            };

            let state = AttemptState {
                attempt,
                class,
                elapsed: started.elapsed(),
            };
            let cooldown = self.gateway_timeouts.observe(class);

            if attempt >= self.max_attempts {
                log::error!("{label}: {state}, giving up after {attempt} attempts: {error}");
                if cooldown {
                    self.cool_down(label).await;
                }
                return Err(FetchError::RetryExhausted {
                    label: label.to_string(),
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            if cooldown {
                self.cool_down(label).await;
            } else {
                let delay = self.policy.delay(attempt, class, rand::random::<f64>());
                log::warn!(
                    "{label}: {state} ({attempt}/{max}): {error}; retrying in {:.1}s",
                    delay.as_secs_f64(),
                    max = self.max_attempts,
                );
                tokio::time::sleep(delay).await;
            }
            self.backed_off = true;
        }
    }

    async fn cool_down(&mut self, label: &str) {
        let cooldown = self.policy.cooldown();
        log::warn!(
            "{label}: {} gateway timeouts in a row, cooling down for {:.0}s",
            self.policy.gateway_timeout_streak,
            cooldown.as_secs_f64()
        );
        tokio::time::sleep(cooldown).await;
        self.backed_off = true;
    }

    async fn attempt_once(&self, request: &ApiRequest) -> AttemptOutcome {
        match self.transport.send(request).await {
            Ok(response) => classify_response(request, &response),
            Err(e) if e.is_transient() => AttemptOutcome::Transient {
                class: ErrorClass::Timeout,
                error: e.into(),
            },
            Err(e) => AttemptOutcome::Permanent(e.into()),
        }
    }
}

fn classify_response(request: &ApiRequest, response: &RawResponse) -> AttemptOutcome {
    let label = request.label();
    let status_error = || FetchError::Status {
        label: label.to_string(),
        status: response.status,
    };

    match response.status {
        200..=299 => parse_body(label, &response.body),
        404 if request.not_found_is_empty() => AttemptOutcome::Success(None),
        429 => AttemptOutcome::Transient {
            class: ErrorClass::RateLimited,
            error: status_error(),
        },
        504 => AttemptOutcome::Transient {
            class: ErrorClass::GatewayTimeout,
            error: status_error(),
        },
        500 | 502 | 503 => AttemptOutcome::Transient {
            class: ErrorClass::ServerError,
            error: status_error(),
        },
        _ => AttemptOutcome::Permanent(status_error()),
    }
}

fn parse_body(label: &str, body: &str) -> AttemptOutcome {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            return AttemptOutcome::Transient {
                class: ErrorClass::ServerError,
                error: e.into(),
            };
        }
    };

    if let Some(errors) = value.get("errors")
        && has_errors(errors)
    {
        return AttemptOutcome::Permanent(FetchError::Application {
            label: label.to_string(),
            message: errors.to_string(),
        });
    }

    AttemptOutcome::Success(Some(value))
}

fn has_errors(errors: &serde_json::Value) -> bool {
    match errors {
        serde_json::Value::Null => false,
        serde_json::Value::Array(list) => !list.is_empty(),
        _ => true,
    }
}
