//! Bounded retry with backoff.
//!
//! [`retry`] is the one retry loop used across the workspace: the locator
//! polls the coordinate display through it, and [`send_json`] wraps every
//! HTTP request in it. Callers decide which errors are worth another
//! attempt; everything else is returned immediately.
//!
//! # Usage
//!
//! ```ignore
//! use traffic_sweep_source::retry::{self, RetryPolicy};
//!
//! // GET with query params → typed JSON
//! let body: TelemetryResponse =
//!     retry::send_json(&RetryPolicy::exponential(3, 1000), || client.get(&url).query(&params))
//!         .await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::SourceError;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero means a single attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after every retry. `1.0` gives a
    /// fixed delay.
    #[serde(default = "default_backoff")]
    pub backoff: f64,
}

const fn default_backoff() -> f64 {
    1.0
}

impl RetryPolicy {
    /// A policy with a constant delay between attempts.
    #[must_use]
    pub const fn fixed(max_retries: u32, delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay_ms: delay_ms,
            backoff: 1.0,
        }
    }

    /// A policy whose delay doubles after each retry.
    #[must_use]
    pub const fn exponential(max_retries: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            backoff: 2.0,
        }
    }

    /// A single attempt, never retried.
    #[must_use]
    pub const fn none() -> Self {
        Self::fixed(0, 0)
    }

    /// Delay to wait before retry number `retry` (1-based).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.initial_delay_ms as f64 * self.backoff.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
    }

    /// The attempt schedule, for loops that cannot be expressed as a
    /// closure (e.g. ones that hold a mutable borrow across attempts).
    pub fn attempts(&self) -> impl Iterator<Item = Attempt> {
        let policy = *self;
        (0..=policy.max_retries).map(move |number| Attempt {
            number,
            is_last: number == policy.max_retries,
            delay: if number == 0 {
                Duration::ZERO
            } else {
                policy.delay_for(number)
            },
        })
    }
}

/// One entry of a [`RetryPolicy::attempts`] schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Zero-based attempt number.
    pub number: u32,
    /// Whether no attempt follows this one.
    pub is_last: bool,
    /// Delay to observe before making this attempt.
    pub delay: Duration,
}

impl Attempt {
    /// Sleeps for this attempt's delay.
    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, 1000)
    }
}

/// Runs `op` until it succeeds, fails with an error `should_retry`
/// rejects, or the policy's retries are exhausted.
///
/// `op` receives the zero-based attempt number. The last error is
/// returned when retries run out.
///
/// # Errors
///
/// Returns the error from the final attempt.
pub async fn retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    should_retry: C,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && should_retry(&e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{label}: {e} (retry {attempt}/{} in {delay:?})",
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sends an HTTP request and parses the response body as JSON into `T`.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (since builders are consumed by
/// `.send()`).
///
/// Connection errors, timeouts, HTTP 429 and HTTP 5xx are retried under
/// `policy`. Other 4xx statuses and undecodable bodies are permanent.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails after all retries, the
/// server returns a non-retryable status code, or the response body
/// cannot be parsed.
#[allow(clippy::future_not_send)]
pub async fn send_json<T, F>(policy: &RetryPolicy, build_request: F) -> Result<T, SourceError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = retry(policy, "HTTP request", is_transient, |_| {
        send_once(&build_request)
    })
    .await?;

    let url = response.url().to_string();
    let status = response.status();
    let text = response.text().await?;

    serde_json::from_str(&text).map_err(|e| {
        let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        log::warn!(
            "JSON parse failed.\n  \
             url: {url}\n  \
             status: {status}\n  \
             received: {} bytes\n  \
             parse error: {e}\n  \
             body preview: {preview}",
            text.len(),
        );
        SourceError::Json(e)
    })
}

/// Sends the request once and maps non-success statuses to
/// [`SourceError::Status`].
#[allow(clippy::future_not_send)]
async fn send_once<F>(build_request: &F) -> Result<reqwest::Response, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = build_request().send().await?;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        return Err(SourceError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        });
    }

    Ok(response)
}

/// Returns `true` if the error is likely transient and worth retrying.
#[must_use]
pub fn is_transient(e: &SourceError) -> bool {
    match e {
        SourceError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
        }
        SourceError::Status { status, .. } => *status == 429 || *status >= 500,
        SourceError::Json(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Probe {
        Transient,
        Permanent,
    }

    impl Display for Probe {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = retry(
            &RetryPolicy::fixed(3, 0),
            "test",
            |e: &Probe| *e == Probe::Transient,
            |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 2 {
                        Err(Probe::Transient)
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), Probe> = retry(
            &RetryPolicy::fixed(5, 0),
            "test",
            |e: &Probe| *e == Probe::Transient,
            |_| {
                calls.set(calls.get() + 1);
                async { Err(Probe::Permanent) }
            },
        )
        .await;
        assert_eq!(result, Err(Probe::Permanent));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), Probe> = retry(
            &RetryPolicy::fixed(2, 0),
            "test",
            |_: &Probe| true,
            |_| {
                calls.set(calls.get() + 1);
                async { Err(Probe::Transient) }
            },
        )
        .await;
        assert_eq!(result, Err(Probe::Transient));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exponential_delays_double() {
        let policy = RetryPolicy::exponential(5, 500);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(4000));
    }

    #[test]
    fn fixed_delays_stay_constant() {
        let policy = RetryPolicy::fixed(2, 600);
        assert_eq!(policy.delay_for(1), policy.delay_for(2));
        assert_eq!(RetryPolicy::none().delay_for(1), Duration::ZERO);
    }

    #[test]
    fn attempt_schedule_starts_immediately() {
        let attempts: Vec<Attempt> = RetryPolicy::exponential(2, 100).attempts().collect();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].delay, Duration::ZERO);
        assert_eq!(attempts[1].delay, Duration::from_millis(100));
        assert_eq!(attempts[2].delay, Duration::from_millis(200));
        assert!(attempts[2].is_last && !attempts[1].is_last);
    }

    #[test]
    fn status_classification() {
        let status = |status| SourceError::Status {
            status,
            url: String::new(),
        };
        assert!(is_transient(&status(429)));
        assert!(is_transient(&status(503)));
        assert!(!is_transient(&status(404)));
    }
}
