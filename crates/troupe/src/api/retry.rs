//! Backoff for failed model calls.
//!
//! Model errors are plain strings at this layer. [`classify_error`] sorts
//! them into [`ErrorClass`]es by HTTP status and common network phrasing,
//! and only [`ErrorClass::Transient`] failures are ever retried. The budget
//! of a model call comes from
//! [`SamplingParameters::max_retries`](crate::agent::metadata::SamplingParameters::max_retries).

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How a failed call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limits, 5xx responses and dropped connections.
    Transient,
    /// Rejected requests and auth failures; retrying cannot help.
    Permanent,
    /// Anything else. Not retried.
    Unknown,
}

const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
const PERMANENT_STATUSES: [u16; 5] = [400, 401, 403, 404, 422];

const NETWORK_PHRASES: [&str; 7] = [
    "request failed:",
    "connection reset",
    "connection refused",
    "connection closed",
    "timed out",
    "broken pipe",
    "network",
];

/// Status code following an `HTTP ` marker, if any.
fn http_status(error: &str) -> Option<u16> {
    let (_, rest) = error.split_once("HTTP ")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

pub fn classify_error(error: &str) -> ErrorClass {
    if let Some(status) = http_status(error) {
        if TRANSIENT_STATUSES.contains(&status) {
            return ErrorClass::Transient;
        }
        if PERMANENT_STATUSES.contains(&status) {
            return ErrorClass::Permanent;
        }
    }
    let lower = error.to_lowercase();
    if NETWORK_PHRASES.iter().any(|p| lower.contains(p)) || lower.contains("timeout") {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    }
}

pub fn is_transient_error(error: &str) -> bool {
    classify_error(error) == ErrorClass::Transient
}

/// Exponential backoff schedule. `max_retries` is normally overwritten by
/// the agent's sampling parameters before use.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt. 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Scale delays by a fixed per-attempt factor in `[0.6, 0.9]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Same budget, no waiting between attempts.
    pub fn immediate(mut self) -> Self {
        self.base_delay = Duration::ZERO;
        self.max_delay = Duration::ZERO;
        self
    }

    /// Delay before retry number `attempt + 1` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = (self.base_delay.as_secs_f64() * self.factor.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        let scale = if self.jitter {
            [0.75, 0.9, 0.6, 0.85][(attempt % 4) as usize]
        } else {
            1.0
        };
        Duration::from_secs_f64(secs * scale)
    }

    /// How long to wait before retrying after `error` on `attempt`, or
    /// `None` when the call should fail now.
    pub fn next_delay(&self, attempt: u32, error: &str) -> Option<Duration> {
        (attempt < self.max_retries && is_transient_error(error)).then(|| self.delay_for_attempt(attempt))
    }
}

/// Run `op` until it succeeds or [`RetryConfig::next_delay`] gives up.
/// Returns the last error on failure.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut attempt = 0;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let Some(delay) = config.next_delay(attempt, &error) else {
            debug!("{label} failed after {} attempt(s): {error}", attempt + 1);
            return Err(error);
        };
        warn!(
            "{label} failed (attempt {}/{}), retrying in {:.1}s: {error}",
            attempt + 1,
            config.max_retries + 1,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn classification_reads_status_codes() {
        assert_eq!(classify_error("OpenRouter API HTTP 429: rate limited"), ErrorClass::Transient);
        assert_eq!(classify_error("OpenRouter API HTTP 503: overloaded"), ErrorClass::Transient);
        assert_eq!(classify_error("OpenRouter API HTTP 401: unauthorized"), ErrorClass::Permanent);
        assert_eq!(classify_error("request failed: connection reset"), ErrorClass::Transient);
        assert_eq!(classify_error("model returned nonsense"), ErrorClass::Unknown);
    }

    #[test]
    fn bad_request_mentioning_timeout_is_permanent() {
        assert_eq!(
            classify_error("HTTP 400: invalid value for 'timeout'"),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn backoff_grows_until_capped() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_secs(2),
            ..RetryConfig::with_retries(10)
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(9), Duration::from_secs(2));
    }

    #[test]
    fn next_delay_respects_budget() {
        let config = RetryConfig::with_retries(1).immediate();
        assert_eq!(config.next_delay(0, "HTTP 502"), Some(Duration::ZERO));
        assert_eq!(config.next_delay(1, "HTTP 502"), None);
        assert_eq!(RetryConfig::default().next_delay(0, "HTTP 502"), None);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::with_retries(3).immediate(), "model call", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("HTTP 503: overloaded".to_string())
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            with_retry(&RetryConfig::with_retries(2).immediate(), "model call", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("HTTP 429: slow down".to_string())
            })
            .await;
        assert!(result.unwrap_err().contains("429"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            with_retry(&RetryConfig::with_retries(5).immediate(), "model call", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("HTTP 401: unauthorized".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
