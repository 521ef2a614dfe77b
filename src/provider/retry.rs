//! Shared infrastructure for cloud API providers (Gemini, Groq, DeepSeek).
//!
//! Provides common helpers for request pacing, Retry-After parsing,
//! and retry logic on rate limit responses.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::{ProviderError, ProviderId};

/// Maximum retry attempts on rate limit (429) errors.
pub const MAX_RETRIES: u32 = 5;

/// Read a delay in milliseconds from an environment variable.
pub fn get_delay_from_env(env_var: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(env_var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

/// Parse a Retry-After header value (seconds form only).
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Exponential backoff delay for the given attempt number.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1u64 << attempt.min(10)))
}

/// Apply a configurable pacing delay before an API request.
pub async fn apply_rate_delay(env_var: &str, default_ms: u64, provider_name: &str) {
    let delay = get_delay_from_env(env_var, default_ms);
    if delay > Duration::ZERO {
        debug!("{}: waiting {:?} before request", provider_name, delay);
        tokio::time::sleep(delay).await;
    }
}

/// Retry an API request on 429 (rate limited) responses with exponential backoff.
///
/// Returns the first non-429 response. If all retries are exhausted,
/// returns `ProviderError::RateLimited` so the fallback chain can move on.
pub async fn retry_on_rate_limit<F, Fut>(
    provider: ProviderId,
    make_request: F,
) -> Result<reqwest::Response, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        let response = make_request().await?;

        if response.status().as_u16() != 429 {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let retry_after_secs = retry_after.as_deref().and_then(|s| s.parse::<u64>().ok());

        if attempt >= MAX_RETRIES {
            return Err(ProviderError::RateLimited {
                provider,
                retry_after_secs,
            });
        }

        let wait = parse_retry_after(retry_after.as_deref())
            .unwrap_or_else(|| backoff_delay(attempt, 1000));

        warn!(
            "{} rate limited (attempt {}), waiting {:?}",
            provider,
            attempt + 1,
            wait
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0, 1000), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, 1000), Duration::from_millis(2000));
        assert_eq!(backoff_delay(3, 1000), Duration::from_millis(8000));
    }

    #[test]
    fn retry_after_parses_seconds() {
        assert_eq!(parse_retry_after(Some("30")), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(Some(" 5 ")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
