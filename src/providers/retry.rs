use crate::error::{AikaraError, Result};
use std::time::Duration;
use tracing::warn;

/// Maximum backoff cap to prevent excessively long waits.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Whether an error is worth another attempt.
///
/// An unreachable service and transport-level timeouts are retried. API
/// errors are classified by their message: rate limiting (429), server
/// errors (500, 502, 503, 504), timeouts and connection issues retry;
/// client errors (400, 401, 403, 404) and invalid input do not.
pub(crate) fn is_retryable(err: &AikaraError) -> bool {
    match err {
        AikaraError::InferenceUnavailable { .. } => return true,
        AikaraError::Http(e) if e.is_timeout() || e.is_connect() => return true,
        AikaraError::ApiRequest(_) | AikaraError::Http(_) => {}
        _ => return false,
    }

    let msg = err.to_string().to_lowercase();

    // Non-retryable patterns take priority
    let non_retryable = ["400", "401", "403", "404", "invalid", "unauthorized", "not found"];
    if non_retryable.iter().any(|p| msg.contains(p)) {
        return false;
    }

    let retryable = [
        "429",
        "500",
        "502",
        "503",
        "504",
        "timeout",
        "connection refused",
        "connection reset",
    ];
    retryable.iter().any(|p| msg.contains(p))
}

/// Retry an async operation with exponential backoff.
///
/// Starts with `initial_delay` and doubles it each attempt, capping at 30 seconds.
/// Non-retryable errors are returned immediately.
///
/// # Arguments
/// * `max_retries` - Maximum number of retry attempts (0 means execute once with no retries)
/// * `initial_delay` - The delay before the first retry
/// * `f` - The async closure to retry
pub async fn retry_with_backoff<F, Fut, T>(
    max_retries: u32,
    initial_delay: Duration,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt >= max_retries || !is_retryable(&err) {
                    return Err(err);
                }

                warn!(
                    attempt = attempt + 1,
                    max_attempts = max_retries + 1,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Request failed, retrying"
                );

                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                attempt += 1;
            }
        }
    }
}
