use metabase_error::error::RetryError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `operation` up to `max_attempts` times, waiting `delay` between attempts.
///
/// Attempts are sequential and the first success is returned as is. The wait
/// between attempts is abandoned as soon as `cancel` fires, in which case
/// `RetryError::Cancelled` is returned instead of the last operation error.
/// When every attempt fails, only the final error is kept.
///
/// # Arguments
///
/// * `cancel` - Token observed while waiting between attempts
/// * `max_attempts` - Total number of attempts, must be at least 1
/// * `delay` - Fixed pause after a failed attempt that is not the last
/// * `operation` - Produces a fresh future for every attempt
pub async fn with_retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    max_attempts: usize,
    delay: Duration,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    if max_attempts == 0 {
        return Err(RetryError::InvalidArgument(format!(
            "max_attempts must be positive, got {}",
            max_attempts
        )));
    }

    let mut attempt = 0;
    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts {
            return Err(RetryError::RetryExhausted {
                attempts: max_attempts,
                source: err,
            });
        }

        debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying after delay"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
