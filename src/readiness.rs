//! Wait for the platform to come up by polling it with exponential backoff.
//!
//! The operation is retried until it succeeds or the timeout has elapsed,
//! so a slow platform start is tolerated but the wait is always bounded.

use log::{info, warn};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug)]
#[error("{operation} did not succeed within {timeout:?} ({attempts} attempts), last error: {last_error}")]
pub struct Timeout {
    pub operation: String,
    pub timeout: Duration,
    pub attempts: u32,
    pub last_error: String,
}

/// Why waiting stopped without a result.
#[derive(Debug)]
pub enum Error<E> {
    /// Every attempt failed with a retryable error until the deadline.
    Timeout(Timeout),
    /// The operation failed in a way retrying will not fix; its error is passed through.
    Permanent(E),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Ceiling for the delay between attempts
    pub max_delay: Duration,
    /// Give up once this much time has passed since the first attempt
    pub timeout: Duration,
}

impl From<&crate::config::Readiness> for Config {
    fn from(cfg: &crate::config::Readiness) -> Self {
        Self {
            initial_delay: cfg.initial_delay(),
            max_delay: cfg.max_delay(),
            timeout: cfg.timeout(),
        }
    }
}

/// Run `operation` until it returns `Ok`, doubling the delay after each failure.
///
/// Failures for which `retryable` returns false end the wait at once with
/// [Error::Permanent]. Retryable failures continue until the next attempt
/// would start after the timeout, which yields [Error::Timeout].
pub async fn wait_for<F, Fut, T, E, R>(
    config: &Config,
    operation_name: &str,
    retryable: R,
    mut operation: F,
) -> Result<T, Error<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!("{operation_name} succeeded after {attempt} attempts");
                }
                return Ok(result);
            }
            Err(err) => {
                if !retryable(&err) {
                    return Err(Error::Permanent(err));
                }
                if start.elapsed().saturating_add(delay) > config.timeout {
                    return Err(Error::Timeout(Timeout {
                        operation: operation_name.to_string(),
                        timeout: config.timeout,
                        attempts: attempt,
                        last_error: err.to_string(),
                    }));
                }

                warn!("{operation_name} failed (attempt {attempt}): {err}; retrying in {delay:?}");
                tokio::time::sleep(delay).await;

                delay = delay.saturating_mul(2).min(config.max_delay);
            }
        }
    }
}
