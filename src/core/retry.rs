//! Retry utility for handling transient errors in async operations
//!
//! Provides configurable retry policies with fixed or exponential backoff,
//! an optional attempt limit (unlimited when `None`) and a per-failure
//! callback that can log context or abort further attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Backoff strategy applied between failed attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Always wait the same delay
    Fixed(Duration),
    /// Start at `initial`, multiply by `multiplier` per attempt, never exceed `max`
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = attempt.saturating_sub(1).min(63) as i32;
                let scaled = initial.as_secs_f64() * multiplier.max(1.0).powi(exponent);
                if !scaled.is_finite() || scaled >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

/// Configurable retry policy for async operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts; `None` retries until success or abort
    pub max_attempts: Option<usize>,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            backoff: Backoff::Fixed(Duration::from_millis(500)),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries forever with a fixed delay
    pub fn unlimited(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Policy with a bounded attempt count and a fixed delay
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            backoff: Backoff::Fixed(delay),
        }
    }

    fn allows_another(&self, attempts_made: usize) -> bool {
        match self.max_attempts {
            Some(max) => attempts_made < max,
            None => true,
        }
    }
}

/// TOML-facing description of a retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// 0 means unlimited
    pub max_attempts: usize,
    pub backoff: BackoffKind,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Fixed,
            delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: usize, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Fixed,
            delay_ms,
            ..Self::default()
        }
    }

    pub fn exponential(max_attempts: usize, delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Exponential,
            delay_ms,
            max_delay_ms,
            ..Self::default()
        }
    }

    /// Convert into the runtime policy
    pub fn to_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(delay),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: delay,
                max: Duration::from_millis(self.max_delay_ms.max(self.delay_ms)),
                multiplier: self.multiplier,
            },
        };
        RetryPolicy {
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            backoff,
        }
    }
}

/// Execute an async operation with retry logic for transient errors
///
/// # Examples
/// ```rust
/// use partq::core::retry::{retry_async, RetryPolicy};
///
/// # async fn example() -> Result<String, String> {
/// let result = retry_async(
///     "store_connection",
///     &RetryPolicy::default(),
///     || async {
///         Ok::<String, String>("success".to_string())
///     }
/// ).await?;
/// # Ok(result)
/// # }
/// ```
pub async fn retry_async<F, T, E, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_async_with(operation_name, policy, operation, |_, _| true).await
}

/// Execute an async operation with retry logic, calling `on_failure` after
/// every failed attempt with the attempt number (1-based) and the error.
///
/// Returning `false` from `on_failure` stops retrying and surfaces that error.
pub async fn retry_async_with<F, T, E, Fut, C>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
    mut on_failure: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: FnMut(usize, &E) -> bool,
{
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                let keep_going = on_failure(attempt, &error);
                if !keep_going || !policy.allows_another(attempt) {
                    return Err(error);
                }
                let delay = policy.backoff.delay_for(attempt);
                log::debug!(
                    "Operation '{}' failed on attempt {}{}, retrying in {:?}: {}",
                    operation_name,
                    attempt,
                    policy
                        .max_attempts
                        .map(|max| format!("/{}", max))
                        .unwrap_or_default(),
                    delay,
                    error
                );
                sleep(delay).await;
            }
        }
    }
}
