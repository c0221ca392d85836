//! RetryExecutor: exponential backoff with jitter, rate-limit-aware
//! `Retry-After` override, and per-error-class policy configuration.
//!
//! This wraps a single TagTask attempt or a single network operation within a
//! copy. It is deliberately error-type-agnostic: callers classify their own
//! errors into [`freightliner_types::ErrorClass`] and hand the executor a
//! closure; the executor only owns the backoff math and the sleep loop.

use std::time::Duration;

use freightliner_types::ErrorClass;
use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately.
    Immediate,
    /// Exponential backoff: `base_delay * 2^attempt` (the default strategy).
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt.
    Linear,
    /// Constant delay: same delay every attempt.
    Constant,
}

/// Predefined retry policies. `Default` uses `base_delay=1s, max_delay=30s,
/// max_attempts=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    Default,
    Aggressive,
    Conservative,
    Custom,
}

impl RetryPolicy {
    pub fn to_config(self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                jitter: 0.2,
            },
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 8,
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 2,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    #[serde(default)]
    pub strategy: RetryStrategyType,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Jitter factor (0.0 = no jitter, 1.0 = full jitter). The default policy uses ±20%.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyType::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Per-error-class retry configuration, keyed by the engine's error taxonomy
/// rather than a bespoke three-way classification: only classes where
/// [`ErrorClass::is_retryable`] holds are ever consulted by [`RetryExecutor`],
/// but callers may still override any class's policy (e.g. to disable retry
/// for `RateLimited` under a strict rate budget).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerErrorConfig {
    #[serde(default)]
    pub destination_unreachable: Option<RetryStrategyConfig>,
    #[serde(default)]
    pub rate_limited: Option<RetryStrategyConfig>,
}

/// Calculate the delay before the next retry attempt (1-indexed `attempt`).
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Calculate the delay the way rate-limit awareness requires: a
/// `Retry-After` value (when present, e.g. from a 429 response) overrides the
/// computed backoff for that attempt, itself still bounded by `max_delay`.
pub fn calculate_delay_with_retry_after(
    config: &RetryStrategyConfig,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    match retry_after {
        Some(d) => d.min(config.max_delay),
        None => calculate_delay(config, attempt),
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::rng();
    let random_value: f64 = rng.random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Resolve the retry configuration for a given error class, falling back to
/// `default_config` when no per-class override is present.
pub fn config_for_error(
    default_config: &RetryStrategyConfig,
    per_error: Option<&PerErrorConfig>,
    error_class: ErrorClass,
) -> RetryStrategyConfig {
    if let Some(per_error) = per_error {
        match error_class {
            ErrorClass::DestinationUnreachable => {
                if let Some(c) = &per_error.destination_unreachable {
                    return c.clone();
                }
            }
            ErrorClass::RateLimited => {
                if let Some(c) = &per_error.rate_limited {
                    return c.clone();
                }
            }
            _ => {}
        }
    }
    default_config.clone()
}

/// Outcome of a single attempt, as seen by [`RetryExecutor::run`].
pub enum AttemptError<E> {
    /// Non-retryable (canceled, digest mismatch, unsupported
    /// media type, 4xx other than 429): return immediately.
    Terminal(E),
    /// Retryable (429, 5xx, timeout, connection reset): sleep
    /// and retry if attempts remain. Carries an optional `Retry-After` value.
    Retryable { error: E, retry_after: Option<Duration> },
}

/// Wraps a single TagTask or network operation with the bounded retry policy
/// of the retry loop.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Execute a fallible operation. The closure receives the 1-indexed
    /// attempt number and classifies its own failure as [`AttemptError::Terminal`]
    /// or [`AttemptError::Retryable`]. Returns the last error once attempts are
    /// exhausted or a terminal error is produced.
    pub fn run<T, E, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, AttemptError<E>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(AttemptError::Terminal(e)) => return Err(e),
                Err(AttemptError::Retryable { error, retry_after }) => {
                    if attempt >= self.config.max_attempts {
                        return Err(error);
                    }
                    let delay =
                        calculate_delay_with_retry_after(&self.config, attempt, retry_after);
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
