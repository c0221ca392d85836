//! Glue between [`crate::error::FreightlinerError`]'s classification and the
//! error-type-agnostic [`freightliner_retry::RetryExecutor`]: a retryable
//! error is retried with backoff, a terminal error is returned immediately.

use freightliner_retry::{AttemptError, RetryExecutor};

use crate::cancellation::CancellationToken;
use crate::error::FreightlinerError;

/// Run `op` under `retry`, converting [`FreightlinerError::class`] into the
/// [`AttemptError`] the executor expects. Checked for cancellation before
/// every attempt, including the first, so a cancel observed between
/// submission and execution short-circuits without ever calling `op`.
pub fn retry_op<T>(
    retry: &RetryExecutor,
    cancel: &CancellationToken,
    mut op: impl FnMut() -> Result<T, FreightlinerError>,
) -> Result<T, FreightlinerError> {
    retry.run(|_attempt| {
        if cancel.is_cancelled() {
            return Err(AttemptError::Terminal(FreightlinerError::Canceled));
        }
        match op() {
            Ok(v) => Ok(v),
            Err(e) if e.class().is_retryable() => {
                let retry_after = match &e {
                    FreightlinerError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                Err(AttemptError::Retryable { error: e, retry_after })
            }
            Err(e) => Err(AttemptError::Terminal(e)),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use freightliner_retry::{RetryStrategyConfig, RetryStrategyType};

    use super::*;

    fn immediate_executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        })
    }

    #[test]
    fn retries_destination_unreachable_until_success() {
        let retry = immediate_executor(5);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result = retry_op(&retry, &cancel, || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FreightlinerError::DestinationUnreachable("boom".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn terminal_error_never_retries() {
        let retry = immediate_executor(5);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), FreightlinerError> = retry_op(&retry, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FreightlinerError::IntegrityFailure("mismatch".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_short_circuits_before_first_attempt() {
        let retry = immediate_executor(5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<(), FreightlinerError> = retry_op(&retry, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(matches!(result, Err(FreightlinerError::Canceled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
