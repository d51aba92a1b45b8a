//! Bounded retry for transient secret service transport failures.
//!
//! Secret retrieval over the session bus occasionally fails with transport
//! errors unrelated to the queried items. Such a failure invalidates the
//! whole result set: the caller must drop its connection and run the search
//! again from scratch. Three attempts total; any other error is terminal on
//! first sight.

use tracing::debug;

use crate::error::{Result, StoreError};

/// Total attempts for a retryable search, counting the first one.
pub const MAX_SEARCH_ATTEMPTS: u32 = 3;

/// Run `op` until it returns anything other than
/// [`StoreError::TransientTransport`], up to `max_attempts` runs.
///
/// `op` receives the 1-based attempt number and must re-acquire any session
/// state itself on each run. Exhausting every attempt reports
/// [`StoreError::ExhaustedRetries`].
pub fn with_transient_retry<T, F>(max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt) {
            Err(StoreError::TransientTransport(detail)) if attempt < max_attempts => {
                debug!(attempt, %detail, "transient transport failure, retrying search");
            }
            Err(StoreError::TransientTransport(_)) => {
                return Err(StoreError::ExhaustedRetries {
                    attempts: max_attempts,
                });
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> StoreError {
        StoreError::TransientTransport("connection reset".to_string())
    }

    #[test]
    fn test_first_attempt_success() {
        let mut calls = 0;
        let result = with_transient_retry(MAX_SEARCH_ATTEMPTS, |_| {
            calls += 1;
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_two_failures_then_success() {
        let mut calls = 0;
        let result = with_transient_retry(MAX_SEARCH_ATTEMPTS, |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(transient())
            } else {
                Ok("entries")
            }
        });
        assert_eq!(result.unwrap(), "entries");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_exhaustion_reports_retry_count() {
        let mut calls = 0;
        let result: Result<()> = with_transient_retry(MAX_SEARCH_ATTEMPTS, |_| {
            calls += 1;
            Err(transient())
        });
        match result {
            Err(StoreError::ExhaustedRetries { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_terminal_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = with_transient_retry(MAX_SEARCH_ATTEMPTS, |_| {
            calls += 1;
            Err(StoreError::Backend("permission denied".to_string()))
        });
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_namespace_not_found_passes_through() {
        let result: Result<()> = with_transient_retry(MAX_SEARCH_ATTEMPTS, |_| {
            Err(StoreError::NamespaceNotFound {
                namespace: "aws".to_string(),
            })
        });
        assert!(matches!(result, Err(StoreError::NamespaceNotFound { .. })));
    }
}
