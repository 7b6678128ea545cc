//! Retry policy for bundle file transfers.
//!
//! A downloader retries each failing file on its own; only a file that is
//! still failing after the last attempt is reported through the error
//! callback.
//!
//! # Example
//!
//! ```ignore
//! use bundlepatch::retry::RetryPolicy;
//!
//! // Three retries after the first attempt, one second apart
//! let policy = RetryPolicy::for_files(3);
//! assert_eq!(policy.max_attempts(), 4);
//! ```

use std::time::Duration;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default delay between attempts of the same file (1 second).
pub const DEFAULT_FILE_RETRY_DELAY_MS: u64 = 1_000;

/// How a single file transfer handles transient failures.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,

    /// Constant delay between attempts.
    Fixed {
        /// Maximum number of attempts, including the first one.
        max_attempts: u32,
        /// Delay before each retry.
        delay: Duration,
    },
}

impl RetryPolicy {
    /// Policy used by downloaders for `max_retry` retries per file.
    ///
    /// A `max_retry` of zero means a single attempt.
    pub fn for_files(max_retry: u32) -> Self {
        if max_retry == 0 {
            return Self::None;
        }
        Self::Fixed {
            max_attempts: max_retry.saturating_add(1),
            delay: Duration::from_millis(DEFAULT_FILE_RETRY_DELAY_MS),
        }
    }

    /// Replaces the delay of a fixed policy. `None` is unchanged.
    pub fn with_delay(self, delay: Duration) -> Self {
        match self {
            Self::Fixed { max_attempts, .. } => Self::Fixed {
                max_attempts,
                delay,
            },
            other => other,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// attempts are used up.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
        }
    }

    /// Maximum number of attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_retries_is_single_attempt() {
        let policy = RetryPolicy::for_files(0);
        assert_eq!(policy, RetryPolicy::None);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_for_attempt(1), None);
    }

    #[test]
    fn test_file_policy_counts_first_attempt() {
        let policy = RetryPolicy::for_files(3);
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.delay_for_attempt(3).is_some());
        assert!(policy.delay_for_attempt(4).is_none());
    }

    #[test]
    fn test_with_delay_overrides_fixed() {
        let policy = RetryPolicy::for_files(2).with_delay(Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::ZERO));
        assert_eq!(RetryPolicy::None.with_delay(Duration::ZERO), RetryPolicy::None);
    }
}
