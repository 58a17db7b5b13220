//! Retry-until-expected-output for bulk transfers.
//!
//! Every transfer (workflow upload, target upload, result download) goes
//! through `retry_with_expected_substring`: the command is considered
//! successful only when its output contains a marker (rsync prints
//! `bytes/sec` in its summary line), regardless of exit status. A booting
//! SSH daemon or a dropped connection is absorbed here.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ScanError;
use crate::infrastructure::runner::CommandRunner;
use crate::types::config::RetrySettings;


/// Fixed-delay retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Whether another attempt may follow `attempts` completed ones.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// Default: 10 attempts, 10 seconds apart.
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy::new(settings.max_attempts, settings.delay)
    }
}


/// Run `command` until its output contains `expected`.
///
/// Returns the matching output. Fails with `TransferFailed` after exactly
/// `policy.max_attempts` attempts; the delay is only applied between
/// attempts.
pub fn retry_with_expected_substring(
    runner: &dyn CommandRunner,
    command: &str,
    expected: &str,
    policy: &RetryPolicy,
) -> Result<String, ScanError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let output = match runner.run(command) {
            Ok(out) => out,
            Err(out) => out,
        };
        if output.contains(expected) {
            debug!(attempts, "transfer succeeded");
            return Ok(output);
        }
        if !policy.should_retry(attempts) {
            break;
        }
        warn!(
            attempt = attempts,
            max_attempts = policy.max_attempts,
            "transfer output missing '{}', retrying",
            expected
        );
        if !policy.delay.is_zero() {
            thread::sleep(policy.delay);
        }
    }
    Err(ScanError::TransferFailed {
        command: command.to_string(),
        attempts,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runner::MockRunner;

    fn policy(n: u32) -> RetryPolicy {
        RetryPolicy::new(n, Duration::ZERO)
    }

    #[test]
    fn succeeds_on_first_match() {
        let runner = MockRunner::new().on("rsync", Ok("sent 1 bytes  1.00 bytes/sec".into()));
        let out = retry_with_expected_substring(&runner, "rsync a b", "bytes/sec", &policy(10)).unwrap();
        assert!(out.contains("bytes/sec"));
        assert_eq!(runner.executed_commands().len(), 1);
    }

    #[test]
    fn fails_after_exactly_max_attempts() {
        for max in [1, 3, 10] {
            let runner = MockRunner::new().on("rsync", Err("connection refused".into()));
            let err = retry_with_expected_substring(&runner, "rsync a b", "bytes/sec", &policy(max))
                .unwrap_err();
            assert!(matches!(err, ScanError::TransferFailed { attempts, .. } if attempts == max));
            assert_eq!(runner.executed_commands().len(), max as usize);
        }
    }

    #[test]
    fn recovers_after_transient_failures() {
        let runner = MockRunner::new()
            .on_times("rsync", Err("ssh: connect to host: Connection refused".into()), 3)
            .on("rsync", Ok("total 10 bytes/sec".into()));
        retry_with_expected_substring(&runner, "rsync a b", "bytes/sec", &policy(10)).unwrap();
        assert_eq!(runner.executed_commands().len(), 4);
    }

    #[test]
    fn expected_text_in_error_output_counts() {
        let runner = MockRunner::new().on("rsync", Err("rsync warning: some files vanished\n 12 bytes/sec".into()));
        assert!(retry_with_expected_substring(&runner, "rsync a b", "bytes/sec", &policy(2)).is_ok());
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 10);
        assert!(p.should_retry(9));
        assert!(!p.should_retry(10));
    }
}
