//! Validation primitives.
//!
//! Every check in the harness funnels through these helpers so that success
//! and failure always log the same way: a match logs at info, a mismatch
//! logs expected and observed at error before the error is raised. The
//! `*_with_retry` variants poll a closure until the value converges or the
//! window closes, then raise a timeout carrying the last observed value.

use std::fmt::Display;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info};

use crate::error::{PtpError, PtpResult};

/// Fail unless `observed == expected`.
pub fn validate_equals<T: PartialEq + Display>(
    observed: &T,
    expected: &T,
    description: &str,
) -> PtpResult<()> {
    if observed == expected {
        info!("Validation Successful - {description}: {observed}");
        Ok(())
    } else {
        error!("Validation Failed - {description}: expected {expected}, observed {observed}");
        Err(PtpError::Validation {
            description: description.to_string(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        })
    }
}

/// Fail unless `observed` contains `expected` as a substring.
pub fn validate_str_contains(observed: &str, expected: &str, description: &str) -> PtpResult<()> {
    if observed.contains(expected) {
        info!("Validation Successful - {description}: found '{expected}'");
        Ok(())
    } else {
        error!("Validation Failed - {description}: expected to contain '{expected}', observed '{observed}'");
        Err(PtpError::Validation {
            description: description.to_string(),
            expected: format!("contains '{expected}'"),
            observed: observed.to_string(),
        })
    }
}

/// Fail unless `observed` is one of `expected`.
pub fn validate_in_list<T: PartialEq + Display>(
    observed: &T,
    expected: &[T],
    description: &str,
) -> PtpResult<()> {
    if expected.contains(observed) {
        info!("Validation Successful - {description}: {observed}");
        Ok(())
    } else {
        let expected_text = expected
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        error!(
            "Validation Failed - {description}: expected one of [{expected_text}], observed {observed}"
        );
        Err(PtpError::Validation {
            description: description.to_string(),
            expected: format!("one of [{expected_text}]"),
            observed: observed.to_string(),
        })
    }
}

/// Poll `observe` until it returns `expected` or the window closes.
///
/// Observation errors (a command failing mid-convergence) are logged and
/// treated as a non-match; the last observed value or error text ends up in
/// the timeout error.
pub fn validate_equals_with_retry<T, F>(
    mut observe: F,
    expected: &T,
    description: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> PtpResult<()>
where
    T: PartialEq + Display,
    F: FnMut() -> PtpResult<T>,
{
    let end_time = Instant::now() + timeout;
    let mut last_observed = String::from("<no observation>");
    loop {
        match observe() {
            Ok(observed) => {
                if &observed == expected {
                    info!("Validation Successful - {description}: {observed}");
                    return Ok(());
                }
                info!("{description}: observed {observed}, waiting for {expected}");
                last_observed = observed.to_string();
            }
            Err(e) => {
                info!("{description}: observation failed ({e}), retrying");
                last_observed = e.to_string();
            }
        }
        if Instant::now() >= end_time {
            error!("Timed out waiting for {description}: expected {expected}, last observed {last_observed}");
            return Err(PtpError::Timeout {
                description: description.to_string(),
                expected: expected.to_string(),
                observed: last_observed,
                timeout_secs: timeout.as_secs(),
            });
        }
        thread::sleep(poll_interval);
    }
}

/// Poll `check` until it succeeds or the window closes. Only validation
/// failures and timeouts are retried; structural errors (parse, config)
/// abort immediately.
pub fn retry_until_ok<F>(
    mut check: F,
    description: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> PtpResult<()>
where
    F: FnMut() -> PtpResult<()>,
{
    let end_time = Instant::now() + timeout;
    let mut last_failure = String::from("<no attempt>");
    loop {
        match check() {
            Ok(()) => {
                info!("Validation Successful - {description}");
                return Ok(());
            }
            Err(e) if e.is_validation_failure() => {
                info!("{description}: not yet satisfied ({e}), retrying");
                last_failure = e.to_string();
            }
            Err(e) => return Err(e),
        }
        if Instant::now() >= end_time {
            error!("Timed out waiting for {description}: {last_failure}");
            return Err(PtpError::Timeout {
                description: description.to_string(),
                expected: "all checks passing".to_string(),
                observed: last_failure,
                timeout_secs: timeout.as_secs(),
            });
        }
        thread::sleep(poll_interval);
    }
}
