//! Custom error types for the harness.
//!
//! This module defines the primary error type, `PtpError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures a
//! hardware-in-the-loop run can produce.
//!
//! ## Error Hierarchy
//!
//! `PtpError` is an enum that consolidates the failure classes:
//!
//! - **`Config`**: Semantic errors in the lab or PTP topology configuration,
//!   such as a host or NIC that a template or scenario refers to but the lab
//!   configuration does not define.
//! - **`Settings`**: Wraps errors from the `config` crate while loading the
//!   harness tuning settings (timeouts, poll intervals).
//! - **`Template`**: A setup template referenced an undefined token, or the
//!   rendered text was not valid JSON5.
//! - **`Parse`**: CLI output (pmc, CGU sysfs dump, systemctl, fm) was missing
//!   an expected key or did not match the expected line format.
//! - **`Validation`**: An observed value did not match the expected value.
//!   Both sides are embedded in the message so the failure is diagnosable
//!   without a re-run.
//! - **`Timeout`**: A convergence wait exhausted its poll window. Carries the
//!   validation description, the expected value and the last observed value.
//! - **`Precondition`**: A keyword was invoked with inputs it cannot act on
//!   (missing interface mapping, an operation status that does not apply to
//!   the operation type, ...).
//! - **`Io`**: File system errors while reading templates or configs.
//!
//! All of these propagate unhandled to the caller; there is no internal
//! recovery beyond the explicit `*_with_retry` polling primitives.

use thiserror::Error;

/// Convenience alias for results using the harness error type.
pub type PtpResult<T> = std::result::Result<T, PtpError>;

#[derive(Error, Debug)]
pub enum PtpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation failed - {description}: expected {expected}, observed {observed}")]
    Validation {
        description: String,
        expected: String,
        observed: String,
    },

    #[error(
        "Timed out after {timeout_secs}s - {description}: expected {expected}, \
         last observed {observed}"
    )]
    Timeout {
        description: String,
        expected: String,
        observed: String,
        timeout_secs: u64,
    },

    #[error("Precondition error: {0}")]
    Precondition(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PtpError {
    /// True for a value mismatch or a convergence timeout, as opposed to a
    /// structural problem (parse/config/template). The retry primitives only
    /// keep polling through these.
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, PtpError::Validation { .. } | PtpError::Timeout { .. })
    }
}
