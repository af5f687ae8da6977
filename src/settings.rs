//! Harness tuning settings.
//!
//! Timeouts and poll intervals for the convergence waiters, loaded through
//! the `config` crate with layered defaults. An optional `ptp_harness.toml`
//! next to the working directory and `PTP_HARNESS_*` environment variables
//! can override any value; everything has a default matching the lab's
//! observed convergence behavior, so a plain `Settings::load()` works with
//! no files present.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::PtpResult;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Default window for single-value convergence waits, seconds.
    pub default_timeout_secs: u64,
    /// Default poll interval for single-value convergence waits, seconds.
    pub default_poll_interval_secs: u64,
    /// Window for the terminal "no alarms on the system" wait, seconds.
    pub no_alarm_timeout_secs: u64,
    /// Window for alarm appear/clear waits, seconds.
    pub alarm_timeout_secs: u64,
    /// Poll interval for alarm waits, seconds.
    pub alarm_poll_interval_secs: u64,
    /// Window for the readiness waiters (port state, clock class), seconds.
    pub readiness_timeout_secs: u64,
    /// Poll interval for the readiness waiters, seconds.
    pub readiness_poll_interval_secs: u64,
    /// Window for CGU convergence after GNSS power-on, seconds.
    pub gnss_power_on_timeout_secs: u64,
    /// Window for CGU convergence after GNSS power-off, seconds.
    pub gnss_power_off_timeout_secs: u64,
    /// Poll interval for GNSS CGU convergence, seconds.
    pub cgu_poll_interval_secs: u64,
    /// Window for CGU convergence after an SMA pin flip, seconds.
    pub sma_timeout_secs: u64,
    /// Poll interval for SMA CGU convergence, seconds.
    pub sma_poll_interval_secs: u64,
    /// Settle time after stopping a systemd service, seconds.
    pub service_stop_settle_secs: u64,
    /// Maximum age for a "recently started" service status check, seconds.
    pub service_recency_secs: i64,
}

impl Settings {
    /// Load settings with defaults, an optional `ptp_harness.toml` overlay
    /// and `PTP_HARNESS_*` environment overrides.
    pub fn load() -> PtpResult<Self> {
        let settings = Config::builder()
            .set_default("default_timeout_secs", 60)?
            .set_default("default_poll_interval_secs", 5)?
            .set_default("no_alarm_timeout_secs", 300)?
            .set_default("alarm_timeout_secs", 300)?
            .set_default("alarm_poll_interval_secs", 30)?
            .set_default("readiness_timeout_secs", 120)?
            .set_default("readiness_poll_interval_secs", 30)?
            .set_default("gnss_power_on_timeout_secs", 1200)?
            .set_default("gnss_power_off_timeout_secs", 1500)?
            .set_default("cgu_poll_interval_secs", 120)?
            .set_default("sma_timeout_secs", 800)?
            .set_default("sma_poll_interval_secs", 60)?
            .set_default("service_stop_settle_secs", 10)?
            .set_default("service_recency_secs", 180)?
            .add_source(File::with_name("ptp_harness").required(false))
            .add_source(Environment::with_prefix("PTP_HARNESS"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            default_poll_interval_secs: 5,
            no_alarm_timeout_secs: 300,
            alarm_timeout_secs: 300,
            alarm_poll_interval_secs: 30,
            readiness_timeout_secs: 120,
            readiness_poll_interval_secs: 30,
            gnss_power_on_timeout_secs: 1200,
            gnss_power_off_timeout_secs: 1500,
            cgu_poll_interval_secs: 120,
            sma_timeout_secs: 800,
            sma_poll_interval_secs: 60,
            service_stop_settle_secs: 10,
            service_recency_secs: 180,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_load() {
        let loaded = Settings::load().unwrap();
        let defaults = Settings::default();
        assert_eq!(loaded.no_alarm_timeout_secs, defaults.no_alarm_timeout_secs);
        assert_eq!(
            loaded.gnss_power_on_timeout_secs,
            defaults.gnss_power_on_timeout_secs
        );
        assert_eq!(loaded.cgu_poll_interval_secs, 120);
    }
}
