//! systemd service control and status validation.
//!
//! The linuxptp daemons run as templated units (`ptp4l@ptp1.service`,
//! `phc2sys@phc1.service`, `ts2phc@ts1.service`). This module wraps
//! `systemctl start/stop/restart/status`, parses the per-unit status blocks
//! and validates three things the timing tests care about: the unit is
//! `active (running)`, the daemon command line carries the expected
//! `cmdline_opts`, and a state change happened recently enough to belong to
//! the operation under test.

use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::connection::SharedConnection;
use crate::error::{PtpError, PtpResult};
use crate::validation::{validate_equals, validate_str_contains};

static UNIT_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(\S+)@(\S+)\.service").unwrap()
});
static SINCE_AGO_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"since (.+? UTC);\s+(\d+)(s|min|h) ago").unwrap()
});
static CGROUP_PROCESS_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"└─\d+\s+(.*)").unwrap()
});

/// One unit block of `systemctl status` output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceStatus {
    /// Template name (`ptp4l`).
    pub service: String,
    /// Instance name (`ptp1`).
    pub instance: String,
    /// The full `Active:` value, timestamp included.
    pub active: String,
    /// The daemon command line from the CGroup section, if running.
    pub command: String,
}

/// Parse `systemctl status` output into per-unit blocks. Blocks open at the
/// `<service>@<instance>.service` header lines.
pub fn parse_systemctl_status(lines: &[String]) -> Vec<ServiceStatus> {
    let mut statuses: Vec<ServiceStatus> = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with('●') || trimmed.starts_with("x ") || trimmed.starts_with("* ") {
            if let Some(caps) = UNIT_HEADER_RE.captures(trimmed) {
                statuses.push(ServiceStatus {
                    service: caps[1].trim_start_matches('●').trim().to_string(),
                    instance: caps[2].to_string(),
                    ..Default::default()
                });
                continue;
            }
        }
        let Some(current) = statuses.last_mut() else {
            continue;
        };
        if let Some(rest) = trimmed.strip_prefix("Active:") {
            current.active = rest.trim().to_string();
        } else if let Some(caps) = CGROUP_PROCESS_RE.captures(trimmed) {
            current.command = caps[1].trim().to_string();
        }
    }
    statuses
}

/// `true` when the `since ...; N<unit> ago` part of an `Active:` line is
/// within `threshold_secs`. The timestamp is validated for format; the age
/// comes from the `ago` suffix.
pub fn is_service_event_recent(status_line: &str, threshold_secs: i64) -> PtpResult<bool> {
    let caps = SINCE_AGO_RE.captures(status_line).ok_or_else(|| {
        PtpError::Parse(format!("could not parse systemctl status line: {status_line}"))
    })?;
    let timestamp = caps[1].trim();
    NaiveDateTime::parse_from_str(timestamp, "%a %Y-%m-%d %H:%M:%S UTC")
        .map_err(|_| PtpError::Parse(format!("could not parse timestamp: {timestamp}")))?;
    let value: i64 = caps[2]
        .parse()
        .map_err(|_| PtpError::Parse(format!("bad age value in: {status_line}")))?;
    let age_secs = match &caps[3] {
        "s" => value,
        "min" => value * 60,
        "h" => value * 3600,
        other => return Err(PtpError::Parse(format!("unsupported time unit: {other}"))),
    };
    Ok(age_secs <= threshold_secs)
}

/// systemctl runner bound to one host session.
pub struct ServiceKeywords {
    connection: SharedConnection,
}

impl ServiceKeywords {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }

    fn unit(service: &str, instance: &str) -> String {
        format!("{service}@{instance}.service")
    }

    pub fn start(&self, service: &str, instance: &str) -> PtpResult<()> {
        let unit = Self::unit(service, instance);
        info!("Starting {unit}");
        self.connection
            .borrow_mut()
            .send_as_sudo(&format!("systemctl start {unit}"))?;
        Ok(())
    }

    /// Stop the unit, then give the daemon's peers time to notice before
    /// any verification runs.
    pub fn stop(&self, service: &str, instance: &str, settle: Duration) -> PtpResult<()> {
        let unit = Self::unit(service, instance);
        info!("Stopping {unit}");
        self.connection
            .borrow_mut()
            .send_as_sudo(&format!("systemctl stop {unit}"))?;
        thread::sleep(settle);
        Ok(())
    }

    pub fn restart(&self, service: &str, instance: &str) -> PtpResult<()> {
        let unit = Self::unit(service, instance);
        info!("Restarting {unit}");
        self.connection
            .borrow_mut()
            .send_as_sudo(&format!("systemctl restart {unit}"))?;
        Ok(())
    }

    pub fn status(&self, service: &str, instance: &str) -> PtpResult<Vec<ServiceStatus>> {
        let unit = Self::unit(service, instance);
        let output = self
            .connection
            .borrow_mut()
            .send(&format!("systemctl status {unit} --no-pager"))?;
        Ok(parse_systemctl_status(&output))
    }

    fn status_for_instance(&self, service: &str, instance: &str) -> PtpResult<ServiceStatus> {
        let statuses = self.status(service, instance)?;
        statuses
            .into_iter()
            .find(|s| s.instance == instance)
            .ok_or_else(|| {
                PtpError::Parse(format!(
                    "no status block for {service}@{instance}.service in systemctl output"
                ))
            })
    }

    /// Fail unless the unit is `active (running)`.
    pub fn verify_running(&self, service: &str, instance: &str) -> PtpResult<()> {
        let status = self.status_for_instance(service, instance)?;
        validate_str_contains(
            &status.active,
            "active (running)",
            &format!("systemctl status {service}@{instance}.service"),
        )
    }

    /// Fail unless the unit is running and its daemon command line carries
    /// the options from a `cmdline_opts='...'` instance parameter.
    pub fn verify_running_with_parameters(
        &self,
        service: &str,
        instance: &str,
        instance_parameters: &str,
    ) -> PtpResult<()> {
        let status = self.status_for_instance(service, instance)?;
        validate_str_contains(
            &status.active,
            "active (running)",
            &format!("systemctl status {service}@{instance}.service"),
        )?;
        let opts = extract_cmdline_opts(instance_parameters)?;
        validate_str_contains(
            &status.command,
            &opts,
            &format!("{service}@{instance}.service command line"),
        )
    }

    /// Fail unless the unit is in `expected_status` and its most recent
    /// state change is within `threshold_secs`.
    pub fn verify_status_and_recent_event(
        &self,
        service: &str,
        instance: &str,
        threshold_secs: i64,
        expected_status: &str,
    ) -> PtpResult<()> {
        let status = self.status_for_instance(service, instance)?;
        let recent = is_service_event_recent(&status.active, threshold_secs)?;
        validate_equals(&recent, &true, "service event recency check")?;
        validate_str_contains(
            &status.active,
            expected_status,
            &format!("systemctl status {service}@{instance}.service"),
        )
    }
}

/// The quoted option string of a `cmdline_opts='-s enp81s0f2 -O -37 -m'`
/// instance parameter.
pub fn extract_cmdline_opts(instance_parameters: &str) -> PtpResult<String> {
    let (_, raw) = instance_parameters.split_once('=').ok_or_else(|| {
        PtpError::Parse(format!("no '=' in instance parameters: {instance_parameters}"))
    })?;
    Ok(raw.trim().trim_matches('\'').trim_matches('"').to_string())
}
