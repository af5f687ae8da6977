//! CGU/DPLL state parsing and lock validation.
//!
//! The ice driver exposes the Clock Generation Unit of a timing NIC at
//! `/sys/kernel/debug/ice/<pci>/cgu`. The dump starts with the chip header,
//! then a table of clock inputs, then the EEC and PPS DPLL sections:
//!
//! ```text
//! Found ZL80032 CGU
//! DPLL Config ver: 1.3.0.1
//! DPLL FW ver: 4513
//! CGU Input status:
//!                |            | priority |            |
//!       input (idx) |      state | EEC | PPS | ESync fail |
//!  ----------------------------------------------------------------
//!   CVL-SDP22 (0) |    invalid |   8 |   8 |        N/A |
//!   GNSS-1PPS (5) |      valid |   0 |   0 |        N/A |
//! EEC DPLL:
//!         Current reference:      GNSS-1PPS
//!         Status:         locked_ho_acq
//! PPS DPLL:
//!         Current reference:      GNSS-1PPS
//!         Status:         locked_ho_acq
//!         Phase offset [ps]:      -841
//! ```
//!
//! A healthy clock chain needs all of it: the expected input `valid`, both
//! DPLLs on the expected reference, both statuses locked. Validation checks
//! all five conditions and reports every observed value on failure.

use std::time::Duration;

use log::{error, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::connection::SharedConnection;
use crate::error::{PtpError, PtpResult};

static CHIP_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"Found (\S+) CGU").unwrap()
});
static INPUT_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^\s*(\S+)\s*\((\d+)\)\s*\|\s*(\S+)\s*\|\s*(\d+)\s*\|\s*(\d+)\s*\|\s*(N/A|\S+)\s*\|").unwrap()
});
static CURRENT_REF_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"Current reference:\s*(.*)").unwrap()
});
static STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"Status:\s*(.*)").unwrap()
});
static PHASE_OFFSET_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"Phase offset \[ps]:\s*(.*)").unwrap()
});

/// One row of the CGU input table.
#[derive(Debug, Clone, PartialEq)]
pub struct CguInput {
    pub name: String,
    pub index: u32,
    pub state: String,
    pub eec_priority: u32,
    pub pps_priority: u32,
    pub esync_fail: String,
}

/// The EEC DPLL section.
#[derive(Debug, Clone, PartialEq)]
pub struct EecDpll {
    pub current_reference: String,
    pub status: String,
}

/// The PPS DPLL section.
#[derive(Debug, Clone, PartialEq)]
pub struct PpsDpll {
    pub current_reference: String,
    pub status: String,
    pub phase_offset_ps: i64,
}

/// A full parse of one CGU dump.
#[derive(Debug, Clone, PartialEq)]
pub struct CguSnapshot {
    pub chip_model: String,
    pub config_version: String,
    pub fw_version: String,
    pub inputs: Vec<CguInput>,
    pub eec_dpll: EecDpll,
    pub pps_dpll: PpsDpll,
}

impl CguSnapshot {
    pub fn input(&self, name: &str) -> PtpResult<&CguInput> {
        self.inputs
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| PtpError::Parse(format!("CGU input '{name}' not in dump")))
    }
}

/// Parse a `cat .../cgu` dump.
pub fn parse_cgu_output(lines: &[String]) -> PtpResult<CguSnapshot> {
    let chip_model = lines
        .first()
        .and_then(|l| CHIP_RE.captures(l))
        .map(|c| c[1].to_string())
        .ok_or_else(|| PtpError::Parse("CGU dump does not start with a chip header".into()))?;
    let config_version = capture_after(lines, r"DPLL Config ver: (.*)")?;
    let fw_version = capture_after(lines, r"DPLL FW ver: (.*)")?;

    let mut inputs = Vec::new();
    let mut eec_dpll = None;
    let mut pps_dpll = None;

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = INPUT_RE.captures(line) {
            inputs.push(CguInput {
                name: caps[1].to_string(),
                index: parse_num(&caps[2], "input index")?,
                state: caps[3].to_string(),
                eec_priority: parse_num(&caps[4], "EEC priority")?,
                pps_priority: parse_num(&caps[5], "PPS priority")?,
                esync_fail: caps[6].to_string(),
            });
        } else if line.starts_with("EEC DPLL:") {
            let current_reference = capture_at(lines, i + 1, &CURRENT_REF_RE, "EEC reference")?;
            let status = capture_at(lines, i + 2, &STATUS_RE, "EEC status")?;
            eec_dpll = Some(EecDpll {
                current_reference,
                status,
            });
        } else if line.starts_with("PPS DPLL:") {
            let current_reference = capture_at(lines, i + 1, &CURRENT_REF_RE, "PPS reference")?;
            let status = capture_at(lines, i + 2, &STATUS_RE, "PPS status")?;
            let phase_raw = capture_at(lines, i + 3, &PHASE_OFFSET_RE, "PPS phase offset")?;
            let phase_offset_ps = phase_raw.replace(' ', "").parse().map_err(|_| {
                PtpError::Parse(format!("PPS phase offset is not an integer: '{phase_raw}'"))
            })?;
            pps_dpll = Some(PpsDpll {
                current_reference,
                status,
                phase_offset_ps,
            });
        }
    }

    Ok(CguSnapshot {
        chip_model,
        config_version,
        fw_version,
        inputs,
        eec_dpll: eec_dpll.ok_or_else(|| PtpError::Parse("CGU dump has no EEC DPLL section".into()))?,
        pps_dpll: pps_dpll.ok_or_else(|| PtpError::Parse("CGU dump has no PPS DPLL section".into()))?,
    })
}

fn parse_num(raw: &str, what: &str) -> PtpResult<u32> {
    raw.parse()
        .map_err(|_| PtpError::Parse(format!("CGU {what} is not a number: '{raw}'")))
}

fn capture_after(lines: &[String], pattern: &str) -> PtpResult<String> {
    let re = Regex::new(pattern).map_err(|e| PtpError::Parse(e.to_string()))?;
    lines
        .iter()
        .find_map(|l| re.captures(l))
        .map(|c| c[1].trim().to_string())
        .ok_or_else(|| PtpError::Parse(format!("CGU dump missing line matching '{pattern}'")))
}

fn capture_at(lines: &[String], index: usize, re: &Regex, what: &str) -> PtpResult<String> {
    lines
        .get(index)
        .and_then(|l| re.captures(l))
        .map(|c| c[1].trim().to_string())
        .ok_or_else(|| PtpError::Parse(format!("CGU dump missing {what} line")))
}

/// Read and validate the CGU of one NIC through a host session.
pub struct CguKeywords {
    connection: SharedConnection,
}

impl CguKeywords {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }

    /// `cat` and parse the CGU debug file.
    pub fn read(&self, cgu_location: &str) -> PtpResult<CguSnapshot> {
        let output = self
            .connection
            .borrow_mut()
            .send_as_sudo(&format!("cat {cgu_location}"))?;
        parse_cgu_output(&output)
    }

    /// One-shot check of the full clock chain: input state, both DPLL
    /// references and both DPLL statuses. All five observations are logged
    /// on failure.
    pub fn validate_locks(
        &self,
        cgu_location: &str,
        cgu_input: &str,
        expected_input_state: &str,
        expected_reference: &str,
        expected_statuses: &[&str],
    ) -> PtpResult<()> {
        let snapshot = self.read(cgu_location)?;
        let input = snapshot.input(cgu_input)?;
        let eec = &snapshot.eec_dpll;
        let pps = &snapshot.pps_dpll;

        let ok = input.state == expected_input_state
            && eec.current_reference == expected_reference
            && pps.current_reference == expected_reference
            && expected_statuses.contains(&eec.status.as_str())
            && expected_statuses.contains(&pps.status.as_str());
        if ok {
            info!("Validation Successful - CGU {cgu_input} chain locked at {cgu_location}");
            return Ok(());
        }
        error!("Validation Failed - CGU chain at {cgu_location}");
        error!("Expected input {cgu_input} state: {expected_input_state}, observed: {}", input.state);
        error!("Expected EEC reference: {expected_reference}, observed: {}", eec.current_reference);
        error!("Expected PPS reference: {expected_reference}, observed: {}", pps.current_reference);
        error!("Expected EEC status one of {expected_statuses:?}, observed: {}", eec.status);
        error!("Expected PPS status one of {expected_statuses:?}, observed: {}", pps.status);
        Err(PtpError::Validation {
            description: format!("CGU chain at {cgu_location}"),
            expected: format!(
                "input {cgu_input}={expected_input_state}, reference {expected_reference}, statuses {expected_statuses:?}"
            ),
            observed: format!(
                "input={}, eec_ref={}, eec_status={}, pps_ref={}, pps_status={}",
                input.state, eec.current_reference, eec.status, pps.current_reference, pps.status
            ),
        })
    }

    /// Poll the input state and both DPLL statuses until they converge.
    /// This is the post-toggle wait used by GNSS power and SMA switching;
    /// the DPLL references are not constrained here because the chain may
    /// legitimately re-reference while converging.
    pub fn validate_input_and_dplls_with_retry(
        &self,
        cgu_location: &str,
        cgu_input: &str,
        expected_input_state: &str,
        expected_statuses: &[&str],
        timeout: Duration,
        poll_interval: Duration,
    ) -> PtpResult<()> {
        info!("Attempting Validation - CGU input state and DPLL statuses...");
        let end_time = std::time::Instant::now() + timeout;
        let mut last_observed = String::from("<no observation>");
        loop {
            match self.read(cgu_location) {
                Ok(snapshot) => {
                    let input_state = snapshot.input(cgu_input).map(|i| i.state.clone())?;
                    let eec_status = snapshot.eec_dpll.status.clone();
                    let pps_status = snapshot.pps_dpll.status.clone();
                    if input_state == expected_input_state
                        && expected_statuses.contains(&eec_status.as_str())
                        && expected_statuses.contains(&pps_status.as_str())
                    {
                        info!("Validation Successful - CGU input state and both DPLL statuses match expectations.");
                        return Ok(());
                    }
                    info!("Expected CGU input {cgu_input} state: {expected_input_state}, Observed: {input_state}");
                    info!("Expected EEC DPLL status: {expected_statuses:?}, Observed: {eec_status}");
                    info!("Expected PPS DPLL status: {expected_statuses:?}, Observed: {pps_status}");
                    last_observed =
                        format!("input={input_state}, eec={eec_status}, pps={pps_status}");
                }
                Err(e) => {
                    info!("CGU read failed ({e}), retrying");
                    last_observed = e.to_string();
                }
            }
            if std::time::Instant::now() >= end_time {
                return Err(PtpError::Timeout {
                    description: format!("CGU {cgu_input} convergence at {cgu_location}"),
                    expected: format!(
                        "input state {expected_input_state}, DPLL statuses {expected_statuses:?}"
                    ),
                    observed: last_observed,
                    timeout_secs: timeout.as_secs(),
                });
            }
            info!("Retrying in {}s", poll_interval.as_secs());
            std::thread::sleep(poll_interval);
        }
    }
}
