//! Scenario step schema.

use serde::Deserialize;
use serde_json::Value;

use crate::alarm::ExpectedAlarmSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One scenario step: operations applied in order, then the verifications
/// that must hold once they have taken effect.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub verification: Vec<Verification>,
}

/// Fault-injection operations. The tag set is closed; misspelled kinds are
/// parse errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Flip an interface link up or down. `interface` may be a kernel name
    /// or a named PTP interface from the setup document.
    Interface {
        hostname: String,
        interface: String,
        state: LinkAction,
    },
    /// Toggle the GNSS power feed of a NIC.
    Gnss {
        hostname: String,
        nic: String,
        action: PowerAction,
    },
    /// Switch the SMA1 pin of a NIC.
    Sma {
        hostname: String,
        nic: String,
        action: SmaAction,
    },
    /// Control a templated linuxptp unit.
    Service {
        hostname: String,
        service: String,
        instance: String,
        action: ServiceAction,
    },
    /// One `phc_ctl` command against a PHC device.
    PhcCtl {
        hostname: String,
        device: String,
        command: PhcCommand,
        #[serde(default)]
        value: Option<String>,
    },
    /// Background `phc_ctl adj` loop skewing a PHC while this step's
    /// verifications run; stopped when they finish, and self-limited by
    /// `ttl_secs` either way.
    PhcCtlLoop {
        hostname: String,
        device: String,
        #[serde(default = "default_loop_ttl")]
        ttl_secs: u64,
    },
    /// Bring the external Proxmox grandmaster up or down. `prepare` pushes
    /// a matching stop onto the scenario finalizers.
    Proxmox {
        hostname: String,
        action: ProxmoxAction,
    },
}

fn default_loop_ttl() -> u64 {
    600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    PowerOn,
    PowerOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmaAction {
    Enable,
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhcCommand {
    Get,
    Cmp,
    Adj,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxmoxAction {
    Prepare,
    Stop,
}

/// Verification kinds a step can wait on.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Verification {
    /// Wait for alarms to raise or clear, per each expectation's `state`.
    Alarm {
        #[serde(default)]
        expected_alarms: Vec<ExpectedAlarmSpec>,
        /// Overrides the harness alarm timeout for this wait.
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Re-check the setup document's expected PMC values, with per-step
    /// overrides deep-merged in by instance name.
    PmcValue {
        #[serde(default)]
        overrides: Vec<Value>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Check a unit's status and that its last state change is recent.
    /// `timeout_secs` is the recency window; absent, the harness default
    /// applies.
    ServiceStatus {
        hostname: String,
        service: String,
        instance: String,
        status: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

/// What the operations run so far imply about the system, carried across a
/// scenario's steps so verifications can adapt. A stopped ptp4l cannot
/// answer `GET DOMAIN`, so the PMC verification skips the domain check
/// while the daemon is expected down.
#[derive(Debug, Clone, Copy)]
pub struct SystemHealthHint {
    pub ptp4l_expected_running: bool,
}

impl Default for SystemHealthHint {
    fn default() -> Self {
        Self {
            ptp4l_expected_running: true,
        }
    }
}

impl SystemHealthHint {
    /// Fold a service operation into the hint.
    pub fn observe_service_action(&mut self, service: &str, action: ServiceAction) {
        if service == "ptp4l" {
            self.ptp4l_expected_running = !matches!(action, ServiceAction::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_verification_kinds() {
        let ok: Verification = serde_json::from_value(serde_json::json!({
            "type": "service_status",
            "hostname": "controller-0",
            "service": "ptp4l",
            "instance": "ptp1",
            "status": "active (running)",
        }))
        .unwrap();
        assert!(matches!(ok, Verification::ServiceStatus { .. }));

        let unknown = serde_json::from_value::<Verification>(serde_json::json!({
            "type": "metrics",
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn test_health_hint_tracks_ptp4l() {
        let mut hint = SystemHealthHint::default();
        assert!(hint.ptp4l_expected_running);
        hint.observe_service_action("ptp4l", ServiceAction::Stop);
        assert!(!hint.ptp4l_expected_running);
        hint.observe_service_action("phc2sys", ServiceAction::Start);
        assert!(!hint.ptp4l_expected_running);
        hint.observe_service_action("ptp4l", ServiceAction::Restart);
        assert!(hint.ptp4l_expected_running);
    }
}
