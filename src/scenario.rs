//! Test scenarios: fault-injection steps and their expected observations.
//!
//! Scenarios live in the setup document under `test_scenarios`, keyed by
//! name. Each step carries operations applied in order (flip a link, cut
//! GNSS power, stop a service, skew a PHC) and the verifications that must
//! hold afterwards (alarms raised or cleared, PMC values, service status).
//! The schemas are closed enums, so an unknown operation or verification
//! kind fails at parse time instead of silently doing nothing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::alarm::ExpectedAlarmSpec;
use crate::config::PtpLabConfig;
use crate::error::{PtpError, PtpResult};
use crate::setup::PtpSetupDocument;

pub mod executor;
pub mod model;

pub use executor::ScenarioExecutor;
pub use model::{
    LinkAction, Operation, PhcCommand, PowerAction, ProxmoxAction, Scenario, ServiceAction,
    SmaAction, Step, SystemHealthHint, Verification,
};

static ENTITY_HOST_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"host=([^.]+)").unwrap()
});

/// Parse the named scenario out of a setup document.
pub fn scenario_from_setup(setup: &PtpSetupDocument, name: &str) -> PtpResult<Scenario> {
    let value = setup.test_scenarios.get(name).ok_or_else(|| {
        PtpError::Config(format!("setup document has no test scenario '{name}'"))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| PtpError::Config(format!("test scenario '{name}' is malformed: {e}")))
}

/// Resolve the `{interface}` placeholder of an expected alarm from the lab
/// topology: the hostname comes from the `host=` part of the entity id and
/// the interface is that host's nic1 base port.
pub fn resolve_alarm_spec(
    spec: &ExpectedAlarmSpec,
    lab: &PtpLabConfig,
) -> PtpResult<ExpectedAlarmSpec> {
    let needs_interface = spec.entity_id.contains("{interface}")
        || spec
            .reason_text
            .as_deref()
            .is_some_and(|t| t.contains("{interface}"))
        || spec
            .reason_pattern
            .as_deref()
            .is_some_and(|p| p.contains("{interface}"));
    if !needs_interface {
        return Ok(spec.clone());
    }
    let hostname = ENTITY_HOST_RE
        .captures(&spec.entity_id)
        .map(|c| c[1].to_string())
        .ok_or_else(|| {
            PtpError::Config(format!(
                "cannot resolve {{interface}}: no host= in entity id '{}'",
                spec.entity_id
            ))
        })?;
    let interface = lab.nic(&hostname, "nic1")?.base_port.clone();
    let substitute = |text: &str| text.replace("{interface}", &interface);
    Ok(ExpectedAlarmSpec {
        alarm_id: spec.alarm_id.clone(),
        entity_id: substitute(&spec.entity_id),
        reason_text: spec.reason_text.as_deref().map(substitute),
        reason_pattern: spec.reason_pattern.as_deref().map(substitute),
        severity: spec.severity.clone(),
        state: spec.state,
    })
}
