//! Scenario execution.
//!
//! Runs a parsed scenario step by step: apply the step's operations in
//! order, then hold them against its verifications. Operations that leave
//! something running (the Proxmox grandmaster) push an undo onto a
//! finalizer stack; finalizers run in reverse order once the scenario
//! ends, pass or fail.

use std::time::Duration;

use log::{error, info};

use crate::alarm::{AlarmKeywords, AlarmState, ExpectedAlarm};
use crate::config::PtpLabConfig;
use crate::connection::ConnectionProvider;
use crate::error::{PtpError, PtpResult};
use crate::gnss::GnssKeywords;
use crate::ip::{IpKeywords, LinkState};
use crate::phc::{PhcCtlKeywords, PhcLoopHandle};
use crate::proxmox::{ProxmoxGrandmaster, ProxmoxKeywords};
use crate::scenario::model::{
    LinkAction, Operation, PhcCommand, PowerAction, ProxmoxAction, Scenario, SmaAction, Step,
    SystemHealthHint, Verification,
};
use crate::scenario::{resolve_alarm_spec, scenario_from_setup};
use crate::service::ServiceKeywords;
use crate::settings::Settings;
use crate::setup::{merge::deep_merge, Ptp4lExpected, PtpSetupDocument, SetupVerification};
use crate::sma::SmaKeywords;
use crate::verify::PtpVerifier;

type Finalizer<'a> = Box<dyn FnOnce() -> PtpResult<()> + 'a>;

pub struct ScenarioExecutor<'a> {
    lab: &'a PtpLabConfig,
    provider: &'a dyn ConnectionProvider,
    settings: &'a Settings,
    setup: &'a PtpSetupDocument,
    sudo_password: String,
}

impl<'a> ScenarioExecutor<'a> {
    pub fn new(
        lab: &'a PtpLabConfig,
        provider: &'a dyn ConnectionProvider,
        settings: &'a Settings,
        setup: &'a PtpSetupDocument,
        sudo_password: impl Into<String>,
    ) -> Self {
        Self {
            lab,
            provider,
            settings,
            setup,
            sudo_password: sudo_password.into(),
        }
    }

    /// Run the named scenario from the setup document.
    pub fn run(&self, scenario_name: &str) -> PtpResult<()> {
        let scenario = scenario_from_setup(self.setup, scenario_name)?;
        info!(
            "Running scenario '{scenario_name}' ({} steps)",
            scenario.steps.len()
        );
        let mut finalizers: Vec<Finalizer<'a>> = Vec::new();
        let mut result = self.run_steps(&scenario, &mut finalizers);
        for finalizer in finalizers.into_iter().rev() {
            if let Err(e) = finalizer() {
                error!("Scenario finalizer failed: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if result.is_ok() {
            info!("Scenario '{scenario_name}' passed");
        }
        result
    }

    fn run_steps(
        &self,
        scenario: &Scenario,
        finalizers: &mut Vec<Finalizer<'a>>,
    ) -> PtpResult<()> {
        let mut hint = SystemHealthHint::default();
        for (index, step) in scenario.steps.iter().enumerate() {
            info!("Step {} of {}", index + 1, scenario.steps.len());
            self.run_step(step, &mut hint, finalizers)?;
        }
        Ok(())
    }

    fn run_step(
        &self,
        step: &Step,
        hint: &mut SystemHealthHint,
        finalizers: &mut Vec<Finalizer<'a>>,
    ) -> PtpResult<()> {
        if let Some(description) = &step.description {
            info!("{description}");
        }
        // Adjustment loops only make sense while their step's verifications
        // run, so they are stopped here rather than by a finalizer; the TTL
        // covers the case where even this is not reached.
        let mut loops: Vec<(PhcCtlKeywords, PhcLoopHandle)> = Vec::new();
        let mut result = Ok(());
        for operation in &step.operations {
            result = if let Operation::PhcCtlLoop {
                hostname,
                device,
                ttl_secs,
            } = operation
            {
                self.provider
                    .connection_for_host(hostname)
                    .map(PhcCtlKeywords::new)
                    .and_then(|phc| {
                        let handle = phc.start_adjustment_loop(device, *ttl_secs)?;
                        loops.push((phc, handle));
                        Ok(())
                    })
            } else {
                self.apply_operation(operation, hint, finalizers)
            };
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = self.run_verifications(&step.verification, hint);
        }
        for (phc, handle) in loops {
            if let Err(e) = phc.stop_adjustment_loop(&handle) {
                error!("Failed to stop phc_ctl adjustment loop: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn apply_operation(
        &self,
        operation: &Operation,
        hint: &mut SystemHealthHint,
        finalizers: &mut Vec<Finalizer<'a>>,
    ) -> PtpResult<()> {
        match operation {
            Operation::Interface {
                hostname,
                interface,
                state,
            } => {
                let interface = self.resolve_interface(interface, hostname)?;
                let connection = self.provider.connection_for_host(hostname)?;
                let link_state = match state {
                    LinkAction::Up => LinkState::Up,
                    LinkAction::Down => LinkState::Down,
                };
                IpKeywords::new(connection).set_port_state(&interface, link_state)
            }
            Operation::Gnss {
                hostname,
                nic,
                action,
            } => {
                let gnss = GnssKeywords::new(self.lab, self.provider, self.settings);
                match action {
                    PowerAction::PowerOn => gnss.gnss_power_on(hostname, nic),
                    PowerAction::PowerOff => gnss.gnss_power_off(hostname, nic),
                }
            }
            Operation::Sma {
                hostname,
                nic,
                action,
            } => {
                let sma = SmaKeywords::new(
                    self.lab,
                    self.provider,
                    self.settings,
                    self.sudo_password.clone(),
                );
                match action {
                    SmaAction::Enable => sma.enable_sma(hostname, nic),
                    SmaAction::Disable => sma.disable_sma(hostname, nic),
                }
            }
            Operation::Service {
                hostname,
                service,
                instance,
                action,
            } => {
                let connection = self.provider.connection_for_host(hostname)?;
                let keywords = ServiceKeywords::new(connection);
                hint.observe_service_action(service, *action);
                match action {
                    crate::scenario::ServiceAction::Start => keywords.start(service, instance),
                    crate::scenario::ServiceAction::Stop => keywords.stop(
                        service,
                        instance,
                        Duration::from_secs(self.settings.service_stop_settle_secs),
                    ),
                    crate::scenario::ServiceAction::Restart => keywords.restart(service, instance),
                }
            }
            Operation::PhcCtl {
                hostname,
                device,
                command,
                value,
            } => {
                let connection = self.provider.connection_for_host(hostname)?;
                let phc = PhcCtlKeywords::new(connection);
                let output = match command {
                    PhcCommand::Get => phc.get(device)?,
                    PhcCommand::Cmp => phc.cmp(device)?,
                    PhcCommand::Adj => {
                        let seconds = value.as_deref().ok_or_else(|| {
                            PtpError::Config(format!(
                                "phc_ctl adj on {device} needs a value"
                            ))
                        })?;
                        phc.adj(device, seconds)?
                    }
                    PhcCommand::Set => phc.set(device, value.as_deref())?,
                };
                info!("phc_ctl {device} {command:?} -> {output}");
                Ok(())
            }
            Operation::PhcCtlLoop { .. } => Ok(()),
            Operation::Proxmox { hostname, action } => {
                let connection = self.provider.connection_for_host(hostname)?;
                let proxmox = ProxmoxKeywords::new(connection.clone(), self.settings);
                match action {
                    ProxmoxAction::Prepare => {
                        proxmox.prepare()?;
                        let settings = self.settings;
                        finalizers.push(Box::new(move || {
                            ProxmoxKeywords::new(connection, settings).stop()
                        }));
                        Ok(())
                    }
                    ProxmoxAction::Stop => proxmox.stop(),
                }
            }
        }
    }

    fn run_verifications(
        &self,
        verifications: &[Verification],
        hint: &SystemHealthHint,
    ) -> PtpResult<()> {
        for verification in verifications {
            match verification {
                Verification::Alarm {
                    expected_alarms,
                    timeout_secs,
                } => self.verify_alarms(expected_alarms, *timeout_secs)?,
                Verification::PmcValue {
                    overrides,
                    timeout_secs,
                } => {
                    let merged = self.merged_pmc_values(overrides)?;
                    let mut doc = self.setup.clone();
                    doc.verification = vec![SetupVerification {
                        kind: "pmc_value".to_string(),
                        pmc_values: merged,
                    }];
                    let timeout = timeout_secs.unwrap_or(self.settings.default_timeout_secs);
                    PtpVerifier::new(self.lab, self.provider, self.settings)
                        .verify_pmc_values_with_retry(
                            &doc,
                            hint.ptp4l_expected_running,
                            Duration::from_secs(timeout),
                            Duration::from_secs(self.settings.default_poll_interval_secs),
                        )?;
                }
                Verification::ServiceStatus {
                    hostname,
                    service,
                    instance,
                    status,
                    timeout_secs,
                } => {
                    let connection = self.provider.connection_for_host(hostname)?;
                    let recency = timeout_secs
                        .map_or(self.settings.service_recency_secs, |t| t as i64);
                    ServiceKeywords::new(connection).verify_status_and_recent_event(
                        service,
                        instance,
                        recency,
                        status,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn verify_alarms(
        &self,
        specs: &[crate::alarm::ExpectedAlarmSpec],
        timeout_secs: Option<u64>,
    ) -> PtpResult<()> {
        let mut to_appear: Vec<ExpectedAlarm> = Vec::new();
        let mut to_clear: Vec<ExpectedAlarm> = Vec::new();
        for spec in specs {
            let resolved = resolve_alarm_spec(spec, self.lab)?;
            let expected = resolved.to_expected()?;
            match resolved.state {
                AlarmState::Set => to_appear.push(expected),
                AlarmState::Clear => to_clear.push(expected),
            }
        }
        let alarms = AlarmKeywords::new(self.provider.active_controller_connection()?);
        let timeout =
            Duration::from_secs(timeout_secs.unwrap_or(self.settings.alarm_timeout_secs));
        let poll = Duration::from_secs(self.settings.alarm_poll_interval_secs);
        if !to_appear.is_empty() {
            alarms.wait_for_alarms_to_appear(&to_appear, timeout, poll)?;
        }
        if !to_clear.is_empty() {
            alarms.wait_for_alarms_cleared(&to_clear, timeout, poll)?;
        }
        Ok(())
    }

    /// The setup document's expected PMC values with `overrides` merged in
    /// by instance name.
    fn merged_pmc_values(
        &self,
        overrides: &[serde_json::Value],
    ) -> PtpResult<Vec<Ptp4lExpected>> {
        let mut merged: Vec<Ptp4lExpected> =
            self.setup.pmc_values().into_iter().cloned().collect();
        for override_value in overrides {
            let name = override_value
                .get("name")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    PtpError::Config("pmc_value override is missing a 'name'".into())
                })?;
            let expected = merged.iter_mut().find(|e| e.name == name).ok_or_else(|| {
                PtpError::Config(format!(
                    "pmc_value override names unknown instance '{name}'"
                ))
            })?;
            let mut value = serde_json::to_value(&*expected)
                .map_err(|e| PtpError::Config(format!("expectation not serializable: {e}")))?;
            deep_merge(&mut value, override_value);
            *expected = serde_json::from_value(value).map_err(|e| {
                PtpError::Config(format!("override for instance '{name}' is malformed: {e}"))
            })?;
        }
        Ok(merged)
    }

    /// A scenario may name either a kernel interface or a named PTP
    /// interface from the setup; named ones resolve through the host
    /// mapping.
    fn resolve_interface(&self, interface: &str, hostname: &str) -> PtpResult<String> {
        match self.setup.host_interface(interface) {
            Some(host_if) => host_if
                .interfaces_for_hostname(hostname)
                .into_iter()
                .next()
                .ok_or_else(|| {
                    PtpError::Config(format!(
                        "interface '{interface}' has no mapping for {hostname}"
                    ))
                }),
            None => Ok(interface.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::scripted::ScriptedProvider;
    use crate::setup::SetupRenderer;

    fn lab() -> PtpLabConfig {
        json5::from_str(
            r#"{
                hosts: {
                    "controller-0": { nics: { nic1: { base_port: "enp81s0f0" } } },
                }
            }"#,
        )
        .unwrap()
    }

    fn fast_settings() -> Settings {
        Settings {
            alarm_timeout_secs: 1,
            alarm_poll_interval_secs: 1,
            default_timeout_secs: 1,
            default_poll_interval_secs: 1,
            service_stop_settle_secs: 0,
            ..Settings::default()
        }
    }

    fn setup_with_scenario(scenario: serde_json::Value) -> PtpSetupDocument {
        let lab = lab();
        let mut setup = SetupRenderer::new(&lab, None)
            .render_str(
                r#"{
                    ptp_configuration: {
                        ptp_instances: {
                            ptp4l: [{
                                name: "ptp1",
                                instance_hostnames: ["controller-0"],
                                instance_parameters: "domainNumber=24",
                                ptp_interface_names: ["ptp1if1"],
                            }],
                        },
                        ptp_host_ifs: [{
                            name: "ptp1if1",
                            controller_0_interfaces: ["enp81s0f0"],
                        }],
                    },
                }"#,
            )
            .unwrap();
        setup.test_scenarios.insert("under_test".into(), scenario);
        setup
    }

    #[test]
    fn test_service_restart_step() {
        let lab = lab();
        let settings = fast_settings();
        let setup = setup_with_scenario(serde_json::json!({
            "steps": [{
                "description": "Restart ptp4l and check it comes back",
                "operations": [{
                    "type": "service",
                    "hostname": "controller-0",
                    "service": "ptp4l",
                    "instance": "ptp1",
                    "action": "restart",
                }],
                "verification": [{
                    "type": "service_status",
                    "hostname": "controller-0",
                    "service": "ptp4l",
                    "instance": "ptp1",
                    "status": "active (running)",
                }],
            }],
        }));
        let mut provider = ScriptedProvider::new();
        let conn = provider.add_host("controller-0");
        conn.borrow_mut().on("systemctl restart", &[]);
        conn.borrow_mut().on(
            "systemctl status ptp4l@ptp1.service",
            &[
                "● ptp4l@ptp1.service - Precision Time Protocol (PTP) service",
                "     Active: active (running) since Mon 2025-02-10 18:36:34 UTC; 3s ago",
            ],
        );
        let executor = ScenarioExecutor::new(&lab, &provider, &settings, &setup, "pw");
        executor.run("under_test").unwrap();
        assert!(conn.borrow().saw("sudo systemctl restart ptp4l@ptp1.service"));
    }

    #[test]
    fn test_service_status_timeout_narrows_recency_window() {
        let lab = lab();
        let settings = fast_settings();
        // 3min old state change: inside the 180 s default window, outside
        // a declared 60 s one.
        let status_output = [
            "● ptp4l@ptp1.service - Precision Time Protocol (PTP) service",
            "     Active: active (running) since Mon 2025-02-10 18:36:34 UTC; 3min ago",
        ];
        let verification = |timeout: Option<u64>| {
            let mut v = serde_json::json!({
                "type": "service_status",
                "hostname": "controller-0",
                "service": "ptp4l",
                "instance": "ptp1",
                "status": "active (running)",
            });
            if let Some(timeout) = timeout {
                v["timeout_secs"] = serde_json::json!(timeout);
            }
            serde_json::json!({ "steps": [{ "verification": [v] }] })
        };

        let setup = setup_with_scenario(verification(None));
        let mut provider = ScriptedProvider::new();
        let conn = provider.add_host("controller-0");
        conn.borrow_mut()
            .on("systemctl status ptp4l@ptp1.service", &status_output);
        ScenarioExecutor::new(&lab, &provider, &settings, &setup, "pw")
            .run("under_test")
            .unwrap();

        let setup = setup_with_scenario(verification(Some(60)));
        let mut provider = ScriptedProvider::new();
        let conn = provider.add_host("controller-0");
        conn.borrow_mut()
            .on("systemctl status ptp4l@ptp1.service", &status_output);
        let err = ScenarioExecutor::new(&lab, &provider, &settings, &setup, "pw")
            .run("under_test")
            .unwrap_err();
        assert!(err.is_validation_failure());
    }

    #[test]
    fn test_interface_down_resolves_named_interface() {
        let lab = lab();
        let settings = fast_settings();
        let setup = setup_with_scenario(serde_json::json!({
            "steps": [{
                "operations": [{
                    "type": "interface",
                    "hostname": "controller-0",
                    "interface": "ptp1if1",
                    "state": "down",
                }],
            }],
        }));
        let mut provider = ScriptedProvider::new();
        let conn = provider.add_host("controller-0");
        conn.borrow_mut().on("ip link set", &[]);
        let executor = ScenarioExecutor::new(&lab, &provider, &settings, &setup, "pw");
        executor.run("under_test").unwrap();
        assert!(conn.borrow().saw("sudo ip link set enp81s0f0 down"));
    }

    #[test]
    fn test_phc_loop_step_waits_for_alarm_and_stops_loop() {
        let lab = lab();
        let settings = fast_settings();
        let setup = setup_with_scenario(serde_json::json!({
            "steps": [{
                "operations": [{
                    "type": "phc_ctl_loop",
                    "hostname": "controller-0",
                    "device": "enp81s0f0",
                    "ttl_secs": 600,
                }],
                "verification": [{
                    "type": "alarm",
                    "expected_alarms": [{
                        "alarm_id": "100.119",
                        "entity_id": "host=controller-0.instance=ptp1.ptp=out-of-tolerance",
                        "reason_pattern": "out-of-tolerance",
                    }],
                }],
            }],
        }));
        let mut provider = ScriptedProvider::new();
        let conn = provider.add_host("controller-0");
        conn.borrow_mut().on("echo", &[]);
        conn.borrow_mut().on("nohup", &[]);
        conn.borrow_mut().on("kill", &[]);
        provider.active_controller().borrow_mut().on(
            "fm alarm-list --nowrap",
            &[
                "+----------+------------------------------------------+------------------------------------------------------+----------+----------------------------+",
                "| Alarm ID | Reason Text                              | Entity ID                                            | Severity | Time Stamp                 |",
                "+----------+------------------------------------------+------------------------------------------------------+----------+----------------------------+",
                "| 100.119  | controller-0 clock is out-of-tolerance   | host=controller-0.instance=ptp1.ptp=out-of-tolerance | major    | 2025-02-18T06:30:12.000000 |",
                "+----------+------------------------------------------+------------------------------------------------------+----------+----------------------------+",
            ],
        );
        let executor = ScenarioExecutor::new(&lab, &provider, &settings, &setup, "pw");
        executor.run("under_test").unwrap();
        assert!(conn.borrow().saw("nohup sh /tmp/phc_ctl_loop_enp81s0f0.sh"));
        assert!(conn.borrow().saw("rm -f /tmp/phc_ctl_loop_enp81s0f0.sh"));
    }

    #[test]
    fn test_pmc_override_with_unknown_name_fails() {
        let lab = lab();
        let settings = fast_settings();
        let setup = setup_with_scenario(serde_json::json!({"steps": []}));
        let provider = ScriptedProvider::new();
        let executor = ScenarioExecutor::new(&lab, &provider, &settings, &setup, "pw");
        let err = executor
            .merged_pmc_values(&[serde_json::json!({"name": "ptp9"})])
            .unwrap_err();
        assert!(matches!(err, PtpError::Config(_)));
    }
}
