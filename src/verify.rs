//! Full-configuration verification.
//!
//! Checks a lab's live state against a rendered setup document, in the
//! order the dependencies run: the GNSS feed and clock chain first, then
//! SMA pinning, the systemd units, the PMC data sets, the deployed config
//! files, and finally a clean system alarm list. Each step fails with the
//! first mismatch it finds; [`PtpVerifier::verify_pmc_values_with_retry`]
//! wraps the PMC step in a poll for callers waiting on convergence after
//! an operation.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use log::info;

use crate::alarm::AlarmKeywords;
use crate::cgu::CguKeywords;
use crate::conf::{clock_conf_entries, clock_config_file, ts2phc_config_file, ConfKeywords};
use crate::config::{normalize_hostname, PtpLabConfig};
use crate::connection::ConnectionProvider;
use crate::error::{PtpError, PtpResult};
use crate::gnss::{extract_gnss_port, GnssKeywords};
use crate::pmc::{ptp4l_config_file, ptp4l_socket_file, Pmc};
use crate::service::ServiceKeywords;
use crate::settings::Settings;
use crate::setup::{
    InstanceSetup, ParamValue, PtpSetupDocument, ValueExpectation,
};
use crate::validation::{retry_until_ok, validate_equals};

/// ptp4l config keys checked against the instance parameters that should
/// have produced them.
const CHECKED_PTP4L_KEYS: [&str; 6] = [
    "boundary_clock_jbod",
    "dataset_comparison",
    "domainNumber",
    "priority1",
    "priority2",
    "tx_timestamp_timeout",
];

/// DPLL statuses accepted as locked when a GNSS feed is up.
const LOCKED_STATUSES: [&str; 1] = ["locked_ho_acq"];

/// Port identities observed per `(instance, hostname, interface)`, used to
/// resolve expected parent port identities across hosts.
pub type PortIdentityMap = BTreeMap<(String, String, String), String>;

pub struct PtpVerifier<'a> {
    lab: &'a PtpLabConfig,
    provider: &'a dyn ConnectionProvider,
    settings: &'a Settings,
}

impl<'a> PtpVerifier<'a> {
    pub fn new(
        lab: &'a PtpLabConfig,
        provider: &'a dyn ConnectionProvider,
        settings: &'a Settings,
    ) -> Self {
        Self {
            lab,
            provider,
            settings,
        }
    }

    /// Verify the whole deployed configuration, ending with an empty alarm
    /// list.
    pub fn verify_all(&self, setup: &PtpSetupDocument) -> PtpResult<()> {
        info!("Verifying full PTP configuration");
        self.verify_gnss(setup)?;
        self.verify_sma(setup)?;
        self.verify_service_status(setup)?;
        self.verify_pmc_values(setup, true)?;
        self.verify_config_files(setup)?;
        self.verify_no_alarms()
    }

    /// For every ts2phc instance fed by a GNSS receiver, check the serial
    /// device matches the configured `ts2phc.nmea_serialport` and the CGU
    /// clock chain is locked to GNSS-1PPS.
    pub fn verify_gnss(&self, setup: &PtpSetupDocument) -> PtpResult<()> {
        let gnss = GnssKeywords::new(self.lab, self.provider, self.settings);
        for instance in &setup.ptp_configuration.ptp_instances.ts2phc {
            let Some(expected_port) = extract_gnss_port(&instance.instance_parameters) else {
                continue;
            };
            for hostname in &instance.instance_hostnames {
                for interface in self.kernel_interfaces(setup, instance, hostname) {
                    info!(
                        "Verifying GNSS feed of {hostname} {interface} for instance {}",
                        instance.name
                    );
                    let observed = gnss.gnss_serial_port(hostname, &interface)?;
                    validate_equals(
                        &observed,
                        &expected_port,
                        &format!("GNSS serial port of {hostname} {interface}"),
                    )?;
                    let cgu_location = gnss.cgu_location(hostname, &interface)?;
                    let connection = self.provider.connection_for_host(hostname)?;
                    CguKeywords::new(connection).validate_locks(
                        &cgu_location,
                        "GNSS-1PPS",
                        "valid",
                        "GNSS-1PPS",
                        &LOCKED_STATUSES,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Check `clock-conf.conf` carries the SMA pin modes every clock
    /// instance's interfaces were configured with.
    pub fn verify_sma(&self, setup: &PtpSetupDocument) -> PtpResult<()> {
        for instance in &setup.ptp_configuration.ptp_instances.clock {
            for hostname in &instance.instance_hostnames {
                let connection = self.provider.connection_for_host(hostname)?;
                let conf = ConfKeywords::new(connection).read(&clock_config_file())?;
                let entries = clock_conf_entries(&conf);
                for iface_name in &instance.ptp_interface_names {
                    let host_if = setup.host_interface(iface_name).ok_or_else(|| {
                        PtpError::Config(format!("unknown interface '{iface_name}'"))
                    })?;
                    let Some(parameter) = &host_if.ptp_interface_parameter else {
                        continue;
                    };
                    let (sma_name, sma_mode) = parameter.split_once('=').ok_or_else(|| {
                        PtpError::Config(format!(
                            "bad ptp_interface_parameter '{parameter}' on '{iface_name}'"
                        ))
                    })?;
                    for ifname in host_if.interfaces_for_hostname(hostname) {
                        let found = entries.iter().any(|e| {
                            e.ifname == ifname && e.sma_name == sma_name && e.sma_mode == sma_mode
                        });
                        if !found {
                            return Err(PtpError::Validation {
                                description: format!("clock-conf pin on {hostname}"),
                                expected: format!("{ifname} {sma_name} {sma_mode}"),
                                observed: format!("{entries:?}"),
                            });
                        }
                        info!("Validation Successful - {hostname} {ifname} {sma_name} {sma_mode}");
                    }
                }
            }
        }
        Ok(())
    }

    /// Every ptp4l/phc2sys/ts2phc instance's unit is `active (running)` on
    /// each of its hosts; phc2sys command lines must also carry their
    /// `cmdline_opts`.
    pub fn verify_service_status(&self, setup: &PtpSetupDocument) -> PtpResult<()> {
        for (service, instance) in setup.ptp_configuration.ptp_instances.all() {
            if service == "clock" {
                continue;
            }
            for hostname in &instance.instance_hostnames {
                info!("Verifying {service}@{} on {hostname}", instance.name);
                let connection = self.provider.connection_for_host(hostname)?;
                let keywords = ServiceKeywords::new(connection);
                if service == "phc2sys" && instance.instance_parameters.contains("cmdline_opts") {
                    keywords.verify_running_with_parameters(
                        service,
                        &instance.name,
                        &instance.instance_parameters,
                    )?;
                } else {
                    keywords.verify_running(service, &instance.name)?;
                }
            }
        }
        Ok(())
    }

    /// Observed port identities for every ptp4l instance port, keyed by
    /// `(instance, hostname, interface)`. Ports come back from the daemon
    /// in config-file order, which is the order the named interfaces
    /// resolve to.
    pub fn port_identity_map(&self, setup: &PtpSetupDocument) -> PtpResult<PortIdentityMap> {
        let mut mapping = PortIdentityMap::new();
        for instance in &setup.ptp_configuration.ptp_instances.ptp4l {
            let config_file = ptp4l_config_file(&instance.name);
            let socket_file = ptp4l_socket_file(&instance.name);
            for hostname in &instance.instance_hostnames {
                let connection = self.provider.connection_for_host(hostname)?;
                let ports = Pmc::new(connection).get_port_data_set(&config_file, &socket_file)?;
                let interfaces = self.kernel_interfaces(setup, instance, hostname);
                // Correlation is positional; more observed ports than
                // declared interfaces would mis-assign identities.
                if ports.len() > interfaces.len() {
                    return Err(PtpError::Validation {
                        description: format!(
                            "PORT_DATA_SET count of {} on {hostname}",
                            instance.name
                        ),
                        expected: format!("at most {} ports", interfaces.len()),
                        observed: format!("{} ports", ports.len()),
                    });
                }
                for (interface, port) in interfaces.into_iter().zip(ports) {
                    mapping.insert(
                        (
                            instance.name.clone(),
                            normalize_hostname(hostname),
                            interface,
                        ),
                        port.port_identity,
                    );
                }
            }
        }
        Ok(mapping)
    }

    /// Check every expected PMC value of the setup document against the
    /// live instances. `check_domain` additionally compares `GET DOMAIN`
    /// against each instance's `domainNumber` parameter.
    pub fn verify_pmc_values(&self, setup: &PtpSetupDocument, check_domain: bool) -> PtpResult<()> {
        let mapping = self.port_identity_map(setup)?;
        for expected in setup.pmc_values() {
            let instance = setup.instance(&expected.name).ok_or_else(|| {
                PtpError::Config(format!(
                    "expected PMC values name unknown instance '{}'",
                    expected.name
                ))
            })?;
            let config_file = ptp4l_config_file(&expected.name);
            let socket_file = ptp4l_socket_file(&expected.name);
            for hostname in expected.hostnames() {
                let Some(host_expected) = expected.host(hostname) else {
                    continue;
                };
                info!("Verifying PMC values of {} on {hostname}", expected.name);
                let connection = self.provider.connection_for_host(hostname)?;
                let pmc = Pmc::new(connection);

                if let Some(expected_ports) = &host_expected.port_data_set {
                    let observed = pmc.get_port_data_set(&config_file, &socket_file)?;
                    let interfaces = self.kernel_interfaces(setup, instance, hostname);
                    if observed.len() > interfaces.len() {
                        return Err(PtpError::Validation {
                            description: format!(
                                "PORT_DATA_SET count of {} on {hostname}",
                                expected.name
                            ),
                            expected: format!("at most {} ports", interfaces.len()),
                            observed: format!("{} ports", observed.len()),
                        });
                    }
                    let by_interface: BTreeMap<&str, &crate::pmc::PortDataSet> = interfaces
                        .iter()
                        .map(String::as_str)
                        .zip(observed.iter())
                        .collect();
                    for expected_port in expected_ports {
                        let port = by_interface
                            .get(expected_port.interface.as_str())
                            .ok_or_else(|| PtpError::Validation {
                                description: format!(
                                    "port {} of {} on {hostname}",
                                    expected_port.interface, expected.name
                                ),
                                expected: "a PORT_DATA_SET entry".into(),
                                observed: format!("{} entries", observed.len()),
                            })?;
                        validate_expectation(
                            &port.port_state,
                            &expected_port.port_state,
                            &format!(
                                "port state of {} on {hostname}",
                                expected_port.interface
                            ),
                        )?;
                    }

                    // Parent identities resolve through the observed map so
                    // the expectation can name a port instead of a clock id.
                    for expected_port in expected_ports {
                        let Some(parent_ref) = &expected_port.parent_port_identity else {
                            continue;
                        };
                        let key = (
                            parent_ref.name.clone(),
                            normalize_hostname(&parent_ref.hostname),
                            parent_ref.interface.clone(),
                        );
                        let expected_identity = mapping.get(&key).ok_or_else(|| {
                            PtpError::Validation {
                                description: format!(
                                    "parent port {}/{}/{}",
                                    parent_ref.name, parent_ref.hostname, parent_ref.interface
                                ),
                                expected: "an observed port identity".into(),
                                observed: "no PORT_DATA_SET entry for that port".into(),
                            }
                        })?;
                        let parent = pmc.get_parent_data_set(&config_file, &socket_file)?;
                        validate_equals(
                            &parent.parent_port_identity,
                            expected_identity,
                            &format!("parent port identity of {} on {hostname}", expected.name),
                        )?;
                    }
                }

                if let Some(expected_parent) = &host_expected.parent_data_set {
                    let parent = pmc.get_parent_data_set(&config_file, &socket_file)?;
                    validate_expectation(
                        &parent.gm_clock_class,
                        &expected_parent.gm_clock_class,
                        &format!("gm.ClockClass of {} on {hostname}", expected.name),
                    )?;
                    validate_equals(
                        &parent.gm_clock_accuracy,
                        &expected_parent.gm_clock_accuracy,
                        &format!("gm.ClockAccuracy of {} on {hostname}", expected.name),
                    )?;
                    validate_equals(
                        &parent.gm_offset_scaled_log_variance,
                        &expected_parent.gm_offset_scaled_log_variance,
                        &format!(
                            "gm.OffsetScaledLogVariance of {} on {hostname}",
                            expected.name
                        ),
                    )?;
                }

                if let Some(expected_time) = &host_expected.time_properties_data_set {
                    let time = pmc.get_time_properties_data_set(&config_file, &socket_file)?;
                    let what = format!("TIME_PROPERTIES_DATA_SET of {} on {hostname}", expected.name);
                    validate_equals(
                        &time.current_utc_offset,
                        &expected_time.current_utc_offset,
                        &format!("currentUtcOffset in {what}"),
                    )?;
                    validate_equals(
                        &time.current_utc_offset_valid,
                        &expected_time.current_utc_offset_valid,
                        &format!("currentUtcOffsetValid in {what}"),
                    )?;
                    validate_equals(
                        &time.time_traceable,
                        &expected_time.time_traceable,
                        &format!("timeTraceable in {what}"),
                    )?;
                    validate_equals(
                        &time.frequency_traceable,
                        &expected_time.frequency_traceable,
                        &format!("frequencyTraceable in {what}"),
                    )?;
                }

                if let Some(expected_gm) = &host_expected.grandmaster_settings {
                    let gm = pmc.get_grandmaster_settings(&config_file, &socket_file)?;
                    let what = format!("GRANDMASTER_SETTINGS_NP of {} on {hostname}", expected.name);
                    validate_expectation(
                        &gm.clock_class,
                        &expected_gm.clock_class,
                        &format!("clockClass in {what}"),
                    )?;
                    validate_equals(
                        &gm.clock_accuracy,
                        &expected_gm.clock_accuracy,
                        &format!("clockAccuracy in {what}"),
                    )?;
                    validate_equals(
                        &gm.offset_scaled_log_variance,
                        &expected_gm.offset_scaled_log_variance,
                        &format!("offsetScaledLogVariance in {what}"),
                    )?;
                    validate_equals(
                        &gm.current_utc_offset_valid,
                        &expected_gm.current_utc_offset_valid,
                        &format!("currentUtcOffsetValid in {what}"),
                    )?;
                    validate_equals(
                        &gm.time_traceable,
                        &expected_gm.time_traceable,
                        &format!("timeTraceable in {what}"),
                    )?;
                    validate_equals(
                        &gm.frequency_traceable,
                        &expected_gm.frequency_traceable,
                        &format!("frequencyTraceable in {what}"),
                    )?;
                    validate_equals(
                        &gm.time_source,
                        &expected_gm.time_source,
                        &format!("timeSource in {what}"),
                    )?;
                }

                if check_domain {
                    if let Some(ParamValue::Int(expected_domain)) =
                        instance.parameters().get("domainNumber")
                    {
                        let domain = pmc.get_domain(&config_file, &socket_file)?;
                        validate_equals(
                            &domain.domain_number,
                            expected_domain,
                            &format!("domainNumber of {} on {hostname}", expected.name),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Poll [`Self::verify_pmc_values`] until it passes.
    pub fn verify_pmc_values_with_retry(
        &self,
        setup: &PtpSetupDocument,
        check_domain: bool,
        timeout: Duration,
        poll_interval: Duration,
    ) -> PtpResult<()> {
        retry_until_ok(
            || self.verify_pmc_values(setup, check_domain),
            "expected PMC values",
            timeout,
            poll_interval,
        )
    }

    /// Check the deployed config files against the instance parameters
    /// that produced them.
    pub fn verify_config_files(&self, setup: &PtpSetupDocument) -> PtpResult<()> {
        for instance in &setup.ptp_configuration.ptp_instances.ptp4l {
            let parameters = instance.parameters();
            for hostname in &instance.instance_hostnames {
                info!("Verifying ptp4l config of {} on {hostname}", instance.name);
                let connection = self.provider.connection_for_host(hostname)?;
                let conf = ConfKeywords::new(connection).read(&ptp4l_config_file(&instance.name))?;
                for key in CHECKED_PTP4L_KEYS {
                    let Some(expected) = parameters.get(key) else {
                        continue;
                    };
                    let observed = conf.global(key).unwrap_or("<missing>").to_string();
                    validate_equals(
                        &observed,
                        &expected.to_string(),
                        &format!("{key} in ptp4l-{}.conf on {hostname}", instance.name),
                    )?;
                }
                let mut expected_ifaces = self.kernel_interfaces(setup, instance, hostname);
                expected_ifaces.sort();
                let mut observed_ifaces: Vec<String> =
                    conf.interfaces().iter().map(|s| s.to_string()).collect();
                observed_ifaces.sort();
                validate_equals(
                    &observed_ifaces.join(","),
                    &expected_ifaces.join(","),
                    &format!("interfaces of ptp4l-{}.conf on {hostname}", instance.name),
                )?;
            }
        }

        for instance in &setup.ptp_configuration.ptp_instances.ts2phc {
            let parameters = instance.parameters();
            let Some(expected_serialport) = parameters.get("ts2phc.nmea_serialport") else {
                continue;
            };
            for hostname in &instance.instance_hostnames {
                info!("Verifying ts2phc config of {} on {hostname}", instance.name);
                let connection = self.provider.connection_for_host(hostname)?;
                let conf =
                    ConfKeywords::new(connection).read(&ts2phc_config_file(&instance.name))?;
                let observed = conf
                    .global("ts2phc.nmea_serialport")
                    .unwrap_or("<missing>")
                    .to_string();
                validate_equals(
                    &observed,
                    &expected_serialport.to_string(),
                    &format!(
                        "ts2phc.nmea_serialport in ts2phc-{}.conf on {hostname}",
                        instance.name
                    ),
                )?;
            }
        }
        Ok(())
    }

    /// Wait for the system alarm list to be empty.
    pub fn verify_no_alarms(&self) -> PtpResult<()> {
        let connection = self.provider.active_controller_connection()?;
        AlarmKeywords::new(connection).wait_for_no_alarms(
            Duration::from_secs(self.settings.no_alarm_timeout_secs),
            Duration::from_secs(self.settings.alarm_poll_interval_secs),
        )
    }

    /// Kernel interfaces of `instance` on `hostname`, in the order the
    /// named interfaces declare them.
    fn kernel_interfaces(
        &self,
        setup: &PtpSetupDocument,
        instance: &InstanceSetup,
        hostname: &str,
    ) -> Vec<String> {
        instance
            .ptp_interface_names
            .iter()
            .filter_map(|name| setup.host_interface(name))
            .flat_map(|host_if| host_if.interfaces_for_hostname(hostname))
            .collect()
    }
}

/// [`validate_equals`] over a [`ValueExpectation`].
fn validate_expectation<T: PartialEq + Display>(
    observed: &T,
    expected: &ValueExpectation<T>,
    description: &str,
) -> PtpResult<()> {
    if expected.matches(observed) {
        info!("Validation Successful - {description}: {observed}");
        Ok(())
    } else {
        Err(PtpError::Validation {
            description: description.to_string(),
            expected: expected.describe(),
            observed: observed.to_string(),
        })
    }
}
