//! Convergence waits before a scenario runs.
//!
//! Scenarios assume the lab is already synchronized; these waiters poll the
//! PMC data sets until a port or clock reaches its expected steady state,
//! so a scenario does not start against a lab that is still converging
//! from a previous run.

use std::time::Duration;

use log::info;

use crate::connection::SharedConnection;
use crate::error::{PtpError, PtpResult};
use crate::pmc::{ptp4l_config_file, ptp4l_socket_file, Pmc};
use crate::settings::Settings;
use crate::validation::{retry_until_ok, validate_equals_with_retry};

pub struct ReadinessKeywords<'a> {
    connection: SharedConnection,
    settings: &'a Settings,
}

impl<'a> ReadinessKeywords<'a> {
    pub fn new(connection: SharedConnection, settings: &'a Settings) -> Self {
        Self {
            connection,
            settings,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.readiness_timeout_secs)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.settings.readiness_poll_interval_secs)
    }

    /// Wait until port `port_index` of `instance` reaches one of
    /// `expected_states`.
    pub fn wait_for_port_state(
        &self,
        instance: &str,
        port_index: usize,
        expected_states: &[&str],
    ) -> PtpResult<()> {
        let config_file = ptp4l_config_file(instance);
        let socket_file = ptp4l_socket_file(instance);
        let pmc = Pmc::new(self.connection.clone());
        info!("Waiting for port {port_index} of {instance} to reach {expected_states:?}");
        retry_until_ok(
            || {
                let ports = pmc.get_port_data_set(&config_file, &socket_file)?;
                let port = ports.get(port_index).ok_or_else(|| PtpError::Validation {
                    description: format!("port {port_index} of {instance}"),
                    expected: "a PORT_DATA_SET entry".into(),
                    observed: format!("{} entries", ports.len()),
                })?;
                if expected_states.contains(&port.port_state.as_str()) {
                    Ok(())
                } else {
                    Err(PtpError::Validation {
                        description: format!("port {port_index} state of {instance}"),
                        expected: format!("{expected_states:?}"),
                        observed: port.port_state.clone(),
                    })
                }
            },
            &format!("port {port_index} of {instance} in {expected_states:?}"),
            self.timeout(),
            self.poll_interval(),
        )
    }

    /// Wait until the instance's advertised grandmaster clock class is
    /// `expected`.
    pub fn wait_for_gm_clock_class(&self, instance: &str, expected: i64) -> PtpResult<()> {
        let config_file = ptp4l_config_file(instance);
        let socket_file = ptp4l_socket_file(instance);
        let pmc = Pmc::new(self.connection.clone());
        validate_equals_with_retry(
            || {
                Ok(pmc
                    .get_parent_data_set(&config_file, &socket_file)?
                    .gm_clock_class)
            },
            &expected,
            &format!("gm.ClockClass of {instance}"),
            self.timeout(),
            self.poll_interval(),
        )
    }

    /// Wait until the instance's own grandmaster settings advertise clock
    /// class `expected`.
    pub fn wait_for_clock_class(&self, instance: &str, expected: i64) -> PtpResult<()> {
        let config_file = ptp4l_config_file(instance);
        let socket_file = ptp4l_socket_file(instance);
        let pmc = Pmc::new(self.connection.clone());
        validate_equals_with_retry(
            || {
                Ok(pmc
                    .get_grandmaster_settings(&config_file, &socket_file)?
                    .clock_class)
            },
            &expected,
            &format!("clockClass of {instance}"),
            self.timeout(),
            self.poll_interval(),
        )
    }
}
