//! SMA connector pin control.
//!
//! The SMA1 pin files under `/sys/class/net/<if>/device` are root-owned and
//! not sudo-writable through a plain redirect, so the writes go through an
//! interactive `sudo su` session: answer the password prompt, then issue
//! the two echo commands at the root shell. After the pin flip the CGU is
//! polled until the SMA1 input and both DPLLs settle into the expected
//! state (locked after enable, holdover after disable).

use std::time::Duration;

use log::info;

use crate::cgu::CguKeywords;
use crate::config::PtpLabConfig;
use crate::connection::{ConnectionProvider, PromptResponse};
use crate::error::PtpResult;
use crate::gnss::GnssKeywords;
use crate::settings::Settings;

pub struct SmaKeywords<'a> {
    lab: &'a PtpLabConfig,
    provider: &'a dyn ConnectionProvider,
    settings: &'a Settings,
    sudo_password: String,
}

impl<'a> SmaKeywords<'a> {
    pub fn new(
        lab: &'a PtpLabConfig,
        provider: &'a dyn ConnectionProvider,
        settings: &'a Settings,
        sudo_password: impl Into<String>,
    ) -> Self {
        Self {
            lab,
            provider,
            settings,
            sudo_password: sudo_password.into(),
        }
    }

    /// Enable the SMA1 output of `hostname`/`nic` and wait for the clock
    /// chain to lock on it.
    pub fn enable_sma(&self, hostname: &str, nic: &str) -> PtpResult<()> {
        info!("Enabling SMA1 on {hostname} {nic}");
        self.write_sma1_pin(hostname, nic, "1 1", "1")?;
        self.wait_for_sma1(hostname, nic, "valid", &["locked_ho_acq"])
    }

    /// Disable the SMA1 output of `hostname`/`nic` and wait for the clock
    /// chain to fall into holdover.
    pub fn disable_sma(&self, hostname: &str, nic: &str) -> PtpResult<()> {
        info!("Disabling SMA1 on {hostname} {nic}");
        self.write_sma1_pin(hostname, nic, "0 1", "2")?;
        self.wait_for_sma1(hostname, nic, "invalid", &["holdover"])
    }

    fn write_sma1_pin(
        &self,
        hostname: &str,
        nic: &str,
        pin_value: &str,
        device_value: &str,
    ) -> PtpResult<()> {
        let interface = &self.lab.nic(hostname, nic)?.base_port;
        let pin_cmd =
            format!("echo {pin_value} > /sys/class/net/{interface}/device/ptp/ptp1/pins/SMA1");
        let device_cmd = format!("echo {device_value} > /sys/class/net/{interface}/device/SMA1");

        let prompts = [
            PromptResponse::new("Password:", self.sudo_password.clone()),
            PromptResponse::new("root@", pin_cmd),
            PromptResponse::new("root@", device_cmd),
        ];
        let connection = self.provider.connection_for_host(hostname)?;
        connection
            .borrow_mut()
            .send_expect_prompts("sudo su", &prompts)?;
        Ok(())
    }

    fn wait_for_sma1(
        &self,
        hostname: &str,
        nic: &str,
        expected_input_state: &str,
        expected_statuses: &[&str],
    ) -> PtpResult<()> {
        let interface = self.lab.nic(hostname, nic)?.base_port.clone();
        let gnss = GnssKeywords::new(self.lab, self.provider, self.settings);
        let cgu_location = gnss.cgu_location(hostname, &interface)?;
        let connection = self.provider.connection_for_host(hostname)?;
        CguKeywords::new(connection).validate_input_and_dplls_with_retry(
            &cgu_location,
            "SMA1",
            expected_input_state,
            expected_statuses,
            Duration::from_secs(self.settings.sma_timeout_secs),
            Duration::from_secs(self.settings.sma_poll_interval_secs),
        )
    }
}
