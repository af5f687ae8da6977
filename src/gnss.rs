//! GNSS antenna power control and discovery.
//!
//! The lab routes each NIC's GNSS feed through a GPIO-controlled antenna
//! switch on a dedicated server. Powering the feed on or off is a GPIO
//! export/direction/value write sequence there, followed by a long CGU
//! convergence wait on the host under test: the GNSS-1PPS input has to go
//! `valid` with both DPLLs `locked_ho_acq` after power-on, or `invalid`
//! with both DPLLs in `holdover` after power-off.
//!
//! Discovery helpers map a PTP interface to its NIC's PCI address (the GNSS
//! signal always lands on port 0 of the NIC, whatever port ts2phc uses) and
//! from there to the CGU debug file and the gnss serial device.

use std::time::Duration;

use log::info;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::cgu::CguKeywords;
use crate::config::PtpLabConfig;
use crate::connection::ConnectionProvider;
use crate::error::{PtpError, PtpResult};
use crate::settings::Settings;

static PCI_SLOT_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"PCI_SLOT_NAME=(.*)").unwrap()
});
static NMEA_SERIALPORT_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"ts2phc\.nmea_serialport\s*=\s*/dev/([^ ]*)").unwrap()
});

pub struct GnssKeywords<'a> {
    lab: &'a PtpLabConfig,
    provider: &'a dyn ConnectionProvider,
    settings: &'a Settings,
}

impl<'a> GnssKeywords<'a> {
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

    /// PCI address of the NIC carrying `interface`, read from the uevent
    /// file of the NIC's port 0.
    pub fn pci_slot_name(&self, hostname: &str, interface: &str) -> PtpResult<String> {
        let connection = self.provider.connection_for_host(hostname)?;
        // GNSS is always on port 0 of the NIC, whatever port the instance uses.
        let base = nic_port_zero(interface)?;
        let uevent_path = format!("/sys/class/net/{base}/device/uevent");
        let output = connection
            .borrow_mut()
            .send(&format!("grep PCI_SLOT_NAME {uevent_path}"))?;
        let joined = output.join(" ");
        PCI_SLOT_RE
            .captures(&joined)
            .map(|c| c[1].trim().to_string())
            .ok_or_else(|| PtpError::Parse(format!("PCI_SLOT_NAME not found in {uevent_path}")))
    }

    /// CGU debug file for the NIC carrying `interface`.
    pub fn cgu_location(&self, hostname: &str, interface: &str) -> PtpResult<String> {
        let pci_address = self.pci_slot_name(hostname, interface)?;
        Ok(format!("/sys/kernel/debug/ice/{pci_address}/cgu"))
    }

    /// GNSS serial device name (`gnss0`-style) for the NIC carrying
    /// `interface`, from the PCI device's gnss directory.
    pub fn gnss_serial_port(&self, hostname: &str, interface: &str) -> PtpResult<String> {
        let connection = self.provider.connection_for_host(hostname)?;
        let pci_address = self.pci_slot_name(hostname, interface)?;
        let gnss_dir = format!("/sys/bus/pci/devices/{pci_address}/gnss");
        let output = connection.borrow_mut().send(&format!("ls {gnss_dir}"))?;
        let name = output.join(" ").trim().to_string();
        if name.is_empty() {
            return Err(PtpError::Parse(format!("the directory {gnss_dir} is empty")));
        }
        Ok(name)
    }

    /// Power the GNSS feed of `hostname`/`nic` on and wait for the clock
    /// chain to lock.
    pub fn gnss_power_on(&self, hostname: &str, nic: &str) -> PtpResult<()> {
        info!("Powering on GNSS feed for {hostname} {nic}");
        let cgu_location = self.toggle_gpio(hostname, nic, 1)?;
        let host_connection = self.provider.connection_for_host(hostname)?;
        CguKeywords::new(host_connection).validate_input_and_dplls_with_retry(
            &cgu_location,
            "GNSS-1PPS",
            "valid",
            &["locked_ho_acq"],
            Duration::from_secs(self.settings.gnss_power_on_timeout_secs),
            Duration::from_secs(self.settings.cgu_poll_interval_secs),
        )
    }

    /// Power the GNSS feed of `hostname`/`nic` off and wait for the clock
    /// chain to fall into holdover.
    pub fn gnss_power_off(&self, hostname: &str, nic: &str) -> PtpResult<()> {
        info!("Powering off GNSS feed for {hostname} {nic}");
        let cgu_location = self.toggle_gpio(hostname, nic, 0)?;
        let host_connection = self.provider.connection_for_host(hostname)?;
        CguKeywords::new(host_connection).validate_input_and_dplls_with_retry(
            &cgu_location,
            "GNSS-1PPS",
            "invalid",
            &["holdover"],
            Duration::from_secs(self.settings.gnss_power_off_timeout_secs),
            Duration::from_secs(self.settings.cgu_poll_interval_secs),
        )
    }

    /// Run the GPIO write sequence on the GNSS server and return the CGU
    /// location of the affected NIC.
    fn toggle_gpio(&self, hostname: &str, nic: &str, value: u8) -> PtpResult<String> {
        let nic_config = self.lab.nic(hostname, nic)?;
        let gpio = nic_config.gnss_switch_port.as_deref().ok_or_else(|| {
            PtpError::Config(format!("GNSS switch port not configured for {hostname} {nic}"))
        })?;
        let cgu_location = self.cgu_location(hostname, &nic_config.base_port)?;

        let gnss = self.provider.gnss_server_connection()?;
        let mut gnss = gnss.borrow_mut();
        gnss.send(&format!(
            "if [ ! -d /sys/class/gpio/gpio{gpio} ]; then echo {gpio} > /sys/class/gpio/export; fi"
        ))?;
        gnss.send(&format!("echo out > /sys/class/gpio/gpio{gpio}/direction"))?;
        gnss.send(&format!("echo {value} > /sys/class/gpio/gpio{gpio}/value"))?;
        Ok(cgu_location)
    }
}

/// The interface of port 0 on the same NIC (`enp81s0f3` -> `enp81s0f0`).
pub fn nic_port_zero(interface: &str) -> PtpResult<String> {
    if interface.is_empty() {
        return Err(PtpError::Config("empty interface name".into()));
    }
    Ok(format!("{}0", &interface[..interface.len() - 1]))
}

/// GNSS serial device named by a `ts2phc.nmea_serialport=/dev/...` instance
/// parameter, if present.
pub fn extract_gnss_port(instance_parameters: &str) -> Option<String> {
    NMEA_SERIALPORT_RE
        .captures(instance_parameters)
        .map(|c| c[1].to_string())
}
