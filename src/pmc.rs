//! PMC management-client queries.
//!
//! Wraps the linuxptp `pmc` CLI: builds the `GET`/`SET` commands against a
//! ptp4l instance's config file and UDS socket, runs them under sudo on the
//! target host, and parses the indented response tables into typed data-set
//! objects. One `GET PORT_DATA_SET` returns one response block per port of
//! the instance, in the daemon's port order.

use crate::connection::SharedConnection;
use crate::error::{PtpError, PtpResult};

pub mod objects;
pub mod parser;

pub use objects::{
    CurrentDataSet, DefaultDataSet, DomainDataSet, GrandmasterSettings, ParentDataSet, PortDataSet,
    TimePropertiesDataSet,
};

/// ptp4l per-instance config file path.
pub fn ptp4l_config_file(instance: &str) -> String {
    format!("/etc/linuxptp/ptpinstance/ptp4l-{instance}.conf")
}

/// ptp4l per-instance management socket path.
pub fn ptp4l_socket_file(instance: &str) -> String {
    format!("/var/run/ptp4l-{instance}")
}

/// PMC command runner bound to one host session.
pub struct Pmc {
    connection: SharedConnection,
}

impl Pmc {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }

    fn get(&self, config_file: &str, socket_file: &str, data_set: &str) -> PtpResult<Vec<String>> {
        let cmd = format!("pmc -u -b 0 -f {config_file} -s {socket_file} 'GET {data_set}'");
        self.connection.borrow_mut().send_as_sudo(&cmd)
    }

    /// `GET PORT_DATA_SET`; one entry per port, in daemon port order.
    pub fn get_port_data_set(
        &self,
        config_file: &str,
        socket_file: &str,
    ) -> PtpResult<Vec<PortDataSet>> {
        let output = self.get(config_file, socket_file, "PORT_DATA_SET")?;
        parser::parse_response_blocks(&output)?
            .iter()
            .map(PortDataSet::from_block)
            .collect()
    }

    /// `GET PARENT_DATA_SET`.
    pub fn get_parent_data_set(
        &self,
        config_file: &str,
        socket_file: &str,
    ) -> PtpResult<ParentDataSet> {
        let output = self.get(config_file, socket_file, "PARENT_DATA_SET")?;
        ParentDataSet::from_block(&single_block(&output, "PARENT_DATA_SET")?)
    }

    /// `GET TIME_PROPERTIES_DATA_SET`.
    pub fn get_time_properties_data_set(
        &self,
        config_file: &str,
        socket_file: &str,
    ) -> PtpResult<TimePropertiesDataSet> {
        let output = self.get(config_file, socket_file, "TIME_PROPERTIES_DATA_SET")?;
        TimePropertiesDataSet::from_block(&single_block(&output, "TIME_PROPERTIES_DATA_SET")?)
    }

    /// `GET GRANDMASTER_SETTINGS_NP`.
    pub fn get_grandmaster_settings(
        &self,
        config_file: &str,
        socket_file: &str,
    ) -> PtpResult<GrandmasterSettings> {
        let output = self.get(config_file, socket_file, "GRANDMASTER_SETTINGS_NP")?;
        GrandmasterSettings::from_block(&single_block(&output, "GRANDMASTER_SETTINGS_NP")?)
    }

    /// `GET DEFAULT_DATA_SET`.
    pub fn get_default_data_set(
        &self,
        config_file: &str,
        socket_file: &str,
    ) -> PtpResult<DefaultDataSet> {
        let output = self.get(config_file, socket_file, "DEFAULT_DATA_SET")?;
        DefaultDataSet::from_block(&single_block(&output, "DEFAULT_DATA_SET")?)
    }

    /// `GET CURRENT_DATA_SET`.
    pub fn get_current_data_set(
        &self,
        config_file: &str,
        socket_file: &str,
    ) -> PtpResult<CurrentDataSet> {
        let output = self.get(config_file, socket_file, "CURRENT_DATA_SET")?;
        CurrentDataSet::from_block(&single_block(&output, "CURRENT_DATA_SET")?)
    }

    /// `GET DOMAIN`.
    pub fn get_domain(&self, config_file: &str, socket_file: &str) -> PtpResult<DomainDataSet> {
        let output = self.get(config_file, socket_file, "DOMAIN")?;
        DomainDataSet::from_block(&single_block(&output, "DOMAIN")?)
    }

    /// `SET GRANDMASTER_SETTINGS_NP` with the lab's fixed field values,
    /// varying only clockClass and timeTraceable.
    pub fn set_grandmaster_settings(
        &self,
        config_file: &str,
        socket_file: &str,
        clock_class: u8,
        time_traceable: u8,
    ) -> PtpResult<GrandmasterSettings> {
        let cmd = format!(
            "pmc -u -b 0 -f {config_file} -s {socket_file} 'SET GRANDMASTER_SETTINGS_NP \
             clockClass {clock_class} clockAccuracy 0xfe offsetScaledLogVariance 0xffff \
             currentUtcOffset 37 leap61 0 leap59 0 currentUtcOffsetValid 0 ptpTimescale 1 \
             timeTraceable {time_traceable} frequencyTraceable 0 timeSource 0xa0'"
        );
        let output = self.connection.borrow_mut().send_as_sudo(&cmd)?;
        GrandmasterSettings::from_block(&single_block(&output, "GRANDMASTER_SETTINGS_NP")?)
    }
}

fn single_block(output: &[String], data_set: &str) -> PtpResult<parser::ResponseBlock> {
    let mut blocks = parser::parse_response_blocks(output)?;
    if blocks.is_empty() {
        return Err(PtpError::Parse(format!(
            "no RESPONSE MANAGEMENT block in {data_set} output"
        )));
    }
    Ok(blocks.remove(0))
}
