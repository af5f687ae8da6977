//! On-disk linuxptp configuration files.
//!
//! The deployed per-instance files live under `/etc/linuxptp/ptpinstance/`:
//! `ptp4l-<name>.conf` and `ts2phc-<name>.conf` hold a `[global]` section of
//! space-separated `key value` lines followed by one `[<interface>]` section
//! per associated port; `clock-conf.conf` holds one `[<interface>]` section
//! per pinned port with its SMA pin modes. This module reads and parses
//! those files so deployed state can be checked against the instance
//! parameters that produced it.

use std::collections::BTreeMap;

use crate::connection::SharedConnection;
use crate::error::{PtpError, PtpResult};

/// Per-instance file paths under the linuxptp instance directory.
pub fn ts2phc_config_file(instance: &str) -> String {
    format!("/etc/linuxptp/ptpinstance/ts2phc-{instance}.conf")
}

pub fn clock_config_file() -> String {
    "/etc/linuxptp/ptpinstance/clock-conf.conf".to_string()
}

/// A parsed linuxptp config file: ordered sections of `key value` lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfFile {
    sections: Vec<(String, BTreeMap<String, String>)>,
}

impl ConfFile {
    pub fn parse(lines: &[String]) -> Self {
        let mut sections: Vec<(String, BTreeMap<String, String>)> = Vec::new();
        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                let name = trimmed[1..trimmed.len() - 1].trim().to_string();
                sections.push((name, BTreeMap::new()));
                continue;
            }
            let Some((_, values)) = sections.last_mut() else {
                continue;
            };
            match trimmed.split_once(char::is_whitespace) {
                Some((key, value)) => {
                    values.insert(key.to_string(), value.trim().to_string());
                }
                None => {
                    values.insert(trimmed.to_string(), String::new());
                }
            }
        }
        Self { sections }
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections
            .iter()
            .find(|(section, _)| section == name)
            .map(|(_, values)| values)
    }

    /// Value of `key` in the `[global]` section.
    pub fn global(&self, key: &str) -> Option<&str> {
        self.section("global")
            .and_then(|values| values.get(key))
            .map(String::as_str)
    }

    /// Interface section names, in file order. `global` and the unicast
    /// master table are not interfaces.
    pub fn interfaces(&self) -> Vec<&str> {
        self.sections
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| *name != "global" && !name.starts_with("unicast_master_table"))
            .collect()
    }
}

/// One pinned port of `clock-conf.conf`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockConfEntry {
    pub ifname: String,
    pub sma_name: String,
    pub sma_mode: String,
}

/// Flatten a parsed `clock-conf.conf` into its pin entries.
pub fn clock_conf_entries(conf: &ConfFile) -> Vec<ClockConfEntry> {
    let mut entries = Vec::new();
    for ifname in conf.interfaces() {
        if let Some(values) = conf.section(ifname) {
            for (sma_name, sma_mode) in values {
                entries.push(ClockConfEntry {
                    ifname: ifname.to_string(),
                    sma_name: sma_name.clone(),
                    sma_mode: sma_mode.clone(),
                });
            }
        }
    }
    entries
}

/// Config file reader bound to one host session.
pub struct ConfKeywords {
    connection: SharedConnection,
}

impl ConfKeywords {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }

    /// `cat` and parse the file; missing files fail on the cat return code.
    pub fn read(&self, path: &str) -> PtpResult<ConfFile> {
        let output = self
            .connection
            .borrow_mut()
            .send_as_sudo(&format!("cat {path}"))?;
        let rc = self.connection.borrow().last_return_code();
        if rc != 0 {
            return Err(PtpError::Precondition(format!(
                "could not read {path} (return code {rc})"
            )));
        }
        Ok(ConfFile::parse(&output))
    }
}
