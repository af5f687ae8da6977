//! Lab topology configuration.
//!
//! A JSON5 document describes the physical PTP wiring of a lab: which hosts
//! carry timing NICs, which kernel interface is each NIC's base port, which
//! GNSS switch port feeds it and how its SMA connectors are cabled. The
//! document deserializes into [`PtpLabConfig`], and [`render_context`]
//! flattens it into the token namespace that setup templates substitute
//! from (`{{ controller_0.nic1.base_port }}`). Hostnames contain `-` but
//! template tokens cannot, so host keys are normalized `-` to `_`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{PtpError, PtpResult};

/// One timing NIC on a lab host.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NicConfig {
    /// Kernel interface of the NIC's first port (`enp81s0f0`-style).
    pub base_port: String,
    /// Port on the GNSS antenna switch feeding this NIC, if any.
    #[serde(default)]
    pub gnss_switch_port: Option<String>,
    #[serde(default)]
    pub sma1_to_nic1: Option<String>,
    #[serde(default)]
    pub sma2_to_nic1: Option<String>,
    #[serde(default)]
    pub sma1_to_nic2: Option<String>,
    #[serde(default)]
    pub sma2_to_nic2: Option<String>,
    #[serde(default)]
    pub conn_to_ctrl0_nic1: Option<String>,
    #[serde(default)]
    pub conn_to_ctrl0_nic2: Option<String>,
    #[serde(default)]
    pub conn_to_ctrl1_nic1: Option<String>,
    #[serde(default)]
    pub conn_to_ctrl1_nic2: Option<String>,
}

/// All timing NICs on one host, keyed by nic name (`nic1`, `nic2`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
    pub nics: BTreeMap<String, NicConfig>,
}

/// The lab's PTP wiring, keyed by hostname.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PtpLabConfig {
    pub hosts: BTreeMap<String, HostConfig>,
}

impl PtpLabConfig {
    /// Load from a JSON5 file.
    pub fn from_file(path: &Path) -> PtpResult<Self> {
        let text = std::fs::read_to_string(path)?;
        json5::from_str(&text)
            .map_err(|e| PtpError::Config(format!("invalid lab config {}: {e}", path.display())))
    }

    /// Look up a host, accepting either the raw hostname or its normalized
    /// form (`controller-0` and `controller_0` both resolve).
    pub fn host(&self, hostname: &str) -> PtpResult<&HostConfig> {
        let normalized = normalize_hostname(hostname);
        self.hosts
            .iter()
            .find(|(name, _)| normalize_hostname(name) == normalized)
            .map(|(_, host)| host)
            .ok_or_else(|| PtpError::Config(format!("host '{hostname}' not in lab config")))
    }

    pub fn nic(&self, hostname: &str, nic: &str) -> PtpResult<&NicConfig> {
        self.host(hostname)?.nics.get(nic).ok_or_else(|| {
            PtpError::Config(format!("nic '{nic}' not configured on host '{hostname}'"))
        })
    }

    /// Token namespace for template rendering:
    /// `<host_key>.<nic>.<field>` with host keys normalized `-` to `_` and
    /// only wired (non-`None`) fields present.
    pub fn render_context(&self) -> Value {
        let mut hosts = Map::new();
        for (hostname, host) in &self.hosts {
            let mut nics = Map::new();
            for (nic_name, nic) in &host.nics {
                let mut fields = Map::new();
                fields.insert("base_port".into(), Value::String(nic.base_port.clone()));
                let optional = [
                    ("gnss_switch_port", &nic.gnss_switch_port),
                    ("sma1_to_nic1", &nic.sma1_to_nic1),
                    ("sma2_to_nic1", &nic.sma2_to_nic1),
                    ("sma1_to_nic2", &nic.sma1_to_nic2),
                    ("sma2_to_nic2", &nic.sma2_to_nic2),
                    ("conn_to_ctrl0_nic1", &nic.conn_to_ctrl0_nic1),
                    ("conn_to_ctrl0_nic2", &nic.conn_to_ctrl0_nic2),
                    ("conn_to_ctrl1_nic1", &nic.conn_to_ctrl1_nic1),
                    ("conn_to_ctrl1_nic2", &nic.conn_to_ctrl1_nic2),
                ];
                for (key, value) in optional {
                    if let Some(value) = value {
                        fields.insert(key.into(), Value::String(value.clone()));
                    }
                }
                nics.insert(nic_name.clone(), Value::Object(fields));
            }
            hosts.insert(normalize_hostname(hostname), Value::Object(nics));
        }
        Value::Object(hosts)
    }
}

/// Template tokens cannot contain `-`.
pub fn normalize_hostname(hostname: &str) -> String {
    hostname.replace('-', "_")
}
