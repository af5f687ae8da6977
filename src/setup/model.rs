//! Typed shape of a rendered setup document.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::normalize_hostname;
use crate::error::{PtpError, PtpResult};
use crate::setup::expected::Ptp4lExpected;

/// Top of a rendered setup document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtpSetupDocument {
    #[serde(default)]
    pub ptp_configuration: PtpConfiguration,
    #[serde(default)]
    pub verification: Vec<SetupVerification>,
    /// Scenario steps stay untyped here; the scenario reader owns their
    /// schema.
    #[serde(default)]
    pub test_scenarios: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtpConfiguration {
    #[serde(default)]
    pub ptp_instances: PtpInstances,
    #[serde(default)]
    pub ptp_host_ifs: Vec<HostInterfaceSetup>,
}

/// Instances grouped by service type, mirroring the templated systemd
/// units that run them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtpInstances {
    #[serde(default)]
    pub ptp4l: Vec<InstanceSetup>,
    #[serde(default)]
    pub phc2sys: Vec<InstanceSetup>,
    #[serde(default)]
    pub ts2phc: Vec<InstanceSetup>,
    #[serde(default)]
    pub clock: Vec<InstanceSetup>,
}

impl PtpInstances {
    /// All instances with the service type each belongs to.
    pub fn all(&self) -> Vec<(&'static str, &InstanceSetup)> {
        let mut all = Vec::new();
        all.extend(self.ptp4l.iter().map(|i| ("ptp4l", i)));
        all.extend(self.phc2sys.iter().map(|i| ("phc2sys", i)));
        all.extend(self.ts2phc.iter().map(|i| ("ts2phc", i)));
        all.extend(self.clock.iter().map(|i| ("clock", i)));
        all
    }
}

/// One configured instance of a linuxptp service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSetup {
    pub name: String,
    #[serde(default)]
    pub instance_hostnames: Vec<String>,
    #[serde(default)]
    pub instance_parameters: String,
    #[serde(default)]
    pub ptp_interface_names: Vec<String>,
}

impl InstanceSetup {
    pub fn runs_on(&self, hostname: &str) -> bool {
        let wanted = normalize_hostname(hostname);
        self.instance_hostnames
            .iter()
            .any(|h| normalize_hostname(h) == wanted)
    }

    pub fn parameters(&self) -> BTreeMap<String, ParamValue> {
        parse_instance_parameters(&self.instance_parameters)
    }
}

/// A named PTP interface and the kernel interfaces it maps to per host.
/// Host mappings are flattened `<hostname>_interfaces` keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInterfaceSetup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptp_interface_parameter: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl HostInterfaceSetup {
    /// Kernel interfaces this named interface maps to on `hostname`.
    pub fn interfaces_for_hostname(&self, hostname: &str) -> Vec<String> {
        let key = format!("{}_interfaces", normalize_hostname(hostname));
        match self.extra.get(&key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Hostnames this interface carries mappings for.
    pub fn hostnames(&self) -> Vec<String> {
        self.extra
            .keys()
            .filter_map(|k| k.strip_suffix("_interfaces"))
            .map(str::to_string)
            .collect()
    }
}

/// One entry of the document's `verification` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupVerification {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub pmc_values: Vec<Ptp4lExpected>,
}

impl PtpSetupDocument {
    /// Expected PMC values across all `pmc_value` verification entries.
    pub fn pmc_values(&self) -> Vec<&Ptp4lExpected> {
        self.verification
            .iter()
            .filter(|v| v.kind == "pmc_value")
            .flat_map(|v| v.pmc_values.iter())
            .collect()
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceSetup> {
        self.ptp_configuration
            .ptp_instances
            .all()
            .into_iter()
            .map(|(_, i)| i)
            .find(|i| i.name == name)
    }

    pub fn host_interface(&self, name: &str) -> Option<&HostInterfaceSetup> {
        self.ptp_configuration
            .ptp_host_ifs
            .iter()
            .find(|h| h.name == name)
    }

    /// Fail on dangling references between instances and named interfaces.
    pub fn validate(&self) -> PtpResult<()> {
        for (_, instance) in self.ptp_configuration.ptp_instances.all() {
            for iface_name in &instance.ptp_interface_names {
                if self.host_interface(iface_name).is_none() {
                    return Err(PtpError::Config(format!(
                        "instance '{}' references unknown interface '{iface_name}'",
                        instance.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Value of an instance parameter; all-digit values compare as integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
        }
    }
}

/// Parse a `key1=v1 key2=v2` instance-parameter string. Single-quoted
/// values keep their internal spaces (`cmdline_opts='-s enp81s0f2 -m'`);
/// quotes are stripped from the stored value.
pub fn parse_instance_parameters(parameters: &str) -> BTreeMap<String, ParamValue> {
    let mut parsed = BTreeMap::new();
    let mut tokens = parameters.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let Some((key, first)) = token.split_once('=') else {
            continue;
        };
        let mut raw = first.to_string();
        if raw.starts_with('\'') && !(raw.len() > 1 && raw.ends_with('\'')) {
            while let Some(next) = tokens.next() {
                raw.push(' ');
                raw.push_str(next);
                if next.ends_with('\'') {
                    break;
                }
            }
        }
        let value = raw.trim_matches('\'').to_string();
        let parsed_value = if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
            match value.parse() {
                Ok(n) => ParamValue::Int(n),
                Err(_) => ParamValue::Str(value),
            }
        } else {
            ParamValue::Str(value)
        };
        parsed.insert(key.to_string(), parsed_value);
    }
    parsed
}
