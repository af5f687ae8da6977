//! Expected PMC values per instance and host.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::normalize_hostname;

/// An expected value: either one exact value or a set of acceptable ones.
/// Port states in particular converge through transient states, so a list
/// like `["SLAVE", "UNCALIBRATED"]` is accepted while polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueExpectation<T> {
    One(T),
    AnyOf(Vec<T>),
}

impl<T: PartialEq + fmt::Display> ValueExpectation<T> {
    pub fn matches(&self, observed: &T) -> bool {
        match self {
            ValueExpectation::One(expected) => expected == observed,
            ValueExpectation::AnyOf(options) => options.contains(observed),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ValueExpectation::One(expected) => expected.to_string(),
            ValueExpectation::AnyOf(options) => format!(
                "one of [{}]",
                options
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// Expected PMC values for one ptp4l instance; per-host data is keyed by
/// hostname at the same level as `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ptp4lExpected {
    pub name: String,
    #[serde(flatten)]
    pub hosts: BTreeMap<String, HostExpectation>,
}

impl Ptp4lExpected {
    /// Expectations for `hostname`, tolerant of `-`/`_` spelling.
    pub fn host(&self, hostname: &str) -> Option<&HostExpectation> {
        if let Some(host) = self.hosts.get(hostname) {
            return Some(host);
        }
        let wanted = normalize_hostname(hostname);
        self.hosts
            .iter()
            .find(|(key, _)| normalize_hostname(key) == wanted)
            .map(|(_, host)| host)
    }

    pub fn hostnames(&self) -> Vec<&String> {
        self.hosts.keys().collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostExpectation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_data_set: Option<ExpectedParentDataSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_properties_data_set: Option<ExpectedTimeProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grandmaster_settings: Option<ExpectedGrandmasterSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_data_set: Option<Vec<ExpectedPort>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedParentDataSet {
    pub gm_clock_class: ValueExpectation<i64>,
    pub gm_clock_accuracy: String,
    pub gm_offset_scaled_log_variance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedTimeProperties {
    pub current_utc_offset: i64,
    pub current_utc_offset_valid: i64,
    pub time_traceable: i64,
    pub frequency_traceable: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedGrandmasterSettings {
    pub clock_class: ValueExpectation<i64>,
    pub clock_accuracy: String,
    pub offset_scaled_log_variance: String,
    pub current_utc_offset_valid: i64,
    pub time_traceable: i64,
    pub frequency_traceable: i64,
    pub time_source: String,
}

/// Expected state of one port, keyed by kernel interface. The optional
/// `parent_port_identity` names the remote port this one should be synced
/// to; the verifier resolves it to a clock identity through the observed
/// port identity mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedPort {
    pub interface: String,
    pub port_state: ValueExpectation<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_port_identity: Option<ParentPortIdentityRef>,
}

/// Reference to the port an upstream parent identity should come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentPortIdentityRef {
    pub name: String,
    pub hostname: String,
    pub interface: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_expectation_matching() {
        let one: ValueExpectation<i64> = serde_json::from_str("6").unwrap();
        assert!(one.matches(&6));
        assert!(!one.matches(&7));
        let any: ValueExpectation<String> =
            serde_json::from_str(r#"["SLAVE", "UNCALIBRATED"]"#).unwrap();
        assert!(any.matches(&"UNCALIBRATED".to_string()));
        assert!(!any.matches(&"MASTER".to_string()));
        assert_eq!(any.describe(), "one of [SLAVE, UNCALIBRATED]");
    }

    #[test]
    fn test_hosts_flatten_beside_name() {
        let expected: Ptp4lExpected = serde_json::from_value(serde_json::json!({
            "name": "ptp1",
            "controller-0": {
                "parent_data_set": {
                    "gm_clock_class": [6, 7],
                    "gm_clock_accuracy": "0x20",
                    "gm_offset_scaled_log_variance": "0x4e5d",
                },
            },
        }))
        .unwrap();
        assert_eq!(expected.name, "ptp1");
        let host = expected.host("controller_0").unwrap();
        let parent = host.parent_data_set.as_ref().unwrap();
        assert!(parent.gm_clock_class.matches(&7));
    }
}
