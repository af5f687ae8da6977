//! Setup documents: expected PTP configuration for a lab.
//!
//! A setup document is a JSON5 template describing the ptp4l/phc2sys/
//! ts2phc/clock instances a lab should be running, the per-host PMC values
//! they are expected to report once converged, and named test scenarios.
//! Rendering substitutes `{{ dotted.token }}` placeholders from the lab
//! topology (plus a defaults document), parses the result as JSON5 and
//! deserializes it into the typed [`PtpSetupDocument`] tree.
//!
//! [`PtpSetupDocument::filter`] cuts a full document down to a selected set
//! of `(instance, hostname, interfaces)` triples and applies expectation
//! overrides via a recursive deep merge, producing the partial setup a
//! single verification step runs against.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::config::PtpLabConfig;
use crate::error::{PtpError, PtpResult};

pub mod expected;
pub mod merge;
pub mod model;
pub mod template;

pub use expected::{
    ExpectedGrandmasterSettings, ExpectedParentDataSet, ExpectedPort, ExpectedTimeProperties,
    HostExpectation, ParentPortIdentityRef, Ptp4lExpected, ValueExpectation,
};
pub use model::{
    HostInterfaceSetup, InstanceSetup, ParamValue, PtpConfiguration, PtpInstances,
    PtpSetupDocument, SetupVerification, parse_instance_parameters,
};

/// Renders setup templates against one lab's token namespace.
pub struct SetupRenderer {
    context: Value,
}

impl SetupRenderer {
    /// Build the render context from the lab topology and an optional
    /// defaults document (default status values merged over the topology
    /// tokens).
    pub fn new(lab: &PtpLabConfig, defaults: Option<&Value>) -> Self {
        let mut context = lab.render_context();
        if let Some(defaults) = defaults {
            merge::deep_merge(&mut context, defaults);
        }
        Self { context }
    }

    pub fn render_file(&self, path: &Path) -> PtpResult<PtpSetupDocument> {
        let text = std::fs::read_to_string(path)?;
        self.render_str(&text)
    }

    /// Substitute tokens, parse JSON5 and deserialize the document.
    pub fn render_str(&self, text: &str) -> PtpResult<PtpSetupDocument> {
        let rendered = template::render_template(text, &self.context)?;
        let value: Value = json5::from_str(&rendered)
            .map_err(|e| PtpError::Template(format!("rendered setup is not valid JSON5: {e}")))?;
        let value = template::parse_embedded_json(value);
        let document: PtpSetupDocument = serde_json::from_value(value)
            .map_err(|e| PtpError::Template(format!("setup document is malformed: {e}")))?;
        document.validate()?;
        Ok(document)
    }
}

/// One `(instance, hostname, interfaces)` triple of a filter request.
#[derive(Debug, Clone)]
pub struct Selection {
    pub instance: String,
    pub hostname: String,
    pub interfaces: Vec<String>,
}

impl Selection {
    pub fn new(instance: &str, hostname: &str, interfaces: &[&str]) -> Self {
        Self {
            instance: instance.to_string(),
            hostname: hostname.to_string(),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PtpSetupDocument {
    /// Cut this document down to the selected instances/hosts/interfaces
    /// and deep-merge `overrides` (entries keyed by instance `name`) into
    /// the filtered expectations. Overrides win at every level.
    pub fn filter(&self, selections: &[Selection], overrides: &[Value]) -> PtpResult<Self> {
        let mut by_instance: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for selection in selections {
            by_instance
                .entry(selection.instance.clone())
                .or_default()
                .insert(selection.hostname.clone(), selection.interfaces.clone());
        }

        for instance in by_instance.keys() {
            if !self
                .ptp_configuration
                .ptp_instances
                .ptp4l
                .iter()
                .any(|i| &i.name == instance)
            {
                return Err(PtpError::Config(format!(
                    "selection names unknown ptp4l instance '{instance}'"
                )));
            }
        }

        let mut filtered = PtpSetupDocument::default();

        // Instances: keep selected ones, narrowed to the selected hosts
        // and interface names.
        for instance in &self.ptp_configuration.ptp_instances.ptp4l {
            let Some(hosts) = by_instance.get(&instance.name) else {
                continue;
            };
            let selected_ifaces: Vec<String> = hosts.values().flatten().cloned().collect();
            filtered
                .ptp_configuration
                .ptp_instances
                .ptp4l
                .push(InstanceSetup {
                    name: instance.name.clone(),
                    instance_hostnames: hosts.keys().cloned().collect(),
                    instance_parameters: instance.instance_parameters.clone(),
                    ptp_interface_names: selected_ifaces,
                });
        }

        // Host interfaces referenced by any selection.
        let required: Vec<&String> = by_instance.values().flat_map(|h| h.values()).flatten().collect();
        for host_if in &self.ptp_configuration.ptp_host_ifs {
            if required.iter().any(|name| **name == host_if.name) {
                filtered.ptp_configuration.ptp_host_ifs.push(host_if.clone());
            }
        }

        // Expectations: keep the selected hosts, with port expectations
        // narrowed to the interfaces resolved from the selected names.
        let mut filtered_pmc_values = Vec::new();
        for expected in self.pmc_values() {
            let Some(hosts) = by_instance.get(&expected.name) else {
                continue;
            };
            let mut filtered_instance = Ptp4lExpected {
                name: expected.name.clone(),
                hosts: BTreeMap::new(),
            };
            for (hostname, selected_iface_names) in hosts {
                let Some(host_data) = expected.host(hostname) else {
                    continue;
                };
                let mut filtered_host = host_data.clone();
                if let Some(ports) = &host_data.port_data_set {
                    if !selected_iface_names.is_empty() {
                        let actual = self.resolve_interfaces(selected_iface_names, hostname);
                        let kept: Vec<ExpectedPort> = ports
                            .iter()
                            .filter(|p| actual.contains(&p.interface))
                            .cloned()
                            .collect();
                        filtered_host.port_data_set =
                            if kept.is_empty() { None } else { Some(kept) };
                    }
                }
                filtered_instance
                    .hosts
                    .insert(hostname.clone(), filtered_host);
            }
            filtered_pmc_values.push(filtered_instance);
        }

        // Apply overrides over the filtered expectations.
        for override_value in overrides {
            let Some(name) = override_value.get("name").and_then(Value::as_str) else {
                return Err(PtpError::Config(
                    "expectation override is missing a 'name'".into(),
                ));
            };
            let Some(instance) = filtered_pmc_values.iter_mut().find(|i| i.name == name) else {
                continue;
            };
            let mut merged = serde_json::to_value(&*instance)
                .map_err(|e| PtpError::Config(format!("expectation not serializable: {e}")))?;
            merge::deep_merge(&mut merged, override_value);
            *instance = serde_json::from_value(merged).map_err(|e| {
                PtpError::Config(format!("override for instance '{name}' is malformed: {e}"))
            })?;
        }

        filtered.verification = vec![SetupVerification {
            kind: "pmc_value".to_string(),
            pmc_values: filtered_pmc_values,
        }];
        filtered.validate()?;
        Ok(filtered)
    }

    /// Kernel interfaces the named ptp_host_ifs map to on `hostname`.
    fn resolve_interfaces(&self, iface_names: &[String], hostname: &str) -> Vec<String> {
        let mut actual = Vec::new();
        for name in iface_names {
            for host_if in &self.ptp_configuration.ptp_host_ifs {
                if &host_if.name == name {
                    actual.extend(host_if.interfaces_for_hostname(hostname));
                }
            }
        }
        actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab() -> PtpLabConfig {
        json5::from_str(
            r#"{
                hosts: {
                    "controller-0": {
                        nics: { nic1: { base_port: "enp81s0f0" } },
                    },
                    "controller-1": {
                        nics: { nic1: { base_port: "enp97s0f0" } },
                    },
                }
            }"#,
        )
        .unwrap()
    }

    const TEMPLATE: &str = r#"{
        ptp_configuration: {
            ptp_instances: {
                ptp4l: [
                    {
                        name: "ptp1",
                        instance_hostnames: ["controller-0", "controller-1"],
                        instance_parameters: "domainNumber=24 dataset_comparison=G.8275.x",
                        ptp_interface_names: ["ptp1if1"],
                    },
                    {
                        name: "ptp2",
                        instance_hostnames: ["controller-0"],
                        instance_parameters: "domainNumber=25",
                        ptp_interface_names: ["ptp2if1"],
                    },
                ],
            },
            ptp_host_ifs: [
                {
                    name: "ptp1if1",
                    controller_0_interfaces: ["{{ controller_0.nic1.base_port }}"],
                    controller_1_interfaces: ["{{ controller_1.nic1.base_port }}"],
                },
                {
                    name: "ptp2if1",
                    controller_0_interfaces: ["enp81s0f1"],
                },
            ],
        },
        verification: [
            {
                type: "pmc_value",
                pmc_values: [
                    {
                        name: "ptp1",
                        "controller-0": {
                            grandmaster_settings: {
                                clock_class: 6,
                                clock_accuracy: "0x20",
                                offset_scaled_log_variance: "0x4e5d",
                                current_utc_offset_valid: 1,
                                time_traceable: 1,
                                frequency_traceable: 1,
                                time_source: "0x20",
                            },
                            port_data_set: [
                                { interface: "{{ controller_0.nic1.base_port }}", port_state: "MASTER" },
                            ],
                        },
                        "controller-1": {
                            port_data_set: [
                                {
                                    interface: "{{ controller_1.nic1.base_port }}",
                                    port_state: ["SLAVE", "UNCALIBRATED"],
                                    parent_port_identity: {
                                        name: "ptp1",
                                        hostname: "controller-0",
                                        interface: "{{ controller_0.nic1.base_port }}",
                                    },
                                },
                            ],
                        },
                    },
                ],
            },
        ],
    }"#;

    fn render() -> PtpSetupDocument {
        SetupRenderer::new(&lab(), None).render_str(TEMPLATE).unwrap()
    }

    #[test]
    fn test_render_substitutes_tokens() {
        let doc = render();
        let host_if = &doc.ptp_configuration.ptp_host_ifs[0];
        assert_eq!(
            host_if.interfaces_for_hostname("controller-0"),
            vec!["enp81s0f0".to_string()]
        );
        let expected = &doc.pmc_values()[0];
        let ports = expected
            .host("controller-0")
            .unwrap()
            .port_data_set
            .as_ref()
            .unwrap();
        assert_eq!(ports[0].interface, "enp81s0f0");
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = serde_json::to_value(render()).unwrap();
        let b = serde_json::to_value(render()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_filter_keeps_only_selection() {
        let doc = render();
        let filtered = doc
            .filter(
                &[Selection::new("ptp1", "controller-1", &["ptp1if1"])],
                &[],
            )
            .unwrap();
        assert_eq!(filtered.ptp_configuration.ptp_instances.ptp4l.len(), 1);
        assert_eq!(
            filtered.ptp_configuration.ptp_instances.ptp4l[0].instance_hostnames,
            vec!["controller-1".to_string()]
        );
        assert_eq!(filtered.ptp_configuration.ptp_host_ifs.len(), 1);
        let expected = &filtered.pmc_values()[0];
        assert!(expected.host("controller-0").is_none());
        let ports = expected
            .host("controller-1")
            .unwrap()
            .port_data_set
            .as_ref()
            .unwrap();
        assert_eq!(ports.len(), 1);
        assert!(ports[0].port_state.matches(&"SLAVE".to_string()));
    }

    #[test]
    fn test_filter_unknown_instance_fails() {
        let doc = render();
        let result = doc.filter(&[Selection::new("ptp9", "controller-0", &[])], &[]);
        assert!(matches!(result, Err(PtpError::Config(_))));
    }

    #[test]
    fn test_filter_applies_overrides() {
        let doc = render();
        let override_value = serde_json::json!({
            "name": "ptp1",
            "controller-0": {
                "grandmaster_settings": { "clock_class": 165 },
            },
        });
        let filtered = doc
            .filter(
                &[Selection::new("ptp1", "controller-0", &["ptp1if1"])],
                &[override_value],
            )
            .unwrap();
        let gm = filtered.pmc_values()[0]
            .host("controller-0")
            .unwrap()
            .grandmaster_settings
            .clone()
            .unwrap();
        assert!(gm.clock_class.matches(&165));
        // Untouched sibling values survive the merge.
        assert_eq!(gm.time_source, "0x20");
    }
}
