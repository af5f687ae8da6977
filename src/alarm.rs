//! Fault-management alarm queries and waiters.
//!
//! Alarms come from `fm alarm-list` on the active controller, rendered as an
//! ASCII table:
//!
//! ```text
//! +----------+---------------------------+-----------------+----------+----------------------------+
//! | Alarm ID | Reason Text               | Entity ID       | Severity | Time Stamp                 |
//! +----------+---------------------------+-----------------+----------+----------------------------+
//! | 100.119  | controller-0 is degraded  | host=controller | major    | 2024-05-07T11:20:52.071247 |
//! +----------+---------------------------+-----------------+----------+----------------------------+
//! ```
//!
//! An expected alarm is identified by `(alarm_id, entity_id)`; its reason is
//! matched either literally or against a regex, stated explicitly by the
//! expectation. The waiters poll the alarm list until every expectation is
//! present (appear) or absent (clear).

use std::time::Duration;

use log::info;
use regex::Regex;
use serde::Deserialize;

use crate::connection::SharedConnection;
use crate::error::{PtpError, PtpResult};
use crate::validation::retry_until_ok;

/// One row of `fm alarm-list`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub alarm_id: String,
    pub reason_text: String,
    pub entity_id: String,
    pub severity: String,
    pub time_stamp: String,
}

/// How an expected alarm's reason is matched.
#[derive(Debug, Clone)]
pub enum ReasonMatch {
    /// Exact reason text.
    Literal(String),
    /// Regex over the reason text.
    Pattern(Regex),
}

impl ReasonMatch {
    pub fn matches(&self, reason_text: &str) -> bool {
        match self {
            ReasonMatch::Literal(expected) => reason_text == expected,
            ReasonMatch::Pattern(re) => re.is_match(reason_text),
        }
    }
}

/// An alarm the harness waits on. Identity is `(alarm_id, entity_id)`; the
/// reason match is separate so table rows can carry dynamic detail (offsets,
/// interface names) without weakening identity.
#[derive(Debug, Clone)]
pub struct ExpectedAlarm {
    pub alarm_id: String,
    pub entity_id: String,
    pub reason: ReasonMatch,
}

impl ExpectedAlarm {
    /// True when `alarm` is this expectation.
    pub fn matches(&self, alarm: &Alarm) -> bool {
        alarm.alarm_id == self.alarm_id
            && alarm.entity_id == self.entity_id
            && self.reason.matches(&alarm.reason_text)
    }
}

/// Scenario-file form of an expected alarm: exactly one of `reason_text`
/// (literal) or `reason_pattern` (regex) must be given.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedAlarmSpec {
    pub alarm_id: String,
    pub entity_id: String,
    #[serde(default)]
    pub reason_text: Option<String>,
    #[serde(default)]
    pub reason_pattern: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default = "AlarmState::default_set")]
    pub state: AlarmState,
}

/// Whether the verification waits for the alarm to raise or to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Set,
    Clear,
}

impl AlarmState {
    fn default_set() -> Self {
        AlarmState::Set
    }
}

impl ExpectedAlarmSpec {
    /// Build the runtime expectation; fails when the reason fields are
    /// missing, doubled, or the pattern does not compile.
    pub fn to_expected(&self) -> PtpResult<ExpectedAlarm> {
        let reason = match (&self.reason_text, &self.reason_pattern) {
            (Some(text), None) => ReasonMatch::Literal(text.clone()),
            (None, Some(pattern)) => ReasonMatch::Pattern(Regex::new(pattern).map_err(|e| {
                PtpError::Config(format!("bad reason_pattern for alarm {}: {e}", self.alarm_id))
            })?),
            (Some(_), Some(_)) => {
                return Err(PtpError::Config(format!(
                    "alarm {} has both reason_text and reason_pattern",
                    self.alarm_id
                )))
            }
            (None, None) => {
                return Err(PtpError::Config(format!(
                    "alarm {} has neither reason_text nor reason_pattern",
                    self.alarm_id
                )))
            }
        };
        Ok(ExpectedAlarm {
            alarm_id: self.alarm_id.clone(),
            entity_id: self.entity_id.clone(),
            reason,
        })
    }
}

/// Parse the `fm alarm-list` table. The header row names the columns; each
/// data row must have the same number of cells.
pub fn parse_alarm_list(lines: &[String]) -> PtpResult<Vec<Alarm>> {
    let mut headers: Option<Vec<String>> = None;
    let mut alarms = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if !trimmed.starts_with('|') {
            continue;
        }
        let cells: Vec<String> = trimmed
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect();
        match &headers {
            None => headers = Some(cells),
            Some(header_cells) => {
                if cells.len() != header_cells.len() {
                    return Err(PtpError::Parse(
                        "number of headers and values do not match".into(),
                    ));
                }
                let field = |name: &str| -> PtpResult<String> {
                    header_cells
                        .iter()
                        .position(|h| h == name)
                        .map(|i| cells[i].clone())
                        .ok_or_else(|| {
                            PtpError::Parse(format!("alarm-list table missing column '{name}'"))
                        })
                };
                alarms.push(Alarm {
                    alarm_id: field("Alarm ID")?,
                    reason_text: field("Reason Text")?,
                    entity_id: field("Entity ID")?,
                    severity: field("Severity")?,
                    time_stamp: field("Time Stamp")?,
                });
            }
        }
    }
    Ok(alarms)
}

/// Alarm queries against the active controller.
pub struct AlarmKeywords {
    connection: SharedConnection,
}

impl AlarmKeywords {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }

    /// Current alarms, with `--nowrap` so rows stay single-line.
    pub fn alarm_list(&self) -> PtpResult<Vec<Alarm>> {
        let output = self
            .connection
            .borrow_mut()
            .send("fm alarm-list --nowrap")?;
        parse_alarm_list(&output)
    }

    /// Wait until every expectation matches a listed alarm.
    pub fn wait_for_alarms_to_appear(
        &self,
        expected: &[ExpectedAlarm],
        timeout: Duration,
        poll_interval: Duration,
    ) -> PtpResult<()> {
        info!("Waiting for {} alarm(s) to appear", expected.len());
        retry_until_ok(
            || {
                let alarms = self.alarm_list()?;
                for exp in expected {
                    if !alarms.iter().any(|a| exp.matches(a)) {
                        return Err(PtpError::Validation {
                            description: format!(
                                "alarm {} on {} present",
                                exp.alarm_id, exp.entity_id
                            ),
                            expected: "present".into(),
                            observed: "absent".into(),
                        });
                    }
                }
                Ok(())
            },
            "expected alarms present",
            timeout,
            poll_interval,
        )
    }

    /// Wait until no listed alarm matches any expectation.
    pub fn wait_for_alarms_cleared(
        &self,
        expected: &[ExpectedAlarm],
        timeout: Duration,
        poll_interval: Duration,
    ) -> PtpResult<()> {
        info!("Waiting for {} alarm(s) to clear", expected.len());
        retry_until_ok(
            || {
                let alarms = self.alarm_list()?;
                for exp in expected {
                    if alarms.iter().any(|a| exp.matches(a)) {
                        return Err(PtpError::Validation {
                            description: format!(
                                "alarm {} on {} cleared",
                                exp.alarm_id, exp.entity_id
                            ),
                            expected: "absent".into(),
                            observed: "present".into(),
                        });
                    }
                }
                Ok(())
            },
            "expected alarms cleared",
            timeout,
            poll_interval,
        )
    }

    /// Wait until the alarm list is completely empty. The terminal check of
    /// a full-configuration verification.
    pub fn wait_for_no_alarms(&self, timeout: Duration, poll_interval: Duration) -> PtpResult<()> {
        info!("Waiting for all alarms to clear");
        retry_until_ok(
            || {
                let alarms = self.alarm_list()?;
                if alarms.is_empty() {
                    Ok(())
                } else {
                    let summary = alarms
                        .iter()
                        .map(|a| format!("{} ({})", a.alarm_id, a.entity_id))
                        .collect::<Vec<_>>()
                        .join(", ");
                    Err(PtpError::Validation {
                        description: "system alarm list empty".into(),
                        expected: "no alarms".into(),
                        observed: summary,
                    })
                }
            },
            "no alarms on the system",
            timeout,
            poll_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<String> {
        [
            "+----------+---------------------------+------------------------------------+----------+----------------------------+",
            "| Alarm ID | Reason Text               | Entity ID                          | Severity | Time Stamp                 |",
            "+----------+---------------------------+------------------------------------+----------+----------------------------+",
            "| 750.002  | Application Apply Failure | k8s_application=sriov-fec-operator | major    | 2024-05-07T11:20:52.071247 |",
            "+----------+---------------------------+------------------------------------+----------+----------------------------+",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_parse_alarm_table() {
        let alarms = parse_alarm_list(&table()).unwrap();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].alarm_id, "750.002");
        assert_eq!(alarms[0].reason_text, "Application Apply Failure");
        assert_eq!(alarms[0].entity_id, "k8s_application=sriov-fec-operator");
        assert_eq!(alarms[0].severity, "major");
    }

    #[test]
    fn test_header_value_mismatch_is_an_error() {
        let mut lines = table();
        lines[1] =
            "| Alarm ID | Reason Text               | Entity ID                          | Severity |"
                .to_string();
        assert!(parse_alarm_list(&lines).is_err());
    }

    #[test]
    fn test_expectation_matching() {
        let alarm = Alarm {
            alarm_id: "100.119".into(),
            reason_text: "controller-1 Precision Time Protocol (PTP) signal loss".into(),
            entity_id: "host=controller-1.instance=ptp1.ptp=no-lock".into(),
            severity: "major".into(),
            time_stamp: String::new(),
        };
        let literal = ExpectedAlarm {
            alarm_id: "100.119".into(),
            entity_id: "host=controller-1.instance=ptp1.ptp=no-lock".into(),
            reason: ReasonMatch::Literal(
                "controller-1 Precision Time Protocol (PTP) signal loss".into(),
            ),
        };
        assert!(literal.matches(&alarm));
        let pattern = ExpectedAlarm {
            alarm_id: "100.119".into(),
            entity_id: "host=controller-1.instance=ptp1.ptp=no-lock".into(),
            reason: ReasonMatch::Pattern(Regex::new(r"signal loss$").unwrap()),
        };
        assert!(pattern.matches(&alarm));
        let wrong_entity = ExpectedAlarm {
            entity_id: "host=controller-0.instance=ptp1.ptp=no-lock".into(),
            ..literal.clone()
        };
        assert!(!wrong_entity.matches(&alarm));
    }

    #[test]
    fn test_spec_rejects_ambiguous_reason() {
        let both: ExpectedAlarmSpec = serde_json::from_value(serde_json::json!({
            "alarm_id": "100.119",
            "entity_id": "host=x",
            "reason_text": "a",
            "reason_pattern": "b",
        }))
        .unwrap();
        assert!(both.to_expected().is_err());

        let neither: ExpectedAlarmSpec = serde_json::from_value(serde_json::json!({
            "alarm_id": "100.119",
            "entity_id": "host=x",
        }))
        .unwrap();
        assert!(neither.to_expected().is_err());
    }
}
