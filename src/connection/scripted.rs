//! Canned-output connection double.
//!
//! Rules map a command substring to a fixed response; every executed command
//! is recorded so tests can assert on the exact command stream the keywords
//! produced: deterministic responses, full command history.

use std::cell::RefCell;
use std::rc::Rc;

use crate::connection::{ConnectionProvider, PromptResponse, SharedConnection, SshConnection};
use crate::error::{PtpError, PtpResult};

struct Rule {
    needle: String,
    output: Vec<String>,
    return_code: i32,
    /// Remaining uses; `None` means unlimited.
    remaining: Option<u32>,
}

/// A scripted SSH session.
#[derive(Default)]
pub struct ScriptedConnection {
    rules: Vec<Rule>,
    history: Vec<String>,
    last_return_code: i32,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to any command containing `needle` with `output` and return
    /// code 0. Rules are matched in insertion order; the first match wins.
    pub fn on(&mut self, needle: &str, output: &[&str]) -> &mut Self {
        self.on_with_code(needle, output, 0)
    }

    /// Like [`Self::on`], with an explicit return code.
    pub fn on_with_code(&mut self, needle: &str, output: &[&str], return_code: i32) -> &mut Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            output: output.iter().map(|s| s.to_string()).collect(),
            return_code,
            remaining: None,
        });
        self
    }

    /// Respond once with `output`, then fall through to later rules. Lets a
    /// test script a value that changes across polls.
    pub fn on_once(&mut self, needle: &str, output: &[&str]) -> &mut Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            output: output.iter().map(|s| s.to_string()).collect(),
            return_code: 0,
            remaining: Some(1),
        });
        self
    }

    /// Every command executed on this session, in order.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// True if any executed command contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.history.iter().any(|c| c.contains(needle))
    }

    fn respond(&mut self, command: &str) -> PtpResult<Vec<String>> {
        self.history.push(command.to_string());
        for rule in self.rules.iter_mut() {
            if !command.contains(&rule.needle) {
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                if *remaining == 0 {
                    continue;
                }
                *remaining -= 1;
            }
            self.last_return_code = rule.return_code;
            return Ok(rule.output.clone());
        }
        Err(PtpError::Precondition(format!(
            "no scripted response for command: {command}"
        )))
    }
}

impl SshConnection for ScriptedConnection {
    fn send(&mut self, command: &str) -> PtpResult<Vec<String>> {
        self.respond(command)
    }

    fn send_as_sudo(&mut self, command: &str) -> PtpResult<Vec<String>> {
        self.respond(&format!("sudo {command}"))
    }

    fn last_return_code(&self) -> i32 {
        self.last_return_code
    }

    fn send_expect_prompts(
        &mut self,
        command: &str,
        prompts: &[PromptResponse],
    ) -> PtpResult<Vec<String>> {
        let mut output = self.respond(command)?;
        for prompt in prompts {
            output.extend(self.respond(&prompt.response)?);
        }
        Ok(output)
    }
}

/// Provider serving the same scripted sessions for every role, keyed by
/// hostname, with dedicated GNSS-server and controller sessions.
pub struct ScriptedProvider {
    hosts: Vec<(String, Rc<RefCell<ScriptedConnection>>)>,
    gnss_server: Rc<RefCell<ScriptedConnection>>,
    active_controller: Rc<RefCell<ScriptedConnection>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            hosts: Vec::new(),
            gnss_server: Rc::new(RefCell::new(ScriptedConnection::new())),
            active_controller: Rc::new(RefCell::new(ScriptedConnection::new())),
        }
    }

    pub fn add_host(&mut self, hostname: &str) -> Rc<RefCell<ScriptedConnection>> {
        let conn = Rc::new(RefCell::new(ScriptedConnection::new()));
        self.hosts.push((hostname.to_string(), conn.clone()));
        conn
    }

    pub fn gnss_server(&self) -> Rc<RefCell<ScriptedConnection>> {
        self.gnss_server.clone()
    }

    pub fn active_controller(&self) -> Rc<RefCell<ScriptedConnection>> {
        self.active_controller.clone()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionProvider for ScriptedProvider {
    fn connection_for_host(&self, hostname: &str) -> PtpResult<SharedConnection> {
        self.hosts
            .iter()
            .find(|(name, _)| name == hostname)
            .map(|(_, conn)| conn.clone() as SharedConnection)
            .ok_or_else(|| {
                PtpError::Precondition(format!("no scripted connection for host {hostname}"))
            })
    }

    fn gnss_server_connection(&self) -> PtpResult<SharedConnection> {
        Ok(self.gnss_server.clone())
    }

    fn active_controller_connection(&self) -> PtpResult<SharedConnection> {
        Ok(self.active_controller.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_rule_wins() {
        let mut conn = ScriptedConnection::new();
        conn.on("systemctl status", &["Active: active (running)"]);
        conn.on("systemctl", &["unused"]);
        let out = conn.send("systemctl status ptp4l@ptp1.service").unwrap();
        assert_eq!(out, vec!["Active: active (running)"]);
    }

    #[test]
    fn test_once_rule_is_consumed() {
        let mut conn = ScriptedConnection::new();
        conn.on_once("cat /sys", &["holdover"]);
        conn.on("cat /sys", &["locked_ho_acq"]);
        assert_eq!(conn.send("cat /sys/kernel/debug").unwrap(), vec!["holdover"]);
        assert_eq!(
            conn.send("cat /sys/kernel/debug").unwrap(),
            vec!["locked_ho_acq"]
        );
    }

    #[test]
    fn test_sudo_prefix_recorded_in_history() {
        let mut conn = ScriptedConnection::new();
        conn.on("pmc", &["sending: GET DOMAIN"]);
        conn.send_as_sudo("pmc -u -b 0 'GET DOMAIN'").unwrap();
        assert!(conn.saw("sudo pmc -u -b 0"));
    }

    #[test]
    fn test_unmatched_command_is_an_error() {
        let mut conn = ScriptedConnection::new();
        assert!(conn.send("uptime").is_err());
    }
}
