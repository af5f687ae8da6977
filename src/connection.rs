//! SSH transport seam.
//!
//! Every keyword in the harness talks to lab hosts through the
//! [`SshConnection`] trait rather than a concrete client, so the concrete
//! transport lives outside the crate and tests drive the full stack against
//! the in-tree [`ScriptedConnection`] double. Connections are handed out by
//! a [`ConnectionProvider`], which maps hostnames to live sessions and knows
//! the two special sessions (the GNSS power server and the active
//! controller).

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::PtpResult;

pub mod scripted;

pub use scripted::ScriptedConnection;

/// One expected prompt and the text to type when it appears, for
/// interactive command sequences (`sudo su` password prompts and the root
/// shell that follows).
#[derive(Debug, Clone)]
pub struct PromptResponse {
    pub prompt: String,
    pub response: String,
}

impl PromptResponse {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }
}

/// A live shell session on one lab host.
///
/// Commands are synchronous: each call blocks until the remote command
/// completes and returns its output as lines. The return code of the most
/// recent command is available until the next one runs.
pub trait SshConnection {
    /// Run a command and return its output lines.
    fn send(&mut self, command: &str) -> PtpResult<Vec<String>>;

    /// Run a command under sudo and return its output lines.
    fn send_as_sudo(&mut self, command: &str) -> PtpResult<Vec<String>>;

    /// Return code of the most recently executed command.
    fn last_return_code(&self) -> i32;

    /// Run an interactive command, answering each expected prompt in order,
    /// and return the accumulated output lines.
    fn send_expect_prompts(
        &mut self,
        command: &str,
        prompts: &[PromptResponse],
    ) -> PtpResult<Vec<String>>;
}

/// Shared handle to a session. The harness is single-threaded, so interior
/// mutability through `RefCell` is sufficient.
pub type SharedConnection = Rc<RefCell<dyn SshConnection>>;

/// Maps lab roles to live sessions.
pub trait ConnectionProvider {
    /// Session on the named lab host.
    fn connection_for_host(&self, hostname: &str) -> PtpResult<SharedConnection>;

    /// Session on the server wired to the GNSS power GPIO.
    fn gnss_server_connection(&self) -> PtpResult<SharedConnection>;

    /// Session on the active controller (where `fm` and `system` CLIs run).
    fn active_controller_connection(&self) -> PtpResult<SharedConnection>;
}
