//! Interface link-state control via `ip link`.

use log::info;

use crate::connection::SharedConnection;
use crate::error::{PtpError, PtpResult};

/// Desired link state for an interface operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

impl LinkState {
    fn as_str(self) -> &'static str {
        match self {
            LinkState::Up => "up",
            LinkState::Down => "down",
        }
    }
}

pub struct IpKeywords {
    connection: SharedConnection,
}

impl IpKeywords {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }

    /// `ip link set <interface> up|down`.
    pub fn set_port_state(&self, interface: &str, state: LinkState) -> PtpResult<()> {
        info!("Setting {interface} {}", state.as_str());
        self.connection
            .borrow_mut()
            .send_as_sudo(&format!("ip link set {interface} {}", state.as_str()))?;
        let rc = self.connection.borrow().last_return_code();
        if rc != 0 {
            return Err(PtpError::Precondition(format!(
                "ip link set {interface} {} failed with return code {rc}",
                state.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::connection::ScriptedConnection;

    #[test]
    fn test_set_port_state() {
        let conn = Rc::new(RefCell::new(ScriptedConnection::new()));
        conn.borrow_mut().on("ip link set", &[]);
        IpKeywords::new(conn.clone())
            .set_port_state("enp81s0f3", LinkState::Down)
            .unwrap();
        assert!(conn.borrow().saw("sudo ip link set enp81s0f3 down"));
    }
}
