//! External grandmaster on a Proxmox host.
//!
//! Some scenarios need an extra grandmaster outside the lab's NICs; it runs
//! a plain (non-templated) ptp4l on a Proxmox machine. The seam is the
//! [`ProxmoxGrandmaster`] trait so scenarios stay testable without that
//! machine; [`ProxmoxKeywords`] is the real implementation over a shell
//! session.

use std::time::Duration;

use log::info;

use crate::connection::SharedConnection;
use crate::error::PtpResult;
use crate::pmc::Pmc;
use crate::settings::Settings;
use crate::validation::retry_until_ok;

/// The plain ptp4l deployment paths on the Proxmox host.
const PROXMOX_CONFIG_FILE: &str = "/etc/linuxptp/ptp4l.conf";
const PROXMOX_SOCKET_FILE: &str = "/var/run/ptp4l";

pub trait ProxmoxGrandmaster {
    /// Start the grandmaster and wait until its management interface
    /// answers.
    fn prepare(&self) -> PtpResult<()>;

    /// Stop the grandmaster.
    fn stop(&self) -> PtpResult<()>;
}

pub struct ProxmoxKeywords<'a> {
    connection: SharedConnection,
    settings: &'a Settings,
}

impl<'a> ProxmoxKeywords<'a> {
    pub fn new(connection: SharedConnection, settings: &'a Settings) -> Self {
        Self {
            connection,
            settings,
        }
    }
}

impl ProxmoxGrandmaster for ProxmoxKeywords<'_> {
    fn prepare(&self) -> PtpResult<()> {
        info!("Starting ptp4l on the Proxmox grandmaster");
        self.connection
            .borrow_mut()
            .send_as_sudo("systemctl start ptp4l.service")?;
        let pmc = Pmc::new(self.connection.clone());
        retry_until_ok(
            || {
                pmc.get_default_data_set(PROXMOX_CONFIG_FILE, PROXMOX_SOCKET_FILE)?;
                Ok(())
            },
            "Proxmox ptp4l answering management queries",
            Duration::from_secs(self.settings.readiness_timeout_secs),
            Duration::from_secs(self.settings.readiness_poll_interval_secs),
        )
    }

    fn stop(&self) -> PtpResult<()> {
        info!("Stopping ptp4l on the Proxmox grandmaster");
        self.connection
            .borrow_mut()
            .send_as_sudo("systemctl stop ptp4l.service")?;
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
    fn test_prepare_starts_and_waits_for_pmc() {
        let conn = Rc::new(RefCell::new(ScriptedConnection::new()));
        conn.borrow_mut().on("systemctl start ptp4l.service", &[]);
        conn.borrow_mut().on("systemctl stop ptp4l.service", &[]);
        conn.borrow_mut().on(
            "GET DEFAULT_DATA_SET",
            &[
                "sending: GET DEFAULT_DATA_SET",
                "    507c6f.fffe.21a1c0-0 seq 0 RESPONSE MANAGEMENT DEFAULT_DATA_SET",
                "        twoStepFlag             1",
                "        slaveOnly               0",
                "        numberPorts             1",
                "        priority1               128",
                "        clockClass              248",
                "        clockAccuracy           0xfe",
                "        offsetScaledLogVariance 0xffff",
                "        priority2               128",
                "        clockIdentity           507c6f.fffe.21a1c0",
                "        domainNumber            0",
            ],
        );
        let settings = Settings::default();
        let proxmox = ProxmoxKeywords::new(conn.clone(), &settings);
        proxmox.prepare().unwrap();
        proxmox.stop().unwrap();
        let conn = conn.borrow();
        assert!(conn.saw("sudo systemctl start ptp4l.service"));
        assert!(conn.saw("sudo systemctl stop ptp4l.service"));
        assert!(conn.saw("-f /etc/linuxptp/ptp4l.conf -s /var/run/ptp4l"));
    }
}
