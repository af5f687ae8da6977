//! Direct PHC device clock control via `phc_ctl`.
//!
//! Wraps the four linuxptp `phc_ctl` verbs with their positional output
//! parsing, plus a background adjustment loop used to provoke the
//! out-of-tolerance alarm: a remote shell loop keeps nudging the PHC while
//! the caller waits for the alarm to raise. The loop script carries its own
//! deadline, so even if the orchestrator dies mid-wait the remote clock
//! stops being skewed once the deadline passes; the normal path kills it by
//! PID file and removes the temp files whether the wait succeeded or not.

use log::info;

use crate::connection::SharedConnection;
use crate::error::{PtpError, PtpResult};

/// The adjustment step the loop applies, in seconds.
pub const LOOP_ADJ_STEP: &str = "0.0001";

pub struct PhcCtlKeywords {
    connection: SharedConnection,
}

impl PhcCtlKeywords {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }

    fn run(&self, command: &str) -> PtpResult<String> {
        let output = self.connection.borrow_mut().send_as_sudo(command)?;
        let rc = self.connection.borrow().last_return_code();
        if rc != 0 {
            return Err(PtpError::Precondition(format!(
                "'{command}' failed with return code {rc}"
            )));
        }
        Ok(output.join(" "))
    }

    fn token(output: &str, index: usize, command: &str) -> PtpResult<String> {
        output
            .split_whitespace()
            .nth(index)
            .map(str::to_string)
            .ok_or_else(|| {
                PtpError::Parse(format!("unexpected {command} output: '{output}'"))
            })
    }

    /// `phc_ctl <device> get`; returns the clock time in seconds.
    ///
    /// ```text
    /// phc_ctl[643764.828]: clock time is 1739856255.215802036 or Tue Feb 18 05:24:15 2025
    /// ```
    pub fn get(&self, device: &str) -> PtpResult<String> {
        let output = self.run(&format!("phc_ctl {device} get"))?;
        Self::token(&output, 4, "phc_ctl get")
    }

    /// `phc_ctl <device> cmp`; returns the offset from CLOCK_REALTIME
    /// (`-37000000008ns`-style).
    pub fn cmp(&self, device: &str) -> PtpResult<String> {
        let output = self.run(&format!("phc_ctl {device} cmp"))?;
        Self::token(&output, 5, "phc_ctl cmp")
    }

    /// `phc_ctl <device> adj <seconds>`; returns the applied adjustment.
    pub fn adj(&self, device: &str, seconds: &str) -> PtpResult<String> {
        let output = self.run(&format!("phc_ctl {device} adj {seconds}"))?;
        Self::token(&output, 4, "phc_ctl adj")
    }

    /// `phc_ctl <device> set [seconds]`; defaults to CLOCK_REALTIME when no
    /// value is given. Returns the time the clock was set to.
    pub fn set(&self, device: &str, seconds: Option<&str>) -> PtpResult<String> {
        let cmd = match seconds {
            Some(seconds) => format!("phc_ctl {device} set {seconds}"),
            None => format!("phc_ctl {device} set"),
        };
        let output = self.run(&cmd)?;
        Self::token(&output, 5, "phc_ctl set")
    }

    /// Start a background loop adjusting `device` by [`LOOP_ADJ_STEP`] every
    /// second. The loop exits on its own after `ttl_secs`.
    pub fn start_adjustment_loop(&self, device: &str, ttl_secs: u64) -> PtpResult<PhcLoopHandle> {
        let script_path = format!("/tmp/phc_ctl_loop_{device}.sh");
        let pid_file = format!("/tmp/phc_ctl_loop_{device}.pid");
        info!("Starting phc_ctl adjustment loop on {device} (ttl {ttl_secs}s)");

        let script = format!(
            "end=$((SECONDS+{ttl_secs})); while [ $SECONDS -lt $end ]; do \
             phc_ctl {device} adj {LOOP_ADJ_STEP}; sleep 1; done"
        );
        let mut connection = self.connection.borrow_mut();
        connection.send(&format!("echo '{script}' > {script_path}"))?;
        connection.send_as_sudo(&format!(
            "nohup sh {script_path} > /dev/null 2>&1 & echo $! > {pid_file}"
        ))?;
        Ok(PhcLoopHandle {
            script_path,
            pid_file,
        })
    }

    /// Kill the loop and remove its files. Safe to call after the TTL has
    /// already stopped it.
    pub fn stop_adjustment_loop(&self, handle: &PhcLoopHandle) -> PtpResult<()> {
        info!("Stopping phc_ctl adjustment loop ({})", handle.pid_file);
        let mut connection = self.connection.borrow_mut();
        connection.send_as_sudo(&format!(
            "kill $(cat {}) 2>/dev/null; rm -f {} {}",
            handle.pid_file, handle.script_path, handle.pid_file
        ))?;
        Ok(())
    }
}

/// Remote artifacts of a running adjustment loop.
#[derive(Debug, Clone)]
pub struct PhcLoopHandle {
    pub script_path: String,
    pub pid_file: String,
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::connection::ScriptedConnection;

    fn keywords(conn: &Rc<RefCell<ScriptedConnection>>) -> PhcCtlKeywords {
        PhcCtlKeywords::new(conn.clone())
    }

    #[test]
    fn test_get_returns_clock_time_token() {
        let conn = Rc::new(RefCell::new(ScriptedConnection::new()));
        conn.borrow_mut().on(
            "phc_ctl enp81s0f3 get",
            &["phc_ctl[643764.828]: clock time is 1739856255.215802036 or Tue Feb 18 05:24:15 2025"],
        );
        let time = keywords(&conn).get("enp81s0f3").unwrap();
        assert_eq!(time, "1739856255.215802036");
    }

    #[test]
    fn test_cmp_returns_offset_token() {
        let conn = Rc::new(RefCell::new(ScriptedConnection::new()));
        conn.borrow_mut().on(
            "phc_ctl enp81s0f3 cmp",
            &["phc_ctl[645639.878]: offset from CLOCK_REALTIME is -37000000008ns"],
        );
        assert_eq!(keywords(&conn).cmp("enp81s0f3").unwrap(), "-37000000008ns");
    }

    #[test]
    fn test_adj_and_set() {
        let conn = Rc::new(RefCell::new(ScriptedConnection::new()));
        conn.borrow_mut().on(
            "adj 0.0001",
            &["phc_ctl[646368.470]: adjusted clock by 0.000100 seconds"],
        );
        conn.borrow_mut().on(
            "set",
            &["phc_ctl[647759.416]: set clock time to 1739860212.789318498 or Tue Feb 18 06:30:12 2025"],
        );
        let kw = keywords(&conn);
        assert_eq!(kw.adj("enp81s0f3", "0.0001").unwrap(), "0.000100");
        assert_eq!(kw.set("enp81s0f3", None).unwrap(), "1739860212.789318498");
        assert!(conn.borrow().saw("sudo phc_ctl enp81s0f3 set"));
    }

    #[test]
    fn test_failed_command_is_an_error() {
        let conn = Rc::new(RefCell::new(ScriptedConnection::new()));
        conn.borrow_mut()
            .on_with_code("phc_ctl missing0 get", &["No such device"], 1);
        assert!(keywords(&conn).get("missing0").is_err());
    }

    #[test]
    fn test_loop_lifecycle_commands() {
        let conn = Rc::new(RefCell::new(ScriptedConnection::new()));
        conn.borrow_mut().on("echo", &[]);
        conn.borrow_mut().on("nohup", &[]);
        conn.borrow_mut().on("kill", &[]);
        let kw = keywords(&conn);
        let handle = kw.start_adjustment_loop("enp81s0f3", 600).unwrap();
        kw.stop_adjustment_loop(&handle).unwrap();
        let conn = conn.borrow();
        assert!(conn.saw("end=$((SECONDS+600))"));
        assert!(conn.saw("nohup sh /tmp/phc_ctl_loop_enp81s0f3.sh"));
        assert!(conn.saw("rm -f /tmp/phc_ctl_loop_enp81s0f3.sh /tmp/phc_ctl_loop_enp81s0f3.pid"));
    }
}
