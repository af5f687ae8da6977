//! Runs the shipped scenarios end to end against scripted shell sessions,
//! checking both the commands issued and the verification outcomes.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ptp_harness::config::PtpLabConfig;
use ptp_harness::connection::scripted::{ScriptedConnection, ScriptedProvider};
use ptp_harness::scenario::ScenarioExecutor;
use ptp_harness::settings::Settings;
use ptp_harness::setup::{PtpSetupDocument, SetupRenderer};

fn resource(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("resources/ptp")
        .join(name)
}

fn lab() -> PtpLabConfig {
    PtpLabConfig::from_file(&resource("lab.json5")).unwrap()
}

fn rendered(lab: &PtpLabConfig) -> PtpSetupDocument {
    let defaults: serde_json::Value =
        json5::from_str(&std::fs::read_to_string(resource("defaults.json5")).unwrap()).unwrap();
    SetupRenderer::new(lab, Some(&defaults))
        .render_file(&resource("setup.json5"))
        .unwrap()
}

fn fast_settings() -> Settings {
    Settings {
        default_timeout_secs: 1,
        default_poll_interval_secs: 1,
        alarm_timeout_secs: 1,
        alarm_poll_interval_secs: 1,
        gnss_power_on_timeout_secs: 1,
        gnss_power_off_timeout_secs: 1,
        cgu_poll_interval_secs: 1,
        service_stop_settle_secs: 0,
        ..Settings::default()
    }
}

fn script(conn: &Rc<RefCell<ScriptedConnection>>, needle: &str, lines: &[&str]) {
    conn.borrow_mut().on(needle, lines);
}

fn script_once(conn: &Rc<RefCell<ScriptedConnection>>, needle: &str, lines: &[&str]) {
    conn.borrow_mut().on_once(needle, lines);
}

fn tgm_port_data_set() -> Vec<&'static str> {
    vec![
        "sending: GET PORT_DATA_SET",
        "    507c6f.fffe.21a1c0-1 seq 0 RESPONSE MANAGEMENT PORT_DATA_SET",
        "        portIdentity            507c6f.fffe.21a1c0-1",
        "        portState               MASTER",
        "        logMinDelayReqInterval  0",
        "        peerMeanPathDelay       0",
        "        logAnnounceInterval     1",
        "        announceReceiptTimeout  3",
        "        logSyncInterval         0",
        "        delayMechanism          1",
        "        logMinPdelayReqInterval 0",
        "        versionNumber           2",
    ]
}

fn follower_port_data_set() -> Vec<&'static str> {
    vec![
        "sending: GET PORT_DATA_SET",
        "    507c6f.fffe.222222-1 seq 0 RESPONSE MANAGEMENT PORT_DATA_SET",
        "        portIdentity            507c6f.fffe.222222-1",
        "        portState               SLAVE",
        "        logMinDelayReqInterval  0",
        "        peerMeanPathDelay       0",
        "        logAnnounceInterval     1",
        "        announceReceiptTimeout  3",
        "        logSyncInterval         0",
        "        delayMechanism          1",
        "        logMinPdelayReqInterval 0",
        "        versionNumber           2",
    ]
}

fn grandmaster_settings(clock_class: &'static str) -> Vec<String> {
    vec![
        "sending: GET GRANDMASTER_SETTINGS_NP".to_string(),
        "    507c6f.fffe.21a1c0-0 seq 0 RESPONSE MANAGEMENT GRANDMASTER_SETTINGS_NP".to_string(),
        format!("        clockClass              {clock_class}"),
        "        clockAccuracy           0x20".to_string(),
        "        offsetScaledLogVariance 0x4e5d".to_string(),
        "        currentUtcOffset        37".to_string(),
        "        leap61                  0".to_string(),
        "        leap59                  0".to_string(),
        "        currentUtcOffsetValid   1".to_string(),
        "        ptpTimescale            1".to_string(),
        "        timeTraceable           1".to_string(),
        "        frequencyTraceable      1".to_string(),
        "        timeSource              0x20".to_string(),
    ]
}

fn parent_data_set() -> Vec<&'static str> {
    vec![
        "sending: GET PARENT_DATA_SET",
        "    507c6f.fffe.222222-0 seq 0 RESPONSE MANAGEMENT PARENT_DATA_SET",
        "        parentPortIdentity                    507c6f.fffe.21a1c0-1",
        "        parentStats                           0",
        "        observedParentOffsetScaledLogVariance 0xffff",
        "        observedParentClockPhaseChangeRate    0x7fffffff",
        "        grandmasterPriority1                  128",
        "        gm.ClockClass                         6",
        "        gm.ClockAccuracy                      0x20",
        "        gm.OffsetScaledLogVariance            0x4e5d",
        "        grandmasterPriority2                  110",
        "        grandmasterIdentity                   507c6f.fffe.21a1c0",
    ]
}

fn time_properties() -> Vec<&'static str> {
    vec![
        "sending: GET TIME_PROPERTIES_DATA_SET",
        "    507c6f.fffe.222222-0 seq 0 RESPONSE MANAGEMENT TIME_PROPERTIES_DATA_SET",
        "        currentUtcOffset      37",
        "        leap61                0",
        "        leap59                0",
        "        currentUtcOffsetValid 1",
        "        ptpTimescale          1",
        "        timeTraceable         1",
        "        frequencyTraceable    1",
        "        timeSource            0x20",
    ]
}

fn domain() -> Vec<&'static str> {
    vec![
        "sending: GET DOMAIN",
        "    507c6f.fffe.21a1c0-0 seq 0 RESPONSE MANAGEMENT DOMAIN",
        "        domainNumber 24",
    ]
}

/// Scripted PMC answers for the steady, fully synchronized lab.
fn script_steady_pmc(
    tgm: &Rc<RefCell<ScriptedConnection>>,
    follower: &Rc<RefCell<ScriptedConnection>>,
) {
    script(tgm, "GET PORT_DATA_SET", &tgm_port_data_set());
    let gm: Vec<String> = grandmaster_settings("6");
    let gm_refs: Vec<&str> = gm.iter().map(String::as_str).collect();
    script(tgm, "GET GRANDMASTER_SETTINGS_NP", &gm_refs);
    script(tgm, "GET DOMAIN", &domain());

    script(follower, "GET PORT_DATA_SET", &follower_port_data_set());
    script(follower, "GET PARENT_DATA_SET", &parent_data_set());
    script(follower, "GET TIME_PROPERTIES_DATA_SET", &time_properties());
    script(follower, "GET DOMAIN", &domain());
}

fn empty_alarm_table() -> Vec<&'static str> {
    vec![
        "+----------+-------------+-----------+----------+------------+",
        "| Alarm ID | Reason Text | Entity ID | Severity | Time Stamp |",
        "+----------+-------------+-----------+----------+------------+",
        "+----------+-------------+-----------+----------+------------+",
    ]
}

#[test]
fn test_ptp4l_restart_scenario() {
    let lab = lab();
    let setup = rendered(&lab);
    let settings = fast_settings();

    let mut provider = ScriptedProvider::new();
    let tgm = provider.add_host("controller-0");
    let follower = provider.add_host("controller-1");

    script(&tgm, "systemctl restart", &[]);
    script(
        &tgm,
        "systemctl status ptp4l@ptp1.service",
        &[
            "● ptp4l@ptp1.service - Precision Time Protocol (PTP) service",
            "     Active: active (running) since Mon 2025-02-10 18:36:34 UTC; 3s ago",
            "     CGroup: /system.slice/system-ptp4l.slice/ptp4l@ptp1.service",
            "       └─15221 /usr/sbin/ptp4l -f /etc/linuxptp/ptpinstance/ptp4l-ptp1.conf",
        ],
    );
    script_steady_pmc(&tgm, &follower);

    let executor = ScenarioExecutor::new(&lab, &provider, &settings, &setup, "pw");
    executor.run("ptp4l_restart").unwrap();

    assert!(tgm
        .borrow()
        .saw("sudo systemctl restart ptp4l@ptp1.service"));
    assert!(tgm.borrow().saw("'GET GRANDMASTER_SETTINGS_NP'"));
    assert!(follower.borrow().saw("'GET PARENT_DATA_SET'"));
}

#[test]
fn test_gnss_power_cycle_scenario() {
    let lab = lab();
    let setup = rendered(&lab);
    let settings = fast_settings();

    let mut provider = ScriptedProvider::new();
    let tgm = provider.add_host("controller-0");
    let follower = provider.add_host("controller-1");

    // NIC location lookups on the T-GM.
    script(
        &tgm,
        "grep PCI_SLOT_NAME",
        &["PCI_SLOT_NAME=0000:51:00.0"],
    );

    // First CGU read shows the feed lost, later reads show it locked again.
    let holdover_dump = [
        "Found ZL80032 CGU",
        "DPLL Config ver: 1.3.0.1",
        "DPLL FW ver: 4513",
        "CGU Input status:",
        "               |            | priority |            |",
        "      input (idx) |      state | EEC | PPS | ESync fail |",
        " ----------------------------------------------------------------",
        "  SMA1 (4) |    invalid |   3 |   1 |        N/A |",
        "  GNSS-1PPS (5) |    invalid |   0 |   0 |        N/A |",
        "EEC DPLL:",
        "        Current reference:      NONE",
        "        Status:         holdover",
        "PPS DPLL:",
        "        Current reference:      NONE",
        "        Status:         holdover",
        "        Phase offset [ps]:      0",
    ];
    let locked_dump = [
        "Found ZL80032 CGU",
        "DPLL Config ver: 1.3.0.1",
        "DPLL FW ver: 4513",
        "CGU Input status:",
        "               |            | priority |            |",
        "      input (idx) |      state | EEC | PPS | ESync fail |",
        " ----------------------------------------------------------------",
        "  SMA1 (4) |    invalid |   3 |   1 |        N/A |",
        "  GNSS-1PPS (5) |      valid |   0 |   0 |        N/A |",
        "EEC DPLL:",
        "        Current reference:      GNSS-1PPS",
        "        Status:         locked_ho_acq",
        "PPS DPLL:",
        "        Current reference:      GNSS-1PPS",
        "        Status:         locked_ho_acq",
        "        Phase offset [ps]:      -841",
    ];
    script_once(&tgm, "cat /sys/kernel/debug/ice", &holdover_dump);
    script(&tgm, "cat /sys/kernel/debug/ice", &locked_dump);

    // GPIO writes land on the GNSS power server.
    script(&provider.gnss_server(), "gpio", &[]);

    // The signal-loss alarm is present right after the cut, gone after the
    // restore.
    script_once(
        &provider.active_controller(),
        "fm alarm-list --nowrap",
        &[
            "+----------+-----------------------------------+------------------------------------------------------------+----------+----------------------------+",
            "| Alarm ID | Reason Text                       | Entity ID                                                  | Severity | Time Stamp                 |",
            "+----------+-----------------------------------+------------------------------------------------------------+----------+----------------------------+",
            "| 100.119  | controller-0 GNSS signal loss     | host=controller-0.interface=enp81s0f0.ptp=GNSS-signal-loss | major    | 2025-02-18T06:30:12.000000 |",
            "+----------+-----------------------------------+------------------------------------------------------------+----------+----------------------------+",
        ],
    );
    script(
        &provider.active_controller(),
        "fm alarm-list --nowrap",
        &empty_alarm_table(),
    );

    // PMC: holdover clock class right after the cut, locked afterwards.
    let holdover_gm = grandmaster_settings("140");
    let holdover_refs: Vec<&str> = holdover_gm.iter().map(String::as_str).collect();
    script_once(&tgm, "GET GRANDMASTER_SETTINGS_NP", &holdover_refs);
    script_steady_pmc(&tgm, &follower);

    let executor = ScenarioExecutor::new(&lab, &provider, &settings, &setup, "pw");
    executor.run("gnss_power_cycle").unwrap();

    let gnss_server = provider.gnss_server();
    let gnss_server = gnss_server.borrow();
    assert!(gnss_server.saw("echo 0 > /sys/class/gpio/gpio463/value"));
    assert!(gnss_server.saw("echo 1 > /sys/class/gpio/gpio463/value"));
    assert!(tgm
        .borrow()
        .saw("sudo cat /sys/kernel/debug/ice/0000:51:00.0/cgu"));
}
