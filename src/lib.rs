//! Hardware-in-the-loop verification for PTP timing labs.
//!
//! This library drives a lab of linuxptp hosts over SSH sessions: it
//! renders setup documents describing the expected ptp4l/phc2sys/ts2phc
//! configuration, verifies the live lab against them (PMC data sets, CGU
//! clock chains, systemd units, deployed config files, system alarms) and
//! executes fault-injection scenarios with their expected observations.
//! The SSH transport is a trait seam, so the whole stack runs against
//! scripted sessions in tests.

pub mod alarm;
pub mod cgu;
pub mod conf;
pub mod config;
pub mod connection;
pub mod error;
pub mod gnss;
pub mod ip;
pub mod phc;
pub mod pmc;
pub mod proxmox;
pub mod readiness;
pub mod scenario;
pub mod service;
pub mod settings;
pub mod setup;
pub mod sma;
pub mod validation;
pub mod verify;

pub use error::{PtpError, PtpResult};
