//! Typed pmc data-set objects.
//!
//! Field names mirror the pmc output keys; hex-formatted fields
//! (clockAccuracy, offsetScaledLogVariance, timeSource) are kept as raw
//! strings since the harness only ever compares them textually.

use crate::error::PtpResult;
use crate::pmc::parser::ResponseBlock;

/// `GET PORT_DATA_SET` (one per port of the instance).
#[derive(Debug, Clone, PartialEq)]
pub struct PortDataSet {
    pub port_identity: String,
    pub port_state: String,
    pub log_min_delay_req_interval: i64,
    pub peer_mean_path_delay: i64,
    pub log_announce_interval: i64,
    pub announce_receipt_timeout: i64,
    pub log_sync_interval: i64,
    pub delay_mechanism: i64,
    pub log_min_p_delay_req_interval: i64,
    pub version_number: i64,
}

impl PortDataSet {
    pub fn from_block(block: &ResponseBlock) -> PtpResult<Self> {
        Ok(Self {
            port_identity: block.require("portIdentity")?.to_string(),
            port_state: block.require("portState")?.to_string(),
            log_min_delay_req_interval: block.require_int("logMinDelayReqInterval")?,
            peer_mean_path_delay: block.require_int("peerMeanPathDelay")?,
            log_announce_interval: block.require_int("logAnnounceInterval")?,
            announce_receipt_timeout: block.require_int("announceReceiptTimeout")?,
            log_sync_interval: block.require_int("logSyncInterval")?,
            delay_mechanism: block.require_int("delayMechanism")?,
            log_min_p_delay_req_interval: block.require_int("logMinPdelayReqInterval")?,
            version_number: block.require_int("versionNumber")?,
        })
    }
}

/// `GET PARENT_DATA_SET`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentDataSet {
    pub parent_port_identity: String,
    pub grandmaster_priority1: i64,
    pub gm_clock_class: i64,
    pub gm_clock_accuracy: String,
    pub gm_offset_scaled_log_variance: String,
    pub grandmaster_priority2: i64,
    pub grandmaster_identity: String,
}

impl ParentDataSet {
    pub fn from_block(block: &ResponseBlock) -> PtpResult<Self> {
        Ok(Self {
            parent_port_identity: block.require("parentPortIdentity")?.to_string(),
            grandmaster_priority1: block.require_int("grandmasterPriority1")?,
            gm_clock_class: block.require_int("gm.ClockClass")?,
            gm_clock_accuracy: block.require("gm.ClockAccuracy")?.to_string(),
            gm_offset_scaled_log_variance: block.require("gm.OffsetScaledLogVariance")?.to_string(),
            grandmaster_priority2: block.require_int("grandmasterPriority2")?,
            grandmaster_identity: block.require("grandmasterIdentity")?.to_string(),
        })
    }
}

/// `GET TIME_PROPERTIES_DATA_SET`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimePropertiesDataSet {
    pub current_utc_offset: i64,
    pub leap61: i64,
    pub leap59: i64,
    pub current_utc_offset_valid: i64,
    pub ptp_timescale: i64,
    pub time_traceable: i64,
    pub frequency_traceable: i64,
    pub time_source: String,
}

impl TimePropertiesDataSet {
    pub fn from_block(block: &ResponseBlock) -> PtpResult<Self> {
        Ok(Self {
            current_utc_offset: block.require_int("currentUtcOffset")?,
            leap61: block.require_int("leap61")?,
            leap59: block.require_int("leap59")?,
            current_utc_offset_valid: block.require_int("currentUtcOffsetValid")?,
            ptp_timescale: block.require_int("ptpTimescale")?,
            time_traceable: block.require_int("timeTraceable")?,
            frequency_traceable: block.require_int("frequencyTraceable")?,
            time_source: block.require("timeSource")?.to_string(),
        })
    }
}

/// `GET GRANDMASTER_SETTINGS_NP` (and the echo of a `SET`).
#[derive(Debug, Clone, PartialEq)]
pub struct GrandmasterSettings {
    pub clock_class: i64,
    pub clock_accuracy: String,
    pub offset_scaled_log_variance: String,
    pub current_utc_offset: i64,
    pub leap61: i64,
    pub leap59: i64,
    pub current_utc_offset_valid: i64,
    pub ptp_timescale: i64,
    pub time_traceable: i64,
    pub frequency_traceable: i64,
    pub time_source: String,
}

impl GrandmasterSettings {
    pub fn from_block(block: &ResponseBlock) -> PtpResult<Self> {
        Ok(Self {
            clock_class: block.require_int("clockClass")?,
            clock_accuracy: block.require("clockAccuracy")?.to_string(),
            offset_scaled_log_variance: block.require("offsetScaledLogVariance")?.to_string(),
            current_utc_offset: block.require_int("currentUtcOffset")?,
            leap61: block.require_int("leap61")?,
            leap59: block.require_int("leap59")?,
            current_utc_offset_valid: block.require_int("currentUtcOffsetValid")?,
            ptp_timescale: block.require_int("ptpTimescale")?,
            time_traceable: block.require_int("timeTraceable")?,
            frequency_traceable: block.require_int("frequencyTraceable")?,
            time_source: block.require("timeSource")?.to_string(),
        })
    }
}

/// `GET DEFAULT_DATA_SET`.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultDataSet {
    pub two_step_flag: i64,
    pub slave_only: i64,
    pub number_ports: i64,
    pub priority1: i64,
    pub clock_class: i64,
    pub clock_accuracy: String,
    pub offset_scaled_log_variance: String,
    pub priority2: i64,
    pub clock_identity: String,
    pub domain_number: i64,
}

impl DefaultDataSet {
    pub fn from_block(block: &ResponseBlock) -> PtpResult<Self> {
        Ok(Self {
            two_step_flag: block.require_int("twoStepFlag")?,
            slave_only: block.require_int("slaveOnly")?,
            number_ports: block.require_int("numberPorts")?,
            priority1: block.require_int("priority1")?,
            clock_class: block.require_int("clockClass")?,
            clock_accuracy: block.require("clockAccuracy")?.to_string(),
            offset_scaled_log_variance: block.require("offsetScaledLogVariance")?.to_string(),
            priority2: block.require_int("priority2")?,
            clock_identity: block.require("clockIdentity")?.to_string(),
            domain_number: block.require_int("domainNumber")?,
        })
    }
}

/// `GET CURRENT_DATA_SET`.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentDataSet {
    pub steps_removed: i64,
    pub offset_from_master: f64,
    pub mean_path_delay: f64,
}

impl CurrentDataSet {
    pub fn from_block(block: &ResponseBlock) -> PtpResult<Self> {
        Ok(Self {
            steps_removed: block.require_int("stepsRemoved")?,
            offset_from_master: block.require_float("offsetFromMaster")?,
            mean_path_delay: block.require_float("meanPathDelay")?,
        })
    }
}

/// `GET DOMAIN`.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainDataSet {
    pub domain_number: i64,
}

impl DomainDataSet {
    pub fn from_block(block: &ResponseBlock) -> PtpResult<Self> {
        Ok(Self {
            domain_number: block.require_int("domainNumber")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_data_set_from_block() {
        let block = ResponseBlock::from_pairs(&[
            ("parentPortIdentity", "507c6f.fffe.0b5a4d-0"),
            ("grandmasterPriority1", "128"),
            ("gm.ClockClass", "6"),
            ("gm.ClockAccuracy", "0x20"),
            ("gm.OffsetScaledLogVariance", "0x4e5d"),
            ("grandmasterPriority2", "128"),
            ("grandmasterIdentity", "507c6f.fffe.0b5a4d"),
        ]);
        let parent = ParentDataSet::from_block(&block).unwrap();
        assert_eq!(parent.gm_clock_class, 6);
        assert_eq!(parent.parent_port_identity, "507c6f.fffe.0b5a4d-0");
    }

    #[test]
    fn test_current_data_set_floats() {
        let block = ResponseBlock::from_pairs(&[
            ("stepsRemoved", "3"),
            ("offsetFromMaster", "1.3"),
            ("meanPathDelay", "2.5"),
        ]);
        let current = CurrentDataSet::from_block(&block).unwrap();
        assert_eq!(current.steps_removed, 3);
        assert!((current.offset_from_master - 1.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_field_fails() {
        let block = ResponseBlock::from_pairs(&[("portIdentity", "x-1")]);
        assert!(PortDataSet::from_block(&block).is_err());
    }
}
