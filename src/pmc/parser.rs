//! PMC response table parser.
//!
//! A pmc reply looks like:
//!
//! ```text
//! sending: GET PORT_DATA_SET
//!    b48351.fffe.0a37b0-1 seq 0 RESPONSE MANAGEMENT PORT_DATA_SET
//!        portIdentity            b48351.fffe.0a37b0-1
//!        portState               SLAVE
//!        ...
//! ```
//!
//! A line containing `RESPONSE MANAGEMENT` opens a new block; indented
//! `key value...` lines populate it. The `sending:` echo and the trailing
//! shell prompt are discarded.

use std::collections::BTreeMap;

use crate::error::{PtpError, PtpResult};

/// One `RESPONSE MANAGEMENT` block as raw key/value text.
#[derive(Debug, Clone, Default)]
pub struct ResponseBlock {
    values: BTreeMap<String, String>,
}

impl ResponseBlock {
    /// Raw value for `key`; `PtpError::Parse` when absent.
    pub fn require(&self, key: &str) -> PtpResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| PtpError::Parse(format!("pmc response missing key '{key}'")))
    }

    /// Value for `key` parsed as a decimal integer.
    pub fn require_int(&self, key: &str) -> PtpResult<i64> {
        let raw = self.require(key)?;
        raw.parse()
            .map_err(|_| PtpError::Parse(format!("pmc key '{key}' is not an integer: '{raw}'")))
    }

    /// Value for `key` parsed as a float (offsetFromMaster, meanPathDelay).
    pub fn require_float(&self, key: &str) -> PtpResult<f64> {
        let raw = self.require(key)?;
        raw.parse()
            .map_err(|_| PtpError::Parse(format!("pmc key '{key}' is not a number: '{raw}'")))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Split pmc output lines into response blocks.
pub fn parse_response_blocks(lines: &[String]) -> PtpResult<Vec<ResponseBlock>> {
    let mut blocks: Vec<ResponseBlock> = Vec::new();
    for raw in lines {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("sending:") {
            continue;
        }
        if line.contains("RESPONSE MANAGEMENT") {
            blocks.push(ResponseBlock::default());
            continue;
        }
        // Shell prompt echo after the last block.
        if line.ends_with('$') || line.ends_with("$ ") {
            continue;
        }
        let Some(block) = blocks.last_mut() else {
            continue;
        };
        let mut tokens = line.split_whitespace();
        let (Some(key), Some(first)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let mut value = first.to_string();
        for token in tokens {
            value.push(' ');
            value.push_str(token);
        }
        block.values.insert(key.to_string(), value);
    }
    Ok(blocks)
}
