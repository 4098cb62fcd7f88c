//! # config
//!
//! why: keep every timing knob of the protocol in one validated place
//! relations: read by timer.rs when rolling durations, by the runtime for rpc deadlines
//! what: RaftConfig with serde defaults, json loading and range validation

use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};

/// Timing configuration for a node. All values are milliseconds.
///
/// Ranges are half-open: `[min, max)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// lower bound of the follower/candidate election timeout
    pub election_timeout_min: u64,
    /// exclusive upper bound of the follower/candidate election timeout
    pub election_timeout_max: u64,
    /// lower bound of the leader heartbeat interval
    pub heartbeat_interval_min: u64,
    /// exclusive upper bound of the leader heartbeat interval
    pub heartbeat_interval_max: u64,
    /// deadline for a single outbound rpc to one peer
    pub rpc_timeout: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 250,
            election_timeout_max: 450,
            heartbeat_interval_min: 50,
            heartbeat_interval_max: 200,
            rpc_timeout: 100,
        }
    }
}

impl RaftConfig {
    /// Parse and validate a json document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RaftError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election timeout range {}..{} is empty",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval_min >= self.heartbeat_interval_max {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat interval range {}..{} is empty",
                self.heartbeat_interval_min, self.heartbeat_interval_max
            )));
        }
        if self.rpc_timeout == 0 {
            return Err(RaftError::InvalidConfig(
                "rpc timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn election_timeout_range(&self) -> Range<u64> {
        self.election_timeout_min..self.election_timeout_max
    }

    pub fn heartbeat_interval_range(&self) -> Range<u64> {
        self.heartbeat_interval_min..self.heartbeat_interval_max
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_timings() {
        let config = RaftConfig::default();
        assert_eq!(config.election_timeout_range(), 250..450);
        assert_eq!(config.heartbeat_interval_range(), 50..200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RaftConfig::from_json(r#"{ "rpc_timeout": 40 }"#).unwrap();
        assert_eq!(config.rpc_timeout(), Duration::from_millis(40));
        assert_eq!(config.election_timeout_min, 250);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = RaftConfig::from_json(
            r#"{ "election_timeout_min": 500, "election_timeout_max": 100 }"#,
        )
        .unwrap_err();
        assert!(matches!(err, RaftError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            RaftConfig::from_json("{"),
            Err(RaftError::InvalidConfig(_))
        ));
    }
}
