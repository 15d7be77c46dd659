use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scale::PercentScale;

/// Factory calibration endpoints for the analog channels.
pub const MQ135_RAW_MIN: u16 = 100;
pub const MQ135_RAW_MAX: u16 = 3500;
pub const MQ4_RAW_MIN: u16 = 50;
pub const MQ4_RAW_MAX: u16 = 800;
pub const HUMIDITY_RAW_DRY: u16 = 4095;
pub const HUMIDITY_RAW_WET: u16 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{channel} calibration has a zero-width raw span at {value}")]
    ZeroWidthSpan { channel: &'static str, value: u16 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationConfig {
    pub mq1: PercentScale,
    pub mq2: PercentScale,
    pub humidity: PercentScale,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            mq1: PercentScale::new(MQ135_RAW_MIN, MQ135_RAW_MAX),
            mq2: PercentScale::new(MQ4_RAW_MIN, MQ4_RAW_MAX),
            humidity: PercentScale::new(HUMIDITY_RAW_DRY, HUMIDITY_RAW_WET),
        }
    }
}

impl CalibrationConfig {
    /// A scale whose endpoints coincide cannot be mapped to a percentage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (channel, scale) in [
            ("mq1", self.mq1),
            ("mq2", self.mq2),
            ("humidity", self.humidity),
        ] {
            if scale.raw_min == scale.raw_max {
                return Err(ConfigError::ZeroWidthSpan {
                    channel,
                    value: scale.raw_min,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    pub calibration: CalibrationConfig,
}
