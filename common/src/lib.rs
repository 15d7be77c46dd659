pub mod config;
pub mod scale;
pub mod snapshot;

pub use config::{CalibrationConfig, ConfigError, NetworkConfig, RuntimeConfig};
pub use scale::PercentScale;
pub use snapshot::{ReadingSnapshot, SensorSample, AVG_TEMP_DISCONNECTED_C};
