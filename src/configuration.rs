use crate::pid::PidGains;
use config::Config;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::*;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub drive: DriveConfig,
    pub line: LineConfig,
    pub heading: HeadingConfig,
    pub calibration: CalibrationConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DriveConfig {
    /// Base duty cycle while following the line or driving forward.
    pub base_speed: f64,
    /// Duty cycle of the driven wheel during one wheel turns.
    pub turn_speed: f64,
    /// Control loop period in milliseconds.
    pub tick_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LineConfig {
    pub gains: PidGains,
    /// Offset above the calibrated midpoint at which the line ends.
    pub stop_offset: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct HeadingConfig {
    pub gains: PidGains,
    /// Heading error magnitude in degrees considered on target.
    pub tolerance: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CalibrationConfig {
    /// Settling time before the reference heading is sampled.
    pub settle_secs: f64,
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::Environment::with_prefix("APP"))
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .build()?
        } else {
            info!("Using default configuration");
            Config::builder()
                .add_source(config::Environment::with_prefix("APP"))
                .add_source(config::File::with_name("config/settings"))
                .build()?
        };

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static DEFAULT_CONFIG: &str = include_str!("../config/settings.yaml");

    #[test]
    fn test_config() {
        let builder = Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        let config = builder.try_deserialize::<AppConfig>().unwrap();
        assert!(config.line.gains.history >= 1);
        assert!(config.heading.gains.history >= 1);
    }
}
