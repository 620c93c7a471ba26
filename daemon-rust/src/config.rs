//! config.rs — daemon configuration
//!
//! TOML file next to the binary, with the packaged defaults compiled in as
//! a fallback so a bare install still comes up pointed at the stock device
//! nodes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use soil_types::{CalibrationTable, Variogram};

use crate::modbus::SensorConfig;
use crate::nmea::GnssConfig;

pub const DEFAULT_PATH: &str = "config.toml";
const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct FullConfig {
    pub sensor: SensorSection,
    pub gnss: GnssSection,
    pub heatmap: HeatmapSection,
    #[serde(default)]
    pub export: ExportSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorSection {
    pub device: String,
    pub baud: u32,
    pub poll_period_s: f64,
    #[serde(default = "default_true")]
    pub use_root_shell: bool,
    #[serde(default)]
    pub calibration: CalibrationTable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GnssSection {
    pub device: String,
    pub baud: u32,
    #[serde(default = "default_min_fix_quality")]
    pub min_fix_quality: u8,
    #[serde(default = "default_true")]
    pub use_root_shell: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeatmapSection {
    pub grid_size_px: u32,
    pub legend_title: String,
    pub variogram: Variogram,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSection {
    pub dir: PathBuf,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("exports"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_fix_quality() -> u8 {
    1
}

impl SensorSection {
    pub fn to_config(&self) -> SensorConfig {
        SensorConfig {
            device: self.device.clone(),
            baud: self.baud,
            poll_period: Duration::from_secs_f64(self.poll_period_s),
            use_root_shell: self.use_root_shell,
        }
    }
}

impl GnssSection {
    pub fn to_config(&self) -> GnssConfig {
        GnssConfig {
            device: self.device.clone(),
            baud: self.baud,
            min_fix_quality: self.min_fix_quality,
            use_root_shell: self.use_root_shell,
        }
    }
}

/// Load configuration from `path`, falling back to the embedded defaults
/// when the file is missing. A present-but-broken file is an error, not a
/// silent fallback.
pub fn load(path: &str) -> anyhow::Result<FullConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path, "config file not found, using embedded defaults");
            DEFAULT_CONFIG.to_string()
        }
        Err(err) => return Err(err).with_context(|| format!("reading {path}")),
    };
    toml::from_str(&raw).with_context(|| format!("parsing {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use soil_types::Channel;

    #[test]
    fn embedded_defaults_parse() {
        let cfg: FullConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(cfg.sensor.device, "/dev/ttyS7");
        assert_eq!(cfg.sensor.baud, 9600);
        assert_eq!(cfg.sensor.to_config().poll_period, Duration::from_secs(2));
        assert_eq!(cfg.gnss.min_fix_quality, 1);
        assert_eq!(cfg.heatmap.grid_size_px, 500);
        assert_eq!(cfg.export.dir, PathBuf::from("exports"));
    }

    #[test]
    fn calibration_entries_deserialize_by_channel_key() {
        let cfg: FullConfig = toml::from_str(
            r#"
            [sensor]
            device = "/dev/ttyS7"
            baud = 9600
            poll_period_s = 1.5

            [sensor.calibration]
            soil_density = 1.3

            [sensor.calibration.entries]
            ph = { a = 1.1, b = -0.2 }

            [gnss]
            device = "/dev/ttyUSB0"
            baud = 115200

            [heatmap]
            grid_size_px = 300
            legend_title = "N"
            variogram = { range = 25.0, sill = 2.0, nugget = 0.1 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sensor.calibration.soil_density, 1.3);
        let ph = cfg.sensor.calibration.entry(Channel::Ph);
        assert_eq!((ph.a, ph.b), (1.1, -0.2));
        // Unlisted channels fall back to identity.
        let hum = cfg.sensor.calibration.entry(Channel::Humidity);
        assert_eq!((hum.a, hum.b), (1.0, 0.0));
        // Omitted optional sections take their defaults.
        assert!(cfg.gnss.use_root_shell);
        assert_eq!(cfg.export.dir, PathBuf::from("exports"));
    }

    #[test]
    fn broken_config_is_an_error() {
        assert!(toml::from_str::<FullConfig>("[sensor]\ndevice = 3").is_err());
    }
}
