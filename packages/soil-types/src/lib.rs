//! # soil-types
//!
//! Shared telemetry structures for the FieldSense suite.
//!
//! These types are used by:
//! - `fieldsense-daemon`: decoding Modbus sensor frames and NMEA sentences
//! - `field-heatmap`: building kriging sample sets and rendering overlays
//! - the external map host: consuming readings/fixes as JSON
//!
//! ## Conventions
//!
//! - **Geodetic**: WGS-84 decimal degrees, north/east positive
//! - **Planar**: local equirectangular meters (see `field-heatmap::geometry`);
//!   geodetic and planar coordinates are never mixed in one comparison
//! - Readings and fixes are immutable snapshots — a new value replaces the
//!   previous one, no history is kept at this layer

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Geodetic Types ────────────────────────────────────────────────────────────

/// A WGS-84 position, decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One decoded GNSS fix. Produced by the NMEA provider; each new fix
/// supersedes the previous one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFix {
    pub lat: f64,
    pub lon: f64,
    /// Antenna altitude above MSL, meters (GGA only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    /// Horizontal accuracy estimate, meters (HDOP-derived for GGA,
    /// fixed placeholder for RMC)
    pub accuracy_m: f64,
    /// Ground speed, m/s (RMC only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    /// True course over ground, degrees (RMC only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing_deg: Option<f64>,
    /// NMEA fix quality (0 = invalid, 1 = GPS, 2 = DGPS, ...)
    pub fix_quality: u8,
    /// Milliseconds on the provider's monotonic clock at decode time
    pub monotonic_ms: u64,
}

impl GeoFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

// ── Sensor Channels ───────────────────────────────────────────────────────────

/// The eight registers reported by the soil probe, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Humidity,
    Temperature,
    Conductivity,
    Ph,
    Nitrogen,
    Phosphorus,
    Potassium,
    Salinity,
}

impl Channel {
    /// Wire order — register index i holds `ALL[i]`.
    pub const ALL: [Channel; 8] = [
        Channel::Humidity,
        Channel::Temperature,
        Channel::Conductivity,
        Channel::Ph,
        Channel::Nitrogen,
        Channel::Phosphorus,
        Channel::Potassium,
        Channel::Salinity,
    ];

    /// Key used in configuration files and JSON payloads.
    pub fn key(&self) -> &'static str {
        match self {
            Channel::Humidity => "humidity",
            Channel::Temperature => "temperature",
            Channel::Conductivity => "conductivity",
            Channel::Ph => "ph",
            Channel::Nitrogen => "nitrogen",
            Channel::Phosphorus => "phosphorus",
            Channel::Potassium => "potassium",
            Channel::Salinity => "salinity",
        }
    }

    /// Register scale divisor: humidity/temperature/pH arrive ×10.
    pub fn scale(&self) -> f64 {
        match self {
            Channel::Humidity | Channel::Temperature | Channel::Ph => 10.0,
            _ => 1.0,
        }
    }

    /// N/P/K are additionally multiplied by the soil-density factor
    /// before calibration.
    pub fn is_npk(&self) -> bool {
        matches!(
            self,
            Channel::Nitrogen | Channel::Phosphorus | Channel::Potassium
        )
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Channel::Humidity => "%",
            Channel::Temperature => "°C",
            Channel::Conductivity => "µS/cm",
            Channel::Ph => "",
            Channel::Nitrogen | Channel::Phosphorus | Channel::Potassium => "mg/kg",
            Channel::Salinity => "mg/L",
        }
    }
}

// ── Sensor Reading ────────────────────────────────────────────────────────────

/// One calibrated snapshot of all eight probe channels.
/// Produced once per accepted Modbus frame, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SensorReading {
    pub humidity: f64,
    pub temperature: f64,
    pub conductivity: f64,
    pub ph: f64,
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    pub salinity: f64,
}

impl SensorReading {
    pub fn value(&self, ch: Channel) -> f64 {
        match ch {
            Channel::Humidity => self.humidity,
            Channel::Temperature => self.temperature,
            Channel::Conductivity => self.conductivity,
            Channel::Ph => self.ph,
            Channel::Nitrogen => self.nitrogen,
            Channel::Phosphorus => self.phosphorus,
            Channel::Potassium => self.potassium,
            Channel::Salinity => self.salinity,
        }
    }

    pub fn set(&mut self, ch: Channel, v: f64) {
        match ch {
            Channel::Humidity => self.humidity = v,
            Channel::Temperature => self.temperature = v,
            Channel::Conductivity => self.conductivity = v,
            Channel::Ph => self.ph = v,
            Channel::Nitrogen => self.nitrogen = v,
            Channel::Phosphorus => self.phosphorus = v,
            Channel::Potassium => self.potassium = v,
            Channel::Salinity => self.salinity = v,
        }
    }

    /// Display string with unit, matching the probe's native resolution:
    /// "52.3%", "25.0°C", "6.8", integers for EC/N/P/K/salinity.
    pub fn display(&self, ch: Channel) -> String {
        let v = self.value(ch);
        match ch {
            Channel::Humidity => format!("{v:.1}%"),
            Channel::Temperature => format!("{v:.1}°C"),
            Channel::Ph => format!("{v:.1}"),
            _ => format!("{}", v.round() as i64),
        }
    }
}

// ── Calibration ───────────────────────────────────────────────────────────────

/// Per-channel affine calibration `y = a·x + b`. Identity by default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub a: f64,
    pub b: f64,
}

impl Default for CalibrationEntry {
    fn default() -> Self {
        Self { a: 1.0, b: 0.0 }
    }
}

impl CalibrationEntry {
    pub fn apply(&self, x: f64) -> f64 {
        self.a * x + self.b
    }
}

/// Externally-owned calibration store: read-only to the poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationTable {
    #[serde(default)]
    pub entries: HashMap<Channel, CalibrationEntry>,
    /// Global multiplier applied to raw N/P/K before calibration.
    #[serde(default = "default_soil_density")]
    pub soil_density: f64,
}

fn default_soil_density() -> f64 {
    1.0
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            soil_density: 1.0,
        }
    }
}

impl CalibrationTable {
    /// Missing channels calibrate as identity.
    pub fn entry(&self, ch: Channel) -> CalibrationEntry {
        self.entries.get(&ch).copied().unwrap_or_default()
    }
}

// ── Variogram ─────────────────────────────────────────────────────────────────

/// Exponential semivariance model for ordinary kriging.
/// Immutable; supplied by the caller per heatmap request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Variogram {
    /// Correlation length, meters
    pub range: f64,
    /// Variance contribution at full separation
    pub sill: f64,
    /// Semivariance at zero separation (measurement noise)
    pub nugget: f64,
}

impl Variogram {
    /// gamma(h) = nugget + sill · (1 − e^(−h/range)).
    /// Monotonically increasing, asymptoting to nugget + sill.
    pub fn gamma(&self, h: f64) -> f64 {
        self.nugget + self.sill * (1.0 - (-h / self.range).exp())
    }
}

impl Default for Variogram {
    fn default() -> Self {
        Self {
            range: 30.0,
            sill: 1.0,
            nugget: 0.05,
        }
    }
}

// ── Recorded Points & Sample Sets ─────────────────────────────────────────────

/// One point committed from a capture session: position + per-channel means.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedPoint {
    pub point: GeoPoint,
    #[serde(default)]
    pub values: HashMap<Channel, f64>,
    /// Wall-clock milliseconds at commit
    pub timestamp_ms: i64,
}

/// One (position, scalar) pair fed to the kriging solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub point: GeoPoint,
    pub value: f64,
}

/// Ordered sample list for one interpolation request. Built fresh per render
/// from recorded points filtered to the active polygon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleSet {
    pub samples: Vec<Sample>,
}

impl SampleSet {
    /// Minimum distinct points for a numerically meaningful surface.
    pub const MIN_SAMPLES: usize = 3;

    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn points(&self) -> Vec<GeoPoint> {
        self.samples.iter().map(|s| s.point).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}
