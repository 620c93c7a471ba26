//! ramp.rs — value-to-color mapping
//!
//! The default ramp is the fixed piecewise-linear blue→cyan→green→yellow→red
//! ramp the soil overlays use. Ramp functions are pure and pluggable; the
//! renderer takes any `ColorRamp`.

use serde::{Deserialize, Serialize};

/// Straight-alpha RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);
}

/// Maps (value, vmin, vmax, alpha) to a color. Must be pure: equal inputs
/// always produce equal colors.
pub type ColorRamp = fn(f64, f64, f64, u8) -> Rgba;

/// Blue→cyan→green→yellow→red, linear in four quarters of the normalized
/// range. `t = 0` is pure blue, `t = 1` pure red.
pub fn default_ramp(v: f64, vmin: f64, vmax: f64, alpha: u8) -> Rgba {
    let t = ((v - vmin) / (vmax - vmin + 1e-9)).clamp(0.0, 1.0);

    let r = if t < 0.50 {
        0.0
    } else if t < 0.75 {
        (t - 0.50) / 0.25
    } else {
        1.0
    };
    let g = if t < 0.25 {
        t / 0.25
    } else if t < 0.50 {
        1.0
    } else if t < 0.75 {
        1.0 - (t - 0.50) / 0.25
    } else {
        0.0
    };
    let b = if t < 0.25 {
        1.0
    } else if t < 0.50 {
        1.0 - (t - 0.25) / 0.25
    } else {
        0.0
    };

    Rgba::new(channel(r), channel(g), channel(b), alpha)
}

fn channel(f: f64) -> u8 {
    (f * 255.0).round().clamp(0.0, 255.0) as u8
}
