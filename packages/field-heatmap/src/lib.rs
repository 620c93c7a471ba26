//! # field-heatmap
//!
//! Ordinary-kriging interpolation and heatmap rasterization for the
//! FieldSense suite. Takes the sample points recorded by the daemon, fits
//! nothing (variogram parameters are supplied constants), and produces an
//! RGBA overlay plus gradient legend for the external map host.
//!
//! Pipeline: recorded points → polygon filter ([`kriging::samples_inside_polygon`])
//! → [`kriging::KrigingModel`] → [`render::HeatmapRenderer`] → raster + legend.
//!
//! Everything here is CPU-bound and synchronous; the daemon runs it on a
//! dedicated worker so the interactive thread never blocks on an S²·n solve.

pub mod geometry;
pub mod kriging;
pub mod legend;
pub mod ramp;
pub mod raster;
pub mod render;

pub use kriging::{samples_inside_polygon, KrigingError, KrigingModel};
pub use ramp::{default_ramp, ColorRamp, Rgba};
pub use raster::Raster;
pub use render::{Frame, HeatmapError, HeatmapRenderer, Viewport};
