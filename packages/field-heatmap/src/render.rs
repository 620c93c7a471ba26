//! render.rs — viewport-aware heatmap rendering
//!
//! Samples the kriging estimator over an S×S grid aligned to the current
//! viewport, masks cells outside the polygon, and colors the rest through
//! the ramp. The full raster is recomputed only when the composite viewport
//! key (width, height, zoom) changes; kriging over S² cells dominates the
//! cost and redraws must not pay it twice.

use thiserror::Error;

use soil_types::{GeoPoint, SampleSet, Variogram};

use crate::geometry;
use crate::kriging::{KrigingError, KrigingModel};
use crate::legend;
use crate::ramp::ColorRamp;
use crate::raster::Raster;

/// Lower bound on the sampling grid; coarser than this looks blocky even
/// on small screens.
pub const MIN_GRID: u32 = 120;

/// Cell fill alpha over the base map.
const CELL_ALPHA: u8 = 130;

#[derive(Debug, Error, PartialEq)]
pub enum HeatmapError {
    #[error("polygon needs at least 3 vertices, got {got}")]
    PolygonTooSmall { got: usize },
    #[error(transparent)]
    Kriging(#[from] KrigingError),
}

// ── Viewport ──────────────────────────────────────────────────────────────────

/// The map host's current screen window: Web-Mercator centered projection.
/// `from_pixels` is the inverse mapping the renderer uses to walk grid cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width_px: u32,
    pub height_px: u32,
    pub zoom: f64,
    pub center: GeoPoint,
}

impl Viewport {
    fn world_size(&self) -> f64 {
        256.0 * 2f64.powf(self.zoom)
    }

    fn world_of(&self, p: GeoPoint) -> (f64, f64) {
        let ws = self.world_size();
        let x = ws * (p.lon + 180.0) / 360.0;
        let lat_rad = p.lat.to_radians();
        let y = ws * (1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0;
        (x, y)
    }

    /// Geodetic point under a screen pixel (origin = viewport top-left).
    pub fn from_pixels(&self, px: f64, py: f64) -> GeoPoint {
        let ws = self.world_size();
        let (cx, cy) = self.world_of(self.center);
        let wx = cx - self.width_px as f64 / 2.0 + px;
        let wy = cy - self.height_px as f64 / 2.0 + py;
        let lon = wx / ws * 360.0 - 180.0;
        let lat = (std::f64::consts::PI * (1.0 - 2.0 * wy / ws)).sinh().atan();
        GeoPoint::new(lat.to_degrees(), lon)
    }

    /// Composite raster-cache key over width, height and zoom. Pan alone
    /// does not change it.
    pub fn cache_key(&self) -> u64 {
        ((self.width_px as u64) << 16) ^ ((self.height_px as u64) << 1) ^ self.zoom.to_bits()
    }
}

// ── Renderer ──────────────────────────────────────────────────────────────────

/// Output of one render call. `rebuilt` is false when the cached raster was
/// served unchanged.
#[derive(Debug)]
pub struct Frame<'a> {
    pub raster: &'a Raster,
    pub legend: &'a Raster,
    pub rebuilt: bool,
}

/// One heatmap overlay: polygon + samples + variogram, rendered on demand.
/// Inputs are snapshots taken by value. The UI layer owns the live
/// polygon/points and hands copies in, so nothing mutates mid-render.
pub struct HeatmapRenderer {
    polygon: Vec<GeoPoint>,
    samples: SampleSet,
    variogram: Variogram,
    grid_size_px: u32,
    legend_title: String,
    ramp: ColorRamp,

    cache: Option<(u64, Raster)>,
    legend: Option<Raster>,
    value_range: Option<(f64, f64)>,
}

impl HeatmapRenderer {
    pub fn new(
        polygon: Vec<GeoPoint>,
        samples: SampleSet,
        variogram: Variogram,
        grid_size_px: u32,
        legend_title: impl Into<String>,
        ramp: ColorRamp,
    ) -> Self {
        Self {
            polygon,
            samples,
            variogram,
            grid_size_px,
            legend_title: legend_title.into(),
            ramp,
            cache: None,
            legend: None,
            value_range: None,
        }
    }

    /// Last computed (vmin, vmax), if a frame has been rendered.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.value_range
    }

    /// Render (or serve from cache) the raster for this viewport.
    /// Precondition failures surface before any cache state is touched,
    /// leaving a previously rendered overlay intact.
    pub fn render(&mut self, vp: &Viewport) -> Result<Frame<'_>, HeatmapError> {
        if self.polygon.len() < 3 {
            return Err(HeatmapError::PolygonTooSmall {
                got: self.polygon.len(),
            });
        }
        let model = KrigingModel::from_samples(&self.samples, self.variogram)?;

        let key = vp.cache_key();
        let rebuilt = match &self.cache {
            Some((cached_key, _)) if *cached_key == key => false,
            _ => {
                let raster = self.rasterize(vp, &model);
                self.cache = Some((key, raster));
                true
            }
        };

        let vals = self.samples.values();
        let vmin = vals.iter().copied().fold(f64::INFINITY, f64::min);
        let vmax = vals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if self.value_range != Some((vmin, vmax)) || self.legend.is_none() {
            self.value_range = Some((vmin, vmax));
            self.legend = Some(legend::render_legend(
                &self.legend_title,
                vmin,
                vmax,
                self.ramp,
            ));
        }

        let (_, raster) = self.cache.as_ref().unwrap();
        Ok(Frame {
            raster,
            legend: self.legend.as_ref().unwrap(),
            rebuilt,
        })
    }

    fn rasterize(&self, vp: &Viewport, model: &KrigingModel) -> Raster {
        let w = vp.width_px;
        let h = vp.height_px;
        let mut raster = Raster::new(w, h);

        let s = MIN_GRID.max(self.grid_size_px.min(w.max(h)));
        let step_x = w as f64 / s as f64;
        let step_y = h as f64 / s as f64;

        let poly_xy = geometry::project_all(&self.polygon, model.lat0_rad());

        let vals = self.samples.values();
        let vmin = vals.iter().copied().fold(f64::INFINITY, f64::min);
        let vmax = vals.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        for j in 0..s {
            let py = (j as f64 + 0.5) * step_y;
            for i in 0..s {
                let px = (i as f64 + 0.5) * step_x;
                let gp = vp.from_pixels(px, py);
                let xy = model.project(gp);
                if !geometry::point_in_polygon(xy, &poly_xy) {
                    continue;
                }
                let v = model.estimate(xy.0, xy.1);
                let color = (self.ramp)(v, vmin, vmax, CELL_ALPHA);
                raster.fill_rect(
                    (px - step_x / 2.0).floor() as i64,
                    (py - step_y / 2.0).floor() as i64,
                    (px + step_x / 2.0).ceil() as i64,
                    (py + step_y / 2.0).ceil() as i64,
                    color,
                );
            }
        }
        raster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramp::default_ramp;
    use soil_types::Sample;

    fn viewport() -> Viewport {
        Viewport {
            width_px: 240,
            height_px: 240,
            zoom: 18.0,
            center: GeoPoint::new(-26.1955, -52.6717),
        }
    }

    fn renderer() -> HeatmapRenderer {
        // Polygon around the viewport center, samples at three corners.
        let polygon = vec![
            GeoPoint::new(-26.1950, -52.6722),
            GeoPoint::new(-26.1950, -52.6712),
            GeoPoint::new(-26.1960, -52.6712),
            GeoPoint::new(-26.1960, -52.6722),
        ];
        let samples = SampleSet::new(vec![
            Sample {
                point: GeoPoint::new(-26.1951, -52.6721),
                value: 10.0,
            },
            Sample {
                point: GeoPoint::new(-26.1951, -52.6713),
                value: 20.0,
            },
            Sample {
                point: GeoPoint::new(-26.1959, -52.6717),
                value: 30.0,
            },
        ]);
        let variogram = Variogram {
            range: 100.0,
            sill: 5.0,
            nugget: 0.0,
        };
        HeatmapRenderer::new(polygon, samples, variogram, 120, "PH", default_ramp)
    }

    #[test]
    fn viewport_inverse_projection_round_trips_center() {
        let vp = viewport();
        let gp = vp.from_pixels(vp.width_px as f64 / 2.0, vp.height_px as f64 / 2.0);
        assert!((gp.lat - vp.center.lat).abs() < 1e-9);
        assert!((gp.lon - vp.center.lon).abs() < 1e-9);
    }

    #[test]
    fn cache_key_ignores_pan_but_not_zoom() {
        let a = viewport();
        let mut panned = a;
        panned.center = GeoPoint::new(-26.2000, -52.6800);
        assert_eq!(a.cache_key(), panned.cache_key());

        let mut zoomed = a;
        zoomed.zoom = 17.0;
        assert_ne!(a.cache_key(), zoomed.cache_key());

        let mut resized = a;
        resized.width_px = 480;
        assert_ne!(a.cache_key(), resized.cache_key());
    }

    #[test]
    fn second_render_with_same_viewport_hits_the_cache() {
        let mut r = renderer();
        let vp = viewport();
        assert!(r.render(&vp).unwrap().rebuilt);
        assert!(!r.render(&vp).unwrap().rebuilt);

        let mut zoomed = vp;
        zoomed.zoom = 16.0;
        assert!(r.render(&zoomed).unwrap().rebuilt);
    }

    #[test]
    fn cells_inside_polygon_are_colored_and_outside_transparent() {
        let mut r = renderer();
        let vp = viewport();
        let frame = r.render(&vp).unwrap();
        // Viewport center sits inside the polygon.
        let center = frame.raster.pixel(120, 120);
        assert_eq!(center.a, 130);
        // The polygon spans ~100 m; at z18 that is well inside the frame,
        // so the raster corner is outside it and stays transparent.
        let corner = frame.raster.pixel(0, 0);
        assert_eq!(corner.a, 0);
    }

    #[test]
    fn too_few_samples_surfaces_before_rendering() {
        let mut r = renderer();
        r.samples.samples.truncate(2);
        let err = r.render(&viewport()).unwrap_err();
        assert_eq!(
            err,
            HeatmapError::Kriging(KrigingError::InsufficientSamples { got: 2, need: 3 })
        );
    }

    #[test]
    fn degenerate_polygon_is_rejected() {
        let mut r = renderer();
        r.polygon.truncate(2);
        let err = r.render(&viewport()).unwrap_err();
        assert_eq!(err, HeatmapError::PolygonTooSmall { got: 2 });
    }

    #[test]
    fn value_range_tracks_samples() {
        let mut r = renderer();
        r.render(&viewport()).unwrap();
        assert_eq!(r.value_range(), Some((10.0, 30.0)));
    }
}
