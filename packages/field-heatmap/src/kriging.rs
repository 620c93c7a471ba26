//! kriging.rs — ordinary-kriging estimator over a local planar frame
//!
//! Builds the standard (n+1)×(n+1) ordinary-kriging system: a semivariance
//! block from the supplied variogram, a unit border row/column and a zero
//! corner for the unbiasedness (Lagrange) constraint. Solved per query by
//! Gaussian elimination with partial pivoting; near-zero pivots are skipped
//! rather than divided through, so duplicate/degenerate points degrade the
//! estimate instead of failing the render.
//!
//! No automatic variogram fitting: parameters are caller-supplied constants.

use thiserror::Error;

use soil_types::{GeoPoint, SampleSet, Variogram};

use crate::geometry::{self, XY};

/// Pivots smaller than this are treated as singular and skipped.
const PIVOT_EPS: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum KrigingError {
    #[error("sample set has {got} points inside the polygon, need at least {need}")]
    InsufficientSamples { got: usize, need: usize },
    #[error("point/value length mismatch: {points} points, {values} values")]
    LengthMismatch { points: usize, values: usize },
}

/// Ephemeral estimator bound to one sample set + variogram. Owns the planar
/// projection basis and the assembled system; discarded after use.
#[derive(Debug)]
pub struct KrigingModel {
    xy: Vec<XY>,
    z: Vec<f64>,
    matrix: Vec<Vec<f64>>,
    variogram: Variogram,
    lat0_rad: f64,
}

impl KrigingModel {
    /// Build from parallel point/value slices. Requires equal, non-zero
    /// lengths; callers wanting a meaningful surface should go through
    /// [`KrigingModel::from_samples`], which enforces the ≥ 3 minimum.
    pub fn build(
        points: &[GeoPoint],
        values: &[f64],
        variogram: Variogram,
    ) -> Result<Self, KrigingError> {
        if points.len() != values.len() {
            return Err(KrigingError::LengthMismatch {
                points: points.len(),
                values: values.len(),
            });
        }
        if points.is_empty() {
            return Err(KrigingError::InsufficientSamples { got: 0, need: 1 });
        }

        let lat0_rad = geometry::mean_lat(points).to_radians();
        let xy = geometry::project_all(points, lat0_rad);
        let n = xy.len();

        let mut matrix = vec![vec![0.0; n + 1]; n + 1];
        for i in 0..n {
            for j in 0..n {
                matrix[i][j] = variogram.gamma(geometry::dist(xy[i], xy[j]));
            }
            matrix[i][n] = 1.0;
            matrix[n][i] = 1.0;
        }

        Ok(Self {
            xy,
            z: values.to_vec(),
            matrix,
            variogram,
            lat0_rad,
        })
    }

    /// Build from a sample set, enforcing the minimum count.
    pub fn from_samples(samples: &SampleSet, variogram: Variogram) -> Result<Self, KrigingError> {
        if samples.len() < SampleSet::MIN_SAMPLES {
            return Err(KrigingError::InsufficientSamples {
                got: samples.len(),
                need: SampleSet::MIN_SAMPLES,
            });
        }
        Self::build(&samples.points(), &samples.values(), variogram)
    }

    /// Projection basis (reference latitude, radians); queries must be
    /// projected with the same basis.
    pub fn lat0_rad(&self) -> f64 {
        self.lat0_rad
    }

    /// Project a geodetic point into this model's planar frame.
    pub fn project(&self, p: GeoPoint) -> XY {
        geometry::project(p, self.lat0_rad)
    }

    /// Kriging weights for a planar query point, Lagrange multiplier last.
    /// The first n weights sum to 1 (unbiasedness constraint); individual
    /// weights may be negative.
    pub fn weights(&self, x: f64, y: f64) -> Vec<f64> {
        let n = self.xy.len();
        let mut rhs = vec![0.0; n + 1];
        for i in 0..n {
            rhs[i] = self.variogram.gamma(geometry::dist((x, y), self.xy[i]));
        }
        rhs[n] = 1.0;
        solve(&self.matrix, &rhs)
    }

    /// Estimate the surface at a planar query point: Σ wᵢ·zᵢ.
    pub fn estimate(&self, x: f64, y: f64) -> f64 {
        let w = self.weights(x, y);
        let mut est = 0.0;
        for i in 0..self.z.len() {
            est += w[i] * self.z[i];
        }
        est
    }

    /// Estimate at a geodetic point (projected with the model basis).
    pub fn estimate_geo(&self, p: GeoPoint) -> f64 {
        let (x, y) = self.project(p);
        self.estimate(x, y)
    }
}

/// Dense Gauss-Jordan solve with partial pivoting. Rows with a pivot below
/// `PIVOT_EPS` are left uneliminated — a best-effort answer for degenerate
/// systems instead of a division by near-zero.
fn solve(matrix: &[Vec<f64>], rhs: &[f64]) -> Vec<f64> {
    let n = rhs.len();
    let mut a: Vec<Vec<f64>> = matrix.to_vec();
    let mut x = rhs.to_vec();

    for p in 0..n {
        let mut max = p;
        for i in p + 1..n {
            if a[i][p].abs() > a[max][p].abs() {
                max = i;
            }
        }
        a.swap(p, max);
        x.swap(p, max);

        let piv = a[p][p];
        if piv.abs() < PIVOT_EPS {
            continue;
        }
        for j in p..n {
            a[p][j] /= piv;
        }
        x[p] /= piv;

        for i in 0..n {
            if i == p {
                continue;
            }
            let f = a[i][p];
            if f == 0.0 {
                continue;
            }
            for j in p..n {
                a[i][j] -= f * a[p][j];
            }
            x[i] -= f * x[p];
        }
    }
    x
}

/// Collect the samples of one channel that fall inside the polygon, in the
/// shared projected frame. This is the per-render snapshot handed to
/// [`KrigingModel::from_samples`].
pub fn samples_inside_polygon(
    recorded: &[soil_types::RecordedPoint],
    channel: soil_types::Channel,
    polygon: &[GeoPoint],
) -> SampleSet {
    if polygon.len() < 3 {
        return SampleSet::default();
    }
    let pts: Vec<GeoPoint> = recorded.iter().map(|r| r.point).collect();
    let lat0_rad = geometry::mean_lat(&pts).to_radians();
    let poly_xy = geometry::project_all(polygon, lat0_rad);

    let samples = recorded
        .iter()
        .filter_map(|r| {
            let v = *r.values.get(&channel)?;
            let xy = geometry::project(r.point, lat0_rad);
            geometry::point_in_polygon(xy, &poly_xy).then_some(soil_types::Sample {
                point: r.point,
                value: v,
            })
        })
        .collect();
    SampleSet::new(samples)
}
