//! geometry.rs — local planar projection and point-in-polygon tests
//!
//! All interpolation runs in a local equirectangular frame: meters east/north
//! of the (0°, 0°) origin, scaled by the cosine of a reference latitude.
//! Valid for field-sized extents (tens of km), not globally accurate.
//! Geodetic and planar coordinates are never mixed in one comparison.

use soil_types::GeoPoint;

/// Mean Earth radius, meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A point in the local planar frame, meters.
pub type XY = (f64, f64);

/// Mean latitude of a point set, the reference for the projection basis.
pub fn mean_lat(points: &[GeoPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.lat).sum::<f64>() / points.len() as f64
}

/// Project one geodetic point into the planar frame anchored at `lat0_rad`.
/// x = R·lon·cos(lat0), y = R·lat.
pub fn project(p: GeoPoint, lat0_rad: f64) -> XY {
    let x = EARTH_RADIUS_M * p.lon.to_radians() * lat0_rad.cos();
    let y = EARTH_RADIUS_M * p.lat.to_radians();
    (x, y)
}

/// Project a whole ring/list with a shared basis.
pub fn project_all(points: &[GeoPoint], lat0_rad: f64) -> Vec<XY> {
    points.iter().map(|p| project(*p, lat0_rad)).collect()
}

pub fn dist(a: XY, b: XY) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// Ray-casting parity test in planar coordinates. The polygon is an open
/// ring (first vertex implicitly closes it). The 1e-12 term only guards the
/// horizontal-edge division; boundary points follow the raw parity result
/// (left/bottom edges test inside, top/right outside), a documented
/// convention, not a guaranteed behavior.
pub fn point_in_polygon(p: XY, poly: &[XY]) -> bool {
    let mut inside = false;
    let mut j = poly.len().wrapping_sub(1);
    for i in 0..poly.len() {
        let (xi, yi) = poly[i];
        let (xj, yj) = poly[j];
        if ((yi > p.1) != (yj > p.1))
            && (p.0 < (xj - xi) * (p.1 - yi) / (yj - yi + 1e-12) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Vec<XY> {
        vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
    }

    #[test]
    fn centroid_is_inside() {
        assert!(point_in_polygon((0.5, 0.5), &unit_square()));
    }

    #[test]
    fn far_point_is_outside() {
        assert!(!point_in_polygon((2.0, 2.0), &unit_square()));
        assert!(!point_in_polygon((-1.0, 0.5), &unit_square()));
    }

    #[test]
    fn edge_convention_is_consistent() {
        // Left edge counts inside, right edge outside — parity convention.
        let sq = unit_square();
        assert!(point_in_polygon((0.0, 0.5), &sq));
        assert!(!point_in_polygon((1.0, 0.5), &sq));
        // Whatever the convention, it must not flip between calls.
        for _ in 0..3 {
            assert!(point_in_polygon((0.0, 0.5), &sq));
        }
    }

    #[test]
    fn concave_polygon() {
        // L-shape: notch at the top right.
        let poly = vec![
            (0.0, 0.0),
            (2.0, 0.0),
            (2.0, 1.0),
            (1.0, 1.0),
            (1.0, 2.0),
            (0.0, 2.0),
        ];
        assert!(point_in_polygon((0.5, 1.5), &poly));
        assert!(!point_in_polygon((1.5, 1.5), &poly));
        assert!(point_in_polygon((1.5, 0.5), &poly));
    }

    #[test]
    fn projection_meters_are_plausible() {
        // One degree of latitude ≈ 111.2 km on the sphere.
        let a = project(GeoPoint::new(-26.0, -52.0), (-26.0f64).to_radians());
        let b = project(GeoPoint::new(-25.0, -52.0), (-26.0f64).to_radians());
        let dy = (b.1 - a.1).abs();
        assert!((dy - 111_194.9).abs() < 100.0, "dy = {dy}");
        // Longitude shrinks with cos(lat).
        let c = project(GeoPoint::new(-26.0, -51.0), (-26.0f64).to_radians());
        let dx = (c.0 - a.0).abs();
        assert!((dx - 111_194.9 * (-26.0f64).to_radians().cos()).abs() < 100.0);
    }
}
