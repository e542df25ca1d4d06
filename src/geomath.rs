//! Great-circle distance, bearing, and planar point-in-polygon/ring tests.
//!
//! Region polygons are local and small (airport geofences, not continents), so ray-casting
//! treats lat/lon as planar x/y. Distance and bearing stay spherical (haversine) since those
//! feed cooldown-free lat/long-ring and proximity thresholds where the small-region shortcut
//! would drift.

use geo::{Coord, LineString, Polygon};

/// Mean earth radius in nautical miles.
const EARTH_RADIUS_NM: f64 = 3440.065;

/// Great-circle distance between two points, in nautical miles.
///
/// NaN in any input propagates to `f64::INFINITY` so that callers comparing `distance <= nm`
/// simply fail the comparison rather than panicking or silently matching.
pub fn distance_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1.is_nan() || lon1.is_nan() || lat2.is_nan() || lon2.is_nan() {
        return f64::INFINITY;
    }

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_NM * c
}

/// Initial bearing (degrees, 0-360, true north) from point 1 to point 2.
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1.is_nan() || lon1.is_nan() || lat2.is_nan() || lon2.is_nan() {
        return f64::NAN;
    }

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    let theta = y.atan2(x).to_degrees();
    (theta + 360.0) % 360.0
}

/// Whether `(lat, lon)` lies within `radius_nm` of `(center_lat, center_lon)`.
pub fn point_in_ring(lat: f64, lon: f64, center_lat: f64, center_lon: f64, radius_nm: f64) -> bool {
    distance_nm(lat, lon, center_lat, center_lon) <= radius_nm
}

/// Even-odd ray-casting point-in-polygon test over the polygon's exterior ring, planar in
/// lat/lon. A point exactly on an edge is classified as inside; NaN coordinates are never
/// inside.
///
/// The polygon is expected closed (first vertex repeated as last) or not; both are handled
/// since the scan wraps via `windows`-style adjacent pairs regardless.
pub fn point_in_polygon(lat: f64, lon: f64, polygon: &Polygon<f64>) -> bool {
    if lat.is_nan() || lon.is_nan() {
        return false;
    }

    let ring = polygon.exterior();
    if on_boundary(lat, lon, ring) {
        return true;
    }

    let coords: Vec<Coord<f64>> = ring.coords().copied().collect();
    if coords.len() < 3 {
        return false;
    }

    let mut inside = false;
    let n = coords.len();
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (coords[i].x, coords[i].y);
        let (xj, yj) = (coords[j].x, coords[j].y);

        let straddles = (yi > lat) != (yj > lat);
        if straddles {
            let x_cross = xi + (lat - yi) * (xj - xi) / (yj - yi);
            if lon < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Returns true if `(lat, lon)` sits on one of the ring's edges (within floating-point epsilon).
fn on_boundary(lat: f64, lon: f64, ring: &LineString<f64>) -> bool {
    let coords: Vec<Coord<f64>> = ring.coords().copied().collect();
    if coords.len() < 2 {
        return false;
    }
    let n = coords.len();
    for i in 0..n {
        let a = coords[i];
        let b = coords[(i + 1) % n];
        if point_on_segment(lon, lat, a.x, a.y, b.x, b.y) {
            return true;
        }
    }
    false
}

fn point_on_segment(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> bool {
    const EPS: f64 = 1e-9;
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    if cross.abs() > EPS {
        return false;
    }
    let dot = (px - ax) * (bx - ax) + (py - ay) * (by - ay);
    if dot < 0.0 {
        return false;
    }
    let len_sq = (bx - ax).powi(2) + (by - ay).powi(2);
    dot <= len_sq
}

/// Build a closed polygon from a simple ordered list of `(lat, lon)` vertices.
pub fn polygon_from_lat_lon(vertices: &[(f64, f64)]) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = vertices
        .iter()
        .map(|&(lat, lon)| Coord { x: lon, y: lat })
        .collect();
    Polygon::new(LineString::from(coords), vec![])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_zero_for_same_point() {
        assert!(distance_nm(40.0, -74.0, 40.0, -74.0) < 0.001);
    }

    #[test]
    fn distance_one_degree_latitude_is_about_sixty_nm() {
        let d = distance_nm(0.0, 0.0, 1.0, 0.0);
        assert!((d - 60.0).abs() < 0.5, "got {d}");
    }

    #[test]
    fn distance_nan_is_infinite() {
        assert!(distance_nm(f64::NAN, 0.0, 0.0, 0.0).is_infinite());
    }

    #[test]
    fn ring_contains_center() {
        assert!(point_in_ring(0.0, 0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn ring_excludes_far_point() {
        assert!(!point_in_ring(10.0, 10.0, 0.0, 0.0, 1.0));
    }

    fn square() -> Polygon<f64> {
        polygon_from_lat_lon(&[(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0), (0.0, 0.0)])
    }

    #[test]
    fn polygon_contains_interior_point() {
        assert!(point_in_polygon(1.0, 1.0, &square()));
    }

    #[test]
    fn polygon_excludes_exterior_point() {
        assert!(!point_in_polygon(5.0, 5.0, &square()));
    }

    #[test]
    fn polygon_includes_edge_point() {
        assert!(point_in_polygon(0.0, 1.0, &square()));
    }

    #[test]
    fn polygon_includes_vertex() {
        assert!(point_in_polygon(0.0, 0.0, &square()));
    }

    #[test]
    fn polygon_rejects_nan() {
        assert!(!point_in_polygon(f64::NAN, 0.0, &square()));
    }
}
