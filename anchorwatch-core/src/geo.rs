//! Spherical geodesy helpers.
//!
//! All functions are pure. Distances use a sphere with the WGS-84 equatorial
//! radius, which is accurate to a fraction of a percent at anchoring scales.
//! Polygon builders return `(lon, lat)` pairs, matching GeoJSON axis order.

/// Sphere radius in meters (WGS-84 equatorial radius)
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Default number of segments for circle approximations
pub const CIRCLE_STEPS: usize = 90;

/// Great-circle (haversine) distance in meters.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h slightly outside [0, 1] near 0 and near antipodes
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing from point 1 to point 2, in degrees [0, 360).
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

/// Normalize bearing to 0-360 range
pub fn normalize_bearing(bearing: f64) -> f64 {
    let mut b = bearing % 360.0;
    if b < 0.0 {
        b += 360.0;
    }
    // -1e-15 % 360 + 360 rounds to 360
    if b >= 360.0 {
        b -= 360.0;
    }
    b
}

/// Check whether `bearing` lies in the window `heading ± width/2`.
///
/// A width of 0 (or 360 and more) is the full circle.
pub fn bearing_in_sector(bearing: f64, heading_deg: i32, sector_width_deg: i32) -> bool {
    if sector_width_deg == 0 || sector_width_deg >= 360 {
        return true;
    }
    let half = sector_width_deg as f64 / 2.0;
    let bearing = normalize_bearing(bearing);
    let start = normalize_bearing(heading_deg as f64 - half);
    let end = normalize_bearing(heading_deg as f64 + half);

    if start <= end {
        bearing >= start && bearing <= end
    } else {
        // Window crosses 0 degrees
        bearing >= start || bearing <= end
    }
}

/// True if the fix lies in the sector seen from the anchor.
pub fn is_inside_sector(
    anchor_lat: f64,
    anchor_lon: f64,
    fix_lat: f64,
    fix_lon: f64,
    heading_deg: i32,
    sector_width_deg: i32,
) -> bool {
    if sector_width_deg == 0 {
        return true;
    }
    let brg = bearing_deg(anchor_lat, anchor_lon, fix_lat, fix_lon);
    bearing_in_sector(brg, heading_deg, sector_width_deg)
}

/// Point reached by travelling `distance_m` from a start point along an
/// initial bearing. Returns `(lat, lon)` in degrees.
pub fn destination_point(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let phi0 = lat.to_radians();
    let lambda0 = lon.to_radians();

    let sin_phi = phi0.sin() * delta.cos() + phi0.cos() * delta.sin() * theta.cos();
    let phi = sin_phi.clamp(-1.0, 1.0).asin();
    let y = theta.sin() * delta.sin() * phi0.cos();
    let x = delta.cos() - phi0.sin() * sin_phi;
    let lambda = lambda0 + y.atan2(x);

    (phi.to_degrees(), normalize_longitude(lambda.to_degrees()))
}

/// Closed polygon approximating a circle, as `(lon, lat)` pairs.
///
/// The ring has `steps + 1` points; the last repeats the first.
pub fn circle_polygon(lat: f64, lon: f64, radius_m: f64, steps: usize) -> Vec<(f64, f64)> {
    let steps = steps.max(3);
    let mut ring = Vec::with_capacity(steps + 1);
    for i in 0..steps {
        let bearing = 360.0 * (i as f64 / steps as f64);
        let (p_lat, p_lon) = destination_point(lat, lon, bearing, radius_m);
        ring.push((p_lon, p_lat));
    }
    ring.push(ring[0]);
    ring
}

/// Closed "donut slice" ring between `inner_m` and `outer_m`, spanning
/// `heading ± width/2`, as `(lon, lat)` pairs.
///
/// The outer arc runs clockwise from the start bearing, the inner arc back.
pub fn sector_polygon(
    lat: f64,
    lon: f64,
    inner_m: f64,
    outer_m: f64,
    heading_deg: i32,
    sector_width_deg: i32,
    steps: usize,
) -> Vec<(f64, f64)> {
    let start = heading_deg as f64 - sector_width_deg as f64 / 2.0;
    let sweep = sector_width_deg.clamp(0, 360) as f64;

    let mut ring = arc_points(lat, lon, outer_m, start, sweep, steps);
    let mut inner = arc_points(lat, lon, inner_m, start, sweep, steps);
    inner.reverse();
    ring.extend(inner);
    if let Some(&first) = ring.first() {
        ring.push(first);
    }
    ring
}

fn arc_points(
    lat: f64,
    lon: f64,
    radius_m: f64,
    start_deg: f64,
    sweep_deg: f64,
    steps: usize,
) -> Vec<(f64, f64)> {
    let segments = ((steps as f64 * sweep_deg / 360.0) as usize).max(2);
    (0..=segments)
        .map(|i| {
            let bearing = start_deg + sweep_deg * i as f64 / segments as f64;
            let (p_lat, p_lon) = destination_point(lat, lon, bearing, radius_m);
            (p_lon, p_lat)
        })
        .collect()
}

fn normalize_longitude(lon: f64) -> f64 {
    let l = (lon + 540.0) % 360.0 - 180.0;
    if l < -180.0 {
        l + 360.0
    } else {
        l
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_one_millidegree_latitude() {
        // 0.001 deg of latitude on this sphere is ~111.3 m
        let d = distance_meters(48.0, -4.5, 48.001, -4.5);
        assert!((d - 111.32).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn test_distance_identical_points() {
        assert_eq!(distance_meters(48.0, -4.5, 48.0, -4.5), 0.0);
    }

    #[test]
    fn test_distance_antipodal_is_finite() {
        let d = distance_meters(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_bearing_cardinal() {
        assert!((bearing_deg(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((bearing_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
        assert!((bearing_deg(0.0, 0.0, -1.0, 0.0) - 180.0).abs() < 1e-9);
        assert!((bearing_deg(0.0, 0.0, 0.0, -1.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_sector_wrap_around() {
        // heading 350, width 60 -> [320, 20]
        assert!(bearing_in_sector(10.0, 350, 60));
        assert!(bearing_in_sector(330.0, 350, 60));
        assert!(bearing_in_sector(0.0, 350, 60));
        assert!(!bearing_in_sector(200.0, 350, 60));
        assert!(!bearing_in_sector(25.0, 350, 60));
    }

    #[test]
    fn test_sector_normal_window() {
        assert!(bearing_in_sector(90.0, 90, 90));
        assert!(bearing_in_sector(45.0, 90, 90));
        assert!(!bearing_in_sector(30.0, 90, 90));
        assert!(!bearing_in_sector(270.0, 90, 90));
    }

    #[test]
    fn test_is_inside_sector_geographic() {
        // Fix due north of the anchor
        let (lat, lon) = destination_point(48.0, -4.5, 10.0, 80.0);
        assert!(is_inside_sector(48.0, -4.5, lat, lon, 350, 60));
        let (lat, lon) = destination_point(48.0, -4.5, 200.0, 80.0);
        assert!(!is_inside_sector(48.0, -4.5, lat, lon, 350, 60));
    }

    #[test]
    fn test_destination_round_trip() {
        let (lat, lon) = destination_point(48.0, -4.5, 45.0, 80.0);
        assert!((distance_meters(48.0, -4.5, lat, lon) - 80.0).abs() < 0.01);
        assert!((bearing_deg(48.0, -4.5, lat, lon) - 45.0).abs() < 0.01);
    }

    #[test]
    fn test_circle_polygon_closed_and_on_radius() {
        let ring = circle_polygon(48.0, -4.5, 60.0, CIRCLE_STEPS);
        assert_eq!(ring.len(), CIRCLE_STEPS + 1);
        assert_eq!(ring.first(), ring.last());
        for &(lon, lat) in &ring {
            assert!((distance_meters(48.0, -4.5, lat, lon) - 60.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_sector_polygon_shape() {
        let ring = sector_polygon(48.0, -4.5, 5.0, 60.0, 0, 90, CIRCLE_STEPS);
        assert_eq!(ring.first(), ring.last());
        // 90 deg of 90 steps -> 22 segments per arc, 23 points each, plus closing point
        assert_eq!(ring.len(), 23 * 2 + 1);
        let (lon, lat) = ring[0];
        assert!((bearing_deg(48.0, -4.5, lat, lon) - 315.0).abs() < 0.01);
    }

    #[test]
    fn test_normalize_longitude() {
        assert!((normalize_longitude(190.0) - -170.0).abs() < 1e-9);
        assert!((normalize_longitude(-190.0) - 170.0).abs() < 1e-9);
        assert!((normalize_longitude(-4.5) - -4.5).abs() < 1e-9);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_distance_symmetric_non_negative(
                lat1 in -89.9..89.9_f64,
                lon1 in -180.0..180.0_f64,
                lat2 in -89.9..89.9_f64,
                lon2 in -180.0..180.0_f64
            ) {
                let ab = distance_meters(lat1, lon1, lat2, lon2);
                let ba = distance_meters(lat2, lon2, lat1, lon1);
                prop_assert!(ab >= 0.0);
                prop_assert!(ab.is_finite());
                prop_assert!((ab - ba).abs() < 1e-6, "asymmetric: {} vs {}", ab, ba);
            }

            #[test]
            fn test_distance_zero_iff_identical(
                lat1 in -89.9..89.9_f64,
                lon1 in -180.0..180.0_f64,
                lat2 in -89.9..89.9_f64,
                lon2 in -180.0..180.0_f64
            ) {
                prop_assert_eq!(distance_meters(lat1, lon1, lat1, lon1), 0.0);
                prop_assume!(lat1 != lat2 || lon1 != lon2);
                prop_assert!(distance_meters(lat1, lon1, lat2, lon2) > 0.0);
            }

            #[test]
            fn test_bearing_in_range(
                lat1 in -89.9..89.9_f64,
                lon1 in -180.0..180.0_f64,
                lat2 in -89.9..89.9_f64,
                lon2 in -180.0..180.0_f64
            ) {
                let b = bearing_deg(lat1, lon1, lat2, lon2);
                prop_assert!((0.0..360.0).contains(&b), "bearing {} out of range", b);
            }

            #[test]
            fn test_zero_width_sector_is_full_circle(
                bearing in -720.0..720.0_f64,
                heading in 0i32..360
            ) {
                prop_assert!(bearing_in_sector(bearing, heading, 0));
            }

            #[test]
            fn test_sector_center_always_inside(
                heading in 0i32..360,
                width in 1i32..360
            ) {
                prop_assert!(bearing_in_sector(heading as f64, heading, width));
                // Opposite bearing is outside any window narrower than 360
                let opposite = heading as f64 + 180.0;
                prop_assert!(!bearing_in_sector(opposite, heading, width.min(358)));
            }
        }
    }
}
