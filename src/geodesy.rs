//! Great-circle distance and bearing over a spherical Earth.
//!
//! All angles are degrees, distances nautical miles. Accuracy of the
//! spherical model is well inside what a 1090 MHz coverage map needs.

/// Mean Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Haversine distance between two points in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_NM * a.sqrt().asin()
}

/// Initial great-circle bearing from point 1 to point 2, in [0, 360).
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Round to six decimal places, the precision positions are emitted at.
pub fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_degree_of_latitude_is_sixty_miles() {
        let d = haversine_nm(51.0, 0.0, 52.0, 0.0);
        assert!((d - 60.04).abs() < 0.1, "distance: {d}");
    }

    #[test]
    fn zero_distance_for_same_point() {
        assert!(haversine_nm(52.3, 4.8, 52.3, 4.8).abs() < 1e-9);
    }

    #[test]
    fn amsterdam_to_london() {
        // Schiphol to Heathrow, roughly 200 nm.
        let d = haversine_nm(52.3086, 4.7639, 51.4700, -0.4543);
        assert!((d - 200.0).abs() < 5.0, "distance: {d}");
    }

    #[test]
    fn cardinal_bearings() {
        assert!((initial_bearing_deg(50.0, 5.0, 51.0, 5.0) - 0.0).abs() < 1e-6);
        assert!((initial_bearing_deg(50.0, 5.0, 49.0, 5.0) - 180.0).abs() < 1e-6);
        assert!((initial_bearing_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-6);
        assert!((initial_bearing_deg(0.0, 0.0, 0.0, -1.0) - 270.0).abs() < 1e-6);
    }

    #[test]
    fn bearing_stays_in_range() {
        for lat in [-60.0, -10.0, 0.0, 30.0, 75.0] {
            for lon in [-170.0, -45.0, 0.0, 90.0, 179.0] {
                let b = initial_bearing_deg(52.0, 5.0, lat, lon);
                assert!((0.0..360.0).contains(&b), "bearing {b} for {lat},{lon}");
            }
        }
    }

    #[test]
    fn round6_truncates_noise() {
        assert_eq!(round6(52.123456789), 52.123457);
        assert_eq!(round6(-0.0000004), -0.0);
    }
}
