//! Compact Position Reporting.
//!
//! Airborne positions come as alternating even/odd frames, each carrying a
//! 17-bit fraction of a latitude/longitude zone. A fresh even/odd pair decodes
//! globally; a single frame decodes locally against a nearby reference
//! position (the aircraft's last known fix).

use std::f64::consts::PI;
use std::time::{Duration, Instant};

use crate::geodesy::round6;

/// Number of latitude zones between the equator and a pole.
pub const NZ: f64 = 15.0;

/// Maximum age difference for an even/odd pair to be combined.
pub const FRAME_MAX_AGE: Duration = Duration::from_secs(10);

const D_LAT_EVEN: f64 = 360.0 / (4.0 * NZ);
const D_LAT_ODD: f64 = 360.0 / (4.0 * NZ - 1.0);

/// One received CPR frame: normalized 17-bit fractions plus receipt time.
#[derive(Debug, Clone, Copy)]
pub struct CprFrame {
    pub lat: f64,
    pub lon: f64,
    pub time: Instant,
}

impl CprFrame {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.time)
    }
}

/// Number of longitude zones at a latitude, clamped to [1, 59].
pub fn nl(lat: f64) -> i64 {
    let lat = lat.abs();
    if lat >= 87.0 {
        return 1;
    }
    let a = 1.0 - (PI / (2.0 * NZ)).cos();
    let c = (PI * lat / 180.0).cos();
    let zones = (2.0 * PI / (1.0 - a / (c * c)).acos()).floor() as i64;
    zones.clamp(1, 59)
}

fn modulo(a: i64, b: i64) -> i64 {
    a.rem_euclid(b)
}

/// Globally unambiguous decode of a fresh even/odd pair. The latitude of the
/// most recent frame wins; both frames must land in the same longitude zone.
pub fn decode_global(even: &CprFrame, odd: &CprFrame) -> Option<(f64, f64)> {
    let j = (59.0 * even.lat - 60.0 * odd.lat + 0.5).floor() as i64;

    let mut lat_even = D_LAT_EVEN * (modulo(j, 60) as f64 + even.lat);
    let mut lat_odd = D_LAT_ODD * (modulo(j, 59) as f64 + odd.lat);
    if lat_even >= 270.0 {
        lat_even -= 360.0;
    }
    if lat_odd >= 270.0 {
        lat_odd -= 360.0;
    }
    if !(-90.0..=90.0).contains(&lat_even) || !(-90.0..=90.0).contains(&lat_odd) {
        return None;
    }
    if nl(lat_even) != nl(lat_odd) {
        return None;
    }

    let even_latest = even.time >= odd.time;
    let (lat, zones, frame_lon) = if even_latest {
        (lat_even, nl(lat_even), even.lon)
    } else {
        (lat_odd, nl(lat_odd), odd.lon)
    };

    let m = (even.lon * (zones - 1) as f64 - odd.lon * zones as f64 + 0.5).floor() as i64;
    let ni = if even_latest { zones.max(1) } else { (zones - 1).max(1) };
    let d_lon = 360.0 / ni as f64;
    let mut lon = d_lon * (modulo(m, ni) as f64 + frame_lon);
    if lon > 180.0 {
        lon -= 360.0;
    }

    Some((round6(lat), round6(lon)))
}

/// Locally unambiguous decode of a single frame against a reference position
/// no further than half a zone away.
pub fn decode_local(ref_lat: f64, ref_lon: f64, frame: &CprFrame, odd: bool) -> Option<(f64, f64)> {
    let d_lat = if odd { D_LAT_ODD } else { D_LAT_EVEN };

    let j = (ref_lat / d_lat).floor()
        + (0.5 + ref_lat.rem_euclid(d_lat) / d_lat - frame.lat).floor();
    let lat = d_lat * (j + frame.lat);
    if !(-90.0..=90.0).contains(&lat) || (lat - ref_lat).abs() > d_lat / 2.0 {
        return None;
    }

    let zones = nl(lat) - if odd { 1 } else { 0 };
    let d_lon = 360.0 / zones.max(1) as f64;
    let m = (ref_lon / d_lon).floor()
        + (0.5 + ref_lon.rem_euclid(d_lon) / d_lon - frame.lon).floor();
    let lon = d_lon * (m + frame.lon);
    if (lon - ref_lon).abs() > d_lon / 2.0 {
        return None;
    }

    Some((round6(lat), round6(lon)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(lat17: u32, lon17: u32, time: Instant) -> CprFrame {
        CprFrame {
            lat: lat17 as f64 / 131072.0,
            lon: lon17 as f64 / 131072.0,
            time,
        }
    }

    #[test]
    fn nl_boundaries() {
        assert_eq!(nl(87.0), 1);
        assert_eq!(nl(-87.0), 1);
        assert_eq!(nl(89.9), 1);
        assert_eq!(nl(0.0), 59);
        assert_eq!(nl(45.0), 42);
        assert!(nl(0.0) > nl(45.0));
        assert!(nl(45.0) > 1);
    }

    #[test]
    fn nl_is_symmetric_and_monotonic() {
        let mut prev = nl(0.0);
        let mut lat = 0.0;
        while lat <= 90.0 {
            let zones = nl(lat);
            assert_eq!(zones, nl(-lat));
            assert!(zones <= prev);
            prev = zones;
            lat += 0.5;
        }
    }

    #[test]
    fn decodes_known_pair() {
        // Airborne position frames for 40621D; even frame is the most recent.
        let t0 = Instant::now();
        let even = frame(93000, 51372, t0 + Duration::from_millis(300));
        let odd = frame(74158, 50194, t0);
        let (lat, lon) = decode_global(&even, &odd).unwrap();
        assert!((lat - 52.25720).abs() < 0.001, "lat: {lat}");
        assert!((lon - 3.91937).abs() < 0.001, "lon: {lon}");
    }

    fn encode(lat: f64, lon: f64, odd: bool) -> (u32, u32) {
        let d_lat = if odd { D_LAT_ODD } else { D_LAT_EVEN };
        let lat17 = ((131072.0 * lat.rem_euclid(d_lat) / d_lat) + 0.5).floor() as u32 % 131072;
        let zones = (nl(lat) - if odd { 1 } else { 0 }).max(1);
        let d_lon = 360.0 / zones as f64;
        let lon17 = ((131072.0 * lon.rem_euclid(d_lon) / d_lon) + 0.5).floor() as u32 % 131072;
        (lat17, lon17)
    }

    #[test]
    fn round_trips_through_even_odd_pair() {
        let t0 = Instant::now();
        for &(lat, lon) in &[
            (52.2572, 3.9194),
            (-33.9249, 18.4241),
            (10.05, -75.45),
            (68.3, -133.5),
            (0.25, 0.25),
        ] {
            let (lat_e, lon_e) = encode(lat, lon, false);
            let (lat_o, lon_o) = encode(lat, lon, true);
            let even = frame(lat_e, lon_e, t0 + Duration::from_secs(1));
            let odd = frame(lat_o, lon_o, t0);
            let (dlat, dlon) = decode_global(&even, &odd)
                .unwrap_or_else(|| panic!("no decode for {lat},{lon}"));
            assert!((dlat - lat).abs() < 0.001, "{lat} -> {dlat}");
            assert!((dlon - lon).abs() < 0.001, "{lon} -> {dlon}");
        }
    }

    #[test]
    fn local_decode_tracks_reference() {
        let t0 = Instant::now();
        for &(lat, lon) in &[(52.2572, 3.9194), (-33.9249, 18.4241), (10.05, -75.45)] {
            for odd in [false, true] {
                let (lat17, lon17) = encode(lat, lon, odd);
                let f = frame(lat17, lon17, t0);
                // Reference a few miles away, as a previous fix would be.
                let (dlat, dlon) = decode_local(lat + 0.2, lon - 0.2, &f, odd).unwrap();
                assert!((dlat - lat).abs() < 0.001, "{lat} -> {dlat}");
                assert!((dlon - lon).abs() < 0.001, "{lon} -> {dlon}");
            }
        }
    }

    #[test]
    fn rejects_zone_mismatch() {
        // Frames encoded either side of the 42/43-zone boundary near 44.1945
        // resolve to latitudes in different zones and must not combine.
        let t0 = Instant::now();
        let (lat_e, lon_e) = encode(44.1950, 10.0, false);
        let (lat_o, lon_o) = encode(44.1940, 10.0, true);
        let even = frame(lat_e, lon_e, t0 + Duration::from_secs(1));
        let odd = frame(lat_o, lon_o, t0);
        assert!(decode_global(&even, &odd).is_none());
    }
}
