//! Receiver coverage aggregation.
//!
//! Sightings projected to (distance, bearing) from the receiver anchor are
//! folded into per-bearing-sector maxima, altitude-band statistics and a
//! range histogram. All math here is pure so the history store can feed it
//! straight from a query.

use serde::Serialize;

/// Number of 45 degree bearing sectors. Sector 0 is centered on North and
/// wraps across 360.
pub const SECTOR_COUNT: usize = 8;
/// Range histogram buckets of 10 nm each; the last absorbs everything beyond.
pub const HISTOGRAM_BUCKETS: usize = 30;
const HISTOGRAM_BUCKET_NM: f64 = 10.0;
/// Altitude bands in feet: 0-10k, 10-20k, 20-30k, 30-40k, 40k+.
pub const ALTITUDE_BANDS: [(i32, &str); 5] = [
    (0, "0-10000 ft"),
    (10_000, "10000-20000 ft"),
    (20_000, "20000-30000 ft"),
    (30_000, "30000-40000 ft"),
    (40_000, "40000+ ft"),
];

const TOP_RANGE_COUNT: usize = 10;

/// One sighting projected onto the receiver.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageSample {
    pub distance_nm: f64,
    pub bearing_deg: f64,
    pub altitude_ft: Option<i32>,
    pub signal: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SectorStats {
    pub count: u64,
    pub max_range_nm: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BandStats {
    pub label: &'static str,
    pub count: u64,
    pub max_range_nm: f64,
    pub avg_range_nm: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub sample_count: u64,
    pub max_range_nm: f64,
    pub avg_range_nm: f64,
    /// The ten most distant sightings.
    pub top_ranges: Vec<CoverageSample>,
    /// Per-sector maxima; index 0 is North.
    pub sectors: [SectorStats; SECTOR_COUNT],
    pub bands: Vec<BandStats>,
    /// Sighting counts per 10 nm of range.
    pub histogram: [u64; HISTOGRAM_BUCKETS],
}

/// Sector index for a bearing: sector `i` covers [i*45 - 22.5, i*45 + 22.5).
pub fn bearing_sector(bearing_deg: f64) -> usize {
    (((bearing_deg + 22.5).rem_euclid(360.0)) / 45.0) as usize % SECTOR_COUNT
}

fn altitude_band(altitude_ft: i32) -> usize {
    (altitude_ft.max(0) as usize / 10_000).min(ALTITUDE_BANDS.len() - 1)
}

/// Fold projected samples into a coverage report.
pub fn analyze(samples: &[CoverageSample]) -> CoverageReport {
    let mut sectors = [SectorStats::default(); SECTOR_COUNT];
    let mut histogram = [0u64; HISTOGRAM_BUCKETS];
    let mut band_counts = [0u64; ALTITUDE_BANDS.len()];
    let mut band_max = [0f64; ALTITUDE_BANDS.len()];
    let mut band_sum = [0f64; ALTITUDE_BANDS.len()];

    let mut max_range = 0.0f64;
    let mut range_sum = 0.0f64;

    for sample in samples {
        max_range = max_range.max(sample.distance_nm);
        range_sum += sample.distance_nm;

        let sector = &mut sectors[bearing_sector(sample.bearing_deg)];
        sector.count += 1;
        sector.max_range_nm = sector.max_range_nm.max(sample.distance_nm);

        let bucket = ((sample.distance_nm / HISTOGRAM_BUCKET_NM) as usize)
            .min(HISTOGRAM_BUCKETS - 1);
        histogram[bucket] += 1;

        if let Some(alt) = sample.altitude_ft {
            let band = altitude_band(alt);
            band_counts[band] += 1;
            band_max[band] = band_max[band].max(sample.distance_nm);
            band_sum[band] += sample.distance_nm;
        }
    }

    let mut top: Vec<CoverageSample> = samples.to_vec();
    top.sort_by(|a, b| b.distance_nm.total_cmp(&a.distance_nm));
    top.truncate(TOP_RANGE_COUNT);

    let bands = ALTITUDE_BANDS
        .iter()
        .enumerate()
        .map(|(i, &(_, label))| BandStats {
            label,
            count: band_counts[i],
            max_range_nm: band_max[i],
            avg_range_nm: if band_counts[i] > 0 {
                band_sum[i] / band_counts[i] as f64
            } else {
                0.0
            },
        })
        .collect();

    CoverageReport {
        sample_count: samples.len() as u64,
        max_range_nm: max_range,
        avg_range_nm: if samples.is_empty() {
            0.0
        } else {
            range_sum / samples.len() as f64
        },
        top_ranges: top,
        sectors,
        bands,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(distance_nm: f64, bearing_deg: f64, altitude_ft: Option<i32>) -> CoverageSample {
        CoverageSample { distance_nm, bearing_deg, altitude_ft, signal: None }
    }

    #[test]
    fn sectors_partition_the_compass() {
        let mut bearing = 0.0;
        while bearing < 360.0 {
            let s = bearing_sector(bearing);
            assert!(s < SECTOR_COUNT, "bearing {bearing} -> sector {s}");
            bearing += 0.25;
        }
    }

    #[test]
    fn sector_zero_straddles_north() {
        assert_eq!(bearing_sector(0.0), 0);
        assert_eq!(bearing_sector(22.4), 0);
        assert_eq!(bearing_sector(337.5), 0);
        assert_eq!(bearing_sector(359.9), 0);
        assert_eq!(bearing_sector(22.5), 1);
        assert_eq!(bearing_sector(45.0), 1);
        assert_eq!(bearing_sector(90.0), 2);
        assert_eq!(bearing_sector(180.0), 4);
        assert_eq!(bearing_sector(270.0), 6);
        assert_eq!(bearing_sector(337.4), 7);
    }

    #[test]
    fn sector_boundaries_count_each_position_once() {
        for bearing in [0.0, 22.5, 45.0, 67.5, 337.5, 359.999] {
            let report = analyze(&[sample(50.0, bearing, None)]);
            let total: u64 = report.sectors.iter().map(|s| s.count).sum();
            assert_eq!(total, 1, "bearing {bearing}");
        }
    }

    #[test]
    fn histogram_buckets_by_ten_miles() {
        let samples = vec![
            sample(0.0, 0.0, None),
            sample(9.99, 0.0, None),
            sample(10.0, 0.0, None),
            sample(155.0, 0.0, None),
            sample(289.9, 0.0, None),
            sample(290.0, 0.0, None),
            sample(1500.0, 0.0, None),
        ];
        let report = analyze(&samples);
        assert_eq!(report.histogram[0], 2);
        assert_eq!(report.histogram[1], 1);
        assert_eq!(report.histogram[15], 1);
        assert_eq!(report.histogram[28], 1);
        // Everything at or past 290 nm lands in the last bucket.
        assert_eq!(report.histogram[29], 2);
    }

    #[test]
    fn altitude_bands() {
        let samples = vec![
            sample(10.0, 0.0, Some(500)),
            sample(20.0, 0.0, Some(15_000)),
            sample(30.0, 0.0, Some(35_000)),
            sample(40.0, 0.0, Some(41_000)),
            sample(50.0, 0.0, Some(99_000)),
            sample(60.0, 0.0, None),
        ];
        let report = analyze(&samples);
        assert_eq!(report.bands[0].count, 1);
        assert_eq!(report.bands[1].count, 1);
        assert_eq!(report.bands[2].count, 0);
        assert_eq!(report.bands[3].count, 1);
        assert_eq!(report.bands[4].count, 2);
        assert_eq!(report.bands[4].max_range_nm, 50.0);
        assert_eq!(report.bands[4].avg_range_nm, 45.0);
    }

    #[test]
    fn ranges_and_top_list() {
        let samples: Vec<_> = (1..=20)
            .map(|i| sample(i as f64 * 10.0, (i * 17 % 360) as f64, None))
            .collect();
        let report = analyze(&samples);
        assert_eq!(report.sample_count, 20);
        assert_eq!(report.max_range_nm, 200.0);
        assert!((report.avg_range_nm - 105.0).abs() < 1e-9);
        assert_eq!(report.top_ranges.len(), 10);
        assert_eq!(report.top_ranges[0].distance_nm, 200.0);
        assert_eq!(report.top_ranges[9].distance_nm, 110.0);
    }

    #[test]
    fn empty_input_is_well_formed() {
        let report = analyze(&[]);
        assert_eq!(report.sample_count, 0);
        assert_eq!(report.max_range_nm, 0.0);
        assert_eq!(report.avg_range_nm, 0.0);
        assert!(report.top_ranges.is_empty());
    }
}
