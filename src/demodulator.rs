//! Mode S demodulation.
//!
//! The preamble is an 8 us pattern with pulses at sample offsets 0, 2, 7 and
//! 9 (2 MS/s, so two samples per microsecond). Data bits follow as pulse
//! position modulation, one bit per microsecond: energy in the first half
//! sample means 1, in the second half 0.
//!
//! Bit decisions carry a confidence delta; a frame whose accumulated delta is
//! too small is noise and is dropped before it ever reaches the decoder.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::decoder::{frame_bits_for_df, Decoder, Message};
use crate::frame::{Frame, LONG_FRAME_BITS, SHORT_FRAME_BITS};

/// Sample rate the whole pipeline is built around.
pub const SAMPLE_RATE_HZ: u32 = 2_000_000;
/// PPM bit period in samples.
pub const SAMPLES_PER_BIT: usize = 2;
/// Preamble length in samples.
pub const PREAMBLE_SAMPLES: usize = 16;
/// Longest message body in samples.
pub const LONG_MESSAGE_SAMPLES: usize = LONG_FRAME_BITS * SAMPLES_PER_BIT;
/// Preamble plus longest body: the scan window.
pub const FULL_FRAME_SAMPLES: usize = PREAMBLE_SAMPLES + LONG_MESSAGE_SAMPLES;

/// Weakest preamble level worth attempting a decode on.
const MIN_SIGNAL_LEVEL: f32 = 0.008;
/// Below this first/second-half difference a bit decision is untrusted and
/// the previous bit is repeated.
const LOW_CONFIDENCE_BIT_THRESHOLD: f32 = 0.004;
/// Minimum mean confidence per bit for the frame to count as signal.
const MIN_BIT_DELTA: f32 = 0.003;

const DF17_DEBUG_INTERVAL: Duration = Duration::from_secs(5);

/// Pipeline counters, shared behind a small mutex.
#[derive(Debug, Default, Clone)]
pub struct DemodStats {
    pub samples_processed: u64,
    pub preambles_detected: u64,
    pub messages_decoded: u64,
    pub crc_failures: u64,
    pub crc_fixed: u64,
    pub messages_filtered: u64,
    /// Last DF17 frame that failed CRC beyond repair, for debugging.
    pub last_df17_failure: Option<String>,
}

impl DemodStats {
    pub fn log_summary(&self) {
        info!(
            samples = self.samples_processed,
            preambles = self.preambles_detected,
            decoded = self.messages_decoded,
            crc_failures = self.crc_failures,
            crc_fixed = self.crc_fixed,
            filtered = self.messages_filtered,
            "demodulator stats"
        );
    }
}

/// Preamble detector and PPM bit slicer. Stateless across buffers apart from
/// the shared counters.
pub struct Demodulator {
    decoder: Decoder,
    stats: Arc<Mutex<DemodStats>>,
    df17_logged: Mutex<Option<Instant>>,
}

impl Demodulator {
    pub fn new(decoder: Decoder) -> Self {
        Self {
            decoder,
            stats: Arc::new(Mutex::new(DemodStats::default())),
            df17_logged: Mutex::new(None),
        }
    }

    /// Shared counter handle, also incremented by downstream filters.
    pub fn stats(&self) -> Arc<Mutex<DemodStats>> {
        Arc::clone(&self.stats)
    }

    /// Scan one magnitude buffer and return every decodable message in it.
    /// Scanning stops when the remainder is shorter than a full frame.
    pub fn process_buffer(&self, m: &[f32]) -> Vec<Message> {
        let mut out = Vec::new();
        let mut tally = DemodStats {
            samples_processed: m.len() as u64,
            ..DemodStats::default()
        };

        let mut j = 0;
        while j + FULL_FRAME_SAMPLES <= m.len() {
            let Some(high) = preamble_at(m, j) else {
                j += 1;
                continue;
            };
            tally.preambles_detected += 1;

            match self.decode_at(m, j + PREAMBLE_SAMPLES, high, &mut tally) {
                Some(msg) => {
                    out.push(msg);
                    j += FULL_FRAME_SAMPLES;
                }
                None => j += 1,
            }
        }

        self.merge(tally);
        out
    }

    /// Try a long recovery, then a short one at the same offset.
    fn decode_at(
        &self,
        m: &[f32],
        start: usize,
        high: f32,
        tally: &mut DemodStats,
    ) -> Option<Message> {
        if let Some(frame) = recover_bits(m, start, LONG_FRAME_BITS) {
            if frame_bits_for_df(frame.df()) == LONG_FRAME_BITS {
                match self.decoder.decode(frame, high as f64) {
                    Some(msg) => {
                        tally.messages_decoded += 1;
                        if msg.crc_fixed {
                            tally.crc_fixed += 1;
                        }
                        return Some(msg);
                    }
                    None => {
                        tally.crc_failures += 1;
                        if frame.df() == 17 {
                            tally.last_df17_failure = Some(frame.to_hex());
                            self.log_df17_failure(&frame);
                        }
                    }
                }
            }
        }

        if let Some(frame) = recover_bits(m, start, SHORT_FRAME_BITS) {
            if frame_bits_for_df(frame.df()) == SHORT_FRAME_BITS {
                if let Some(msg) = self.decoder.decode(frame, high as f64) {
                    tally.messages_decoded += 1;
                    return Some(msg);
                }
            }
        }

        None
    }

    fn log_df17_failure(&self, frame: &Frame) {
        let mut last = self.df17_logged.lock();
        let now = Instant::now();
        if last.map_or(true, |t| now.duration_since(t) >= DF17_DEBUG_INTERVAL) {
            debug!(frame = %frame, "unrepairable CRC failure on DF17 frame");
            *last = Some(now);
        }
    }

    fn merge(&self, tally: DemodStats) {
        let mut stats = self.stats.lock();
        stats.samples_processed += tally.samples_processed;
        stats.preambles_detected += tally.preambles_detected;
        stats.messages_decoded += tally.messages_decoded;
        stats.crc_failures += tally.crc_failures;
        stats.crc_fixed += tally.crc_fixed;
        if tally.last_df17_failure.is_some() {
            stats.last_df17_failure = tally.last_df17_failure;
        }
    }
}

/// Check for a preamble starting at `i` and return its signal level.
///
/// Pulses sit at offsets 0, 2, 7 and 9; everything else must stay below the
/// pulse average, including the four quiet samples before the data starts.
fn preamble_at(m: &[f32], i: usize) -> Option<f32> {
    if !(m[i] > m[i + 1]
        && m[i + 1] < m[i + 2]
        && m[i + 2] > m[i + 3]
        && m[i + 3] < m[i]
        && m[i + 4] < m[i]
        && m[i + 5] < m[i]
        && m[i + 6] < m[i]
        && m[i + 7] > m[i + 8]
        && m[i + 8] < m[i + 9]
        && m[i + 9] > m[i + 6])
    {
        return None;
    }

    let high = (m[i] + m[i + 2] + m[i + 7] + m[i + 9]) / 6.0;
    if high < MIN_SIGNAL_LEVEL {
        return None;
    }
    if m[i + 4] >= high || m[i + 5] >= high {
        return None;
    }
    if m[i + 11] >= high || m[i + 12] >= high || m[i + 13] >= high || m[i + 14] >= high {
        return None;
    }

    Some(high)
}

/// Slice `nbits` PPM bits starting at `start`.
///
/// The first-half sample is scaled by a phase correction chosen from the
/// previous bit (1.25 after a one, 0.8 after a zero). Low-confidence bits
/// repeat the previous decision; a frame whose summed confidence is below
/// `MIN_BIT_DELTA` per bit is rejected outright.
fn recover_bits(m: &[f32], start: usize, nbits: usize) -> Option<Frame> {
    let mut bits = [0u8; LONG_FRAME_BITS];
    let mut phase = 1.0f32;
    let mut delta_sum = 0.0f32;

    for k in 0..nbits {
        let base = start + k * SAMPLES_PER_BIT;
        let first = m[base] * phase;
        let second = m[base + 1];
        let delta = (first - second).abs();
        delta_sum += delta;

        let bit = if k > 0 && delta < LOW_CONFIDENCE_BIT_THRESHOLD {
            bits[k - 1]
        } else if first > second {
            1
        } else {
            0
        };
        bits[k] = bit;
        phase = if bit == 1 { 1.25 } else { 0.8 };
    }

    (delta_sum >= MIN_BIT_DELTA * nbits as f32).then(|| Frame::from_bits(&bits[..nbits]))
}
