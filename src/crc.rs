//! CRC-24 for Mode S frames.
//!
//! The checksum is a left-shift/XOR register over the frame bits: for each
//! input bit the outgoing MSB of the 24-bit register is captured, the register
//! shifts left taking the bit into the LSB, and the register is XORed with the
//! generator polynomial iff the captured MSB was set. A long frame is valid
//! iff the register closes to zero over all 112 bits.
//!
//! Single-bit errors are corrected through a syndrome table: the checksum of
//! an otherwise-zero 112-bit frame with bit `p` set is the syndrome any frame
//! with an error at `p` will produce, so one lookup names the bad bit.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::frame::{Frame, LONG_FRAME_BITS};

/// Mode S generator polynomial.
pub const POLYNOMIAL: u32 = 0x1FF_F409;

const REGISTER_MASK: u32 = 0xFF_FFFF;

/// CRC-24 over the whole frame.
pub fn checksum(frame: &Frame) -> u32 {
    checksum_bits(frame, frame.len())
}

/// CRC-24 over the first `nbits` of the frame.
pub fn checksum_bits(frame: &Frame, nbits: usize) -> u32 {
    let mut register: u32 = 0;
    for i in 0..nbits {
        let msb_out = register >> 23 & 1;
        register = (register << 1 | frame.bit(i) as u32) & REGISTER_MASK;
        if msb_out == 1 {
            register = (register ^ POLYNOMIAL) & REGISTER_MASK;
        }
    }
    register
}

static SYNDROMES: OnceLock<HashMap<u32, usize>> = OnceLock::new();

/// Syndrome-to-bit-position table for 112-bit frames, built on first use and
/// read lock-free afterwards.
fn syndrome_table() -> &'static HashMap<u32, usize> {
    SYNDROMES.get_or_init(|| {
        let mut table = HashMap::with_capacity(LONG_FRAME_BITS);
        for bit in 0..LONG_FRAME_BITS {
            let mut frame = Frame::zeroed(LONG_FRAME_BITS);
            frame.flip(bit);
            table.insert(checksum(&frame), bit);
        }
        table
    })
}

/// Correct a single-bit error in a long frame, returning the repaired bit
/// position. Short frames are never corrected: their parity field carries the
/// ICAO address and cannot be checked in isolation.
pub fn fix_single_bit(frame: &mut Frame) -> Option<usize> {
    if frame.len() != LONG_FRAME_BITS {
        return None;
    }
    let bit = *syndrome_table().get(&checksum(frame))?;
    frame.flip(bit);
    Some(bit)
}

/// The ICAO address folded into a short reply: the AP field is the checksum of
/// the 32 data bits XORed with the address, so XORing the two recovers it.
pub fn short_frame_icao(frame: &Frame) -> u32 {
    checksum_bits(frame, 32) ^ frame.field(32, 24)
}

/// Recover the ICAO address of a short reply against a candidate set of
/// recently seen addresses. No candidate match means the frame is noise.
pub fn recover_short_icao(frame: &Frame, candidates: &HashSet<u32>) -> Option<u32> {
    let icao = short_frame_icao(frame);
    candidates.contains(&icao).then_some(icao)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SHORT_FRAME_BITS;

    const VALID_DF17: &str = "8D4840D6202CC371C32CE0576098";

    #[test]
    fn register_closes_on_valid_frame() {
        let frame = Frame::from_hex(VALID_DF17).unwrap();
        assert_eq!(checksum(&frame), 0);
    }

    #[test]
    fn register_open_on_corrupt_frame() {
        let mut frame = Frame::from_hex(VALID_DF17).unwrap();
        frame.flip(50);
        assert_ne!(checksum(&frame), 0);
    }

    #[test]
    fn syndrome_table_is_complete() {
        // Every bit position must map to a distinct syndrome.
        assert_eq!(syndrome_table().len(), LONG_FRAME_BITS);
    }

    #[test]
    fn fixes_any_single_bit_error() {
        let original = Frame::from_hex(VALID_DF17).unwrap();
        for bit in [0, 1, 31, 50, 87, 111] {
            let mut corrupted = original;
            corrupted.flip(bit);
            assert_eq!(fix_single_bit(&mut corrupted), Some(bit));
            assert_eq!(corrupted, original);
            assert_eq!(checksum(&corrupted), 0);
        }
    }

    #[test]
    fn refuses_two_bit_errors() {
        let original = Frame::from_hex(VALID_DF17).unwrap();
        for (a, b) in [(3, 77), (50, 51), (0, 111), (20, 88)] {
            let mut corrupted = original;
            corrupted.flip(a);
            corrupted.flip(b);
            assert_eq!(fix_single_bit(&mut corrupted), None);
            assert_ne!(checksum(&corrupted), 0);
        }
    }

    #[test]
    fn short_frames_are_not_corrected() {
        let mut frame = Frame::zeroed(SHORT_FRAME_BITS);
        frame.flip(10);
        assert_eq!(fix_single_bit(&mut frame), None);
    }

    fn build_short_reply(icao: u32) -> Frame {
        // DF5 header plus arbitrary data in the first 32 bits, AP folded in.
        let mut frame = Frame::from_hex("28C3D2A7000000").unwrap();
        let ap = checksum_bits(&frame, 32) ^ icao;
        for i in 0..24 {
            if ap >> (23 - i) & 1 == 1 {
                frame.flip(32 + i);
            }
        }
        frame
    }

    #[test]
    fn recovers_icao_from_candidate_set() {
        let frame = build_short_reply(0xA12345);
        let candidates: HashSet<u32> = [0xFFFFFF, 0xA12345, 0x000000].into_iter().collect();
        assert_eq!(recover_short_icao(&frame, &candidates), Some(0xA12345));

        let wrong: HashSet<u32> = [0xB67890].into_iter().collect();
        assert_eq!(recover_short_icao(&frame, &wrong), None);
    }

    #[test]
    fn recovery_is_exact_for_every_candidate() {
        for icao in [0x000001u32, 0x4840D6, 0xABCDEF, 0xFFFFFF] {
            let frame = build_short_reply(icao);
            assert_eq!(short_frame_icao(&frame), icao);
        }
    }
}
