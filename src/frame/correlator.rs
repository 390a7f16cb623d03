//! Sync-word correlator.
//!
//! Grounded directly on `original_source/src/decoder/correlator.cc`: the
//! four encoded sync-word constants and the sliding 64-bit popcount-XOR
//! scorer are carried over unchanged, in the style of the teacher crate's
//! `correlate_access_code.rs` (which does the analogous popcount-distance
//! correlation for its own access code).

use crate::SoftBit;

/// Which downlink and carrier phase a correlation matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    /// LRIT, in phase.
    LritPhase000,
    /// LRIT, 180 degrees out of phase.
    LritPhase180,
    /// HRIT, in phase (prior to NRZ-M decoding).
    HritPhase000,
    /// HRIT, 180 degrees out of phase (prior to NRZ-M decoding).
    HritPhase180,
}

impl SyncType {
    /// Whether this sync type belongs to the LRIT downlink.
    pub fn is_lrit(self) -> bool {
        matches!(self, SyncType::LritPhase000 | SyncType::LritPhase180)
    }

    /// Whether this sync type belongs to the HRIT downlink.
    pub fn is_hrit(self) -> bool {
        matches!(self, SyncType::HritPhase000 | SyncType::HritPhase180)
    }

    /// The downlink's symbol rate in symbols per second.
    pub fn symbol_rate(self) -> u32 {
        if self.is_hrit() {
            927_000
        } else {
            293_883
        }
    }
}

/// Number of bits spanned by an encoded sync word.
pub const ENCODED_SYNC_WORD_BITS: usize = 64;

const ENCODED_SYNC_WORDS: [u64; 4] = [
    0x035d_49c2_4ff2_686b, // LRIT 0
    0xfca2_b63d_b00d_9794, // LRIT 180
    0x03b1_0b02_f33d_2076, // HRIT 0
    0xdafe_f4fd_0cc2_df89, // HRIT 180
];

const SYNC_TYPES: [SyncType; 4] = [
    SyncType::LritPhase000,
    SyncType::LritPhase180,
    SyncType::HritPhase000,
    SyncType::HritPhase180,
];

/// Result of correlating a soft-bit window against all four sync words.
#[derive(Debug, Clone, Copy)]
pub struct Correlation {
    /// Symbol offset of the best-matching window.
    pub position: usize,
    /// Matched sync type.
    pub sync_type: SyncType,
    /// Score (64 minus the Hamming distance) of the best match.
    pub score: u32,
}

/// Correlate soft bits against the four known sync-word patterns.
///
/// Each soft bit's sign (MSB of its `i8` representation) is taken as the
/// hard bit. The match score is `64 - popcount(window XOR pattern)`; the
/// maximum over all positions and patterns selects both position and
/// sync type, exactly as `decoder::correlate` does in the original.
pub fn correlate(data: &[SoftBit]) -> Correlation {
    let mut window: u64 = 0;
    let mut best_pos = [0usize; 4];
    let mut best_score = [0u32; 4];

    for (i, &sample) in data.iter().enumerate() {
        let bit = ((sample as u8) >> 7) as u64 & 1;
        window = (window << 1) | bit;
        if i < ENCODED_SYNC_WORD_BITS - 1 {
            continue;
        }
        for j in 0..4 {
            let score = 64 - (window ^ ENCODED_SYNC_WORDS[j]).count_ones();
            if score > best_score[j] {
                best_score[j] = score;
                best_pos[j] = i - (ENCODED_SYNC_WORD_BITS - 1);
            }
        }
    }

    let mut best = 0;
    for j in 1..4 {
        if best_score[j] > best_score[best] {
            best = j;
        }
    }

    Correlation {
        position: best_pos[best],
        sync_type: SYNC_TYPES[best],
        score: best_score[best],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_bits(word: u64) -> Vec<SoftBit> {
        (0..64)
            .rev()
            .map(|i| if (word >> i) & 1 == 1 { 100 } else { -100 })
            .collect()
    }

    #[test]
    fn exact_sync_word_scores_64_at_position_zero() {
        for (j, &word) in ENCODED_SYNC_WORDS.iter().enumerate() {
            let data = encode_bits(word);
            let c = correlate(&data);
            assert_eq!(c.position, 0);
            assert_eq!(c.sync_type, SYNC_TYPES[j]);
            assert_eq!(c.score, 64);
        }
    }

    #[test]
    fn sync_word_is_found_at_an_offset() {
        let mut data = vec![-100i8; 20];
        data.extend(encode_bits(ENCODED_SYNC_WORDS[2]));
        data.extend(vec![-100i8; 10]);
        let c = correlate(&data);
        assert_eq!(c.position, 20);
        assert_eq!(c.sync_type, SyncType::HritPhase000);
    }

    #[test]
    fn single_bit_error_still_wins_with_score_63() {
        let mut data = encode_bits(ENCODED_SYNC_WORDS[0]);
        data[5] = -data[5];
        let c = correlate(&data);
        assert_eq!(c.sync_type, SyncType::LritPhase000);
        assert_eq!(c.score, 63);
    }
}
