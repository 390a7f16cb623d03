//! Rate 1/2, constraint length 7 convolutional code: encoder and
//! soft-decision Viterbi decoder (§4.7, §6).
//!
//! `original_source/src/decoder/viterbi.h` wraps `libcorrect`'s
//! convolutional coder for polynomials `{0x4F, 0x6D}` rather than
//! implementing the trellis itself, so there is no teacher-or-original
//! source to copy the decoder body from. This is a from-scratch,
//! textbook 64-state Viterbi decoder, grounded on the original's choice
//! of polynomials and its `compareSoft` bit-error-counting convention,
//! adapted to this crate's signed `i8` soft-bit representation (positive
//! = confident 1, negative = confident 0) rather than `libcorrect`'s
//! internal unsigned byte convention, which the original never exposes
//! outside the C library anyway.

use crate::SoftBit;

const POLY_A: u8 = 0x4f;
const POLY_B: u8 = 0x6d;
const NUM_STATES: usize = 64;
const STATE_MASK: u8 = 0x3f;

fn step(state: u8, bit: u8) -> (u8, u8, u8) {
    let reg = ((state << 1) | bit) & 0x7f;
    let out_a = (reg & POLY_A).count_ones() as u8 & 1;
    let out_b = (reg & POLY_B).count_ones() as u8 & 1;
    let next_state = reg & STATE_MASK;
    (next_state, out_a, out_b)
}

/// Convolutionally encode a hard-bit message, MSB-first within each byte,
/// into twice as many output bits (also packed MSB-first), starting from
/// the all-zero encoder state.
pub fn encode(msg_bits: &[u8]) -> Vec<u8> {
    let mut state = 0u8;
    let mut out = Vec::with_capacity(msg_bits.len() * 2);
    for &bit in msg_bits {
        let (next, a, b) = step(state, bit);
        out.push(a);
        out.push(b);
        state = next;
    }
    out
}

/// Unpack a byte slice into individual bits, MSB-first.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1);
        }
    }
    bits
}

/// Pack bits, MSB-first, into bytes. Pads the final byte with zero bits
/// if `bits.len()` is not a multiple of 8.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            let mut byte = 0u8;
            for (i, &b) in chunk.iter().enumerate() {
                byte |= b << (7 - i);
            }
            byte
        })
        .collect()
}

#[derive(Clone, Copy)]
struct Path {
    metric: i64,
    prev_state: u8,
    bit: u8,
}

const NEG_INF: i64 = i64::MIN / 2;

/// Soft-decision Viterbi decode `soft.len()` encoded bits (must be even)
/// into `soft.len() / 2` hard bits, MSB-first within returned bytes via
/// [`bits_to_bytes`] at the call site.
///
/// `soft` values follow the quantizer's convention: positive means
/// "confidently a 1 bit", negative means "confidently a 0 bit".
pub fn decode_soft(soft: &[SoftBit]) -> Vec<u8> {
    assert!(soft.len() % 2 == 0, "soft bit count must be even");
    let steps = soft.len() / 2;

    let mut metrics = [NEG_INF; NUM_STATES];
    metrics[0] = 0;
    let mut history: Vec<[Path; NUM_STATES]> = Vec::with_capacity(steps);

    for t in 0..steps {
        let ra = soft[2 * t] as i64;
        let rb = soft[2 * t + 1] as i64;
        let mut next_metrics = [NEG_INF; NUM_STATES];
        let mut step_paths = [Path {
            metric: NEG_INF,
            prev_state: 0,
            bit: 0,
        }; NUM_STATES];

        for state in 0..NUM_STATES {
            if metrics[state] == NEG_INF {
                continue;
            }
            for bit in 0..2u8 {
                let (next, a, b) = step(state as u8, bit);
                let branch = bit_metric(a, ra) + bit_metric(b, rb);
                let candidate = metrics[state] + branch;
                let ns = next as usize;
                if candidate > next_metrics[ns] {
                    next_metrics[ns] = candidate;
                    step_paths[ns] = Path {
                        metric: candidate,
                        prev_state: state as u8,
                        bit,
                    };
                }
            }
        }
        metrics = next_metrics;
        history.push(step_paths);
    }

    // Traceback from the best-scoring final state.
    let mut best_state = 0usize;
    for s in 1..NUM_STATES {
        if metrics[s] > metrics[best_state] {
            best_state = s;
        }
    }

    let mut bits = vec![0u8; steps];
    let mut state = best_state;
    for t in (0..steps).rev() {
        let p = history[t][state];
        bits[t] = p.bit;
        state = p.prev_state as usize;
    }
    bits
}

fn bit_metric(output_bit: u8, soft: i64) -> i64 {
    if output_bit == 1 {
        soft
    } else {
        -soft
    }
}

/// Re-encode a decoded message and count how many hard bits differ from
/// the original soft-bit stream's sign, mirroring
/// `Viterbi::compareSoft` in the original.
pub fn compare_soft(original: &[SoftBit], decoded_bits: &[u8]) -> usize {
    let encoded = encode(decoded_bits);
    assert_eq!(encoded.len(), original.len());
    original
        .iter()
        .zip(encoded.iter())
        .filter(|(&soft, &bit)| {
            let hard = if soft >= 0 { 1 } else { 0 };
            hard != bit
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_soft(bits: &[u8]) -> Vec<SoftBit> {
        bits.iter().map(|&b| if b == 1 { 100 } else { -100 }).collect()
    }

    #[test]
    fn round_trips_a_clean_bit_sequence() {
        let msg: Vec<u8> = vec![1, 0, 1, 1, 0, 0, 1, 0, 1, 1, 1, 0, 0, 0, 1, 1];
        let encoded = encode(&msg);
        let soft = to_soft(&encoded);
        let decoded = decode_soft(&soft);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn corrects_a_single_bit_error() {
        let msg: Vec<u8> = (0..64).map(|i| (i * 7 % 3 == 0) as u8).collect();
        let encoded = encode(&msg);
        let mut soft = to_soft(&encoded);
        soft[10] = -soft[10];
        let decoded = decode_soft(&soft);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn compare_soft_counts_zero_errors_on_exact_match() {
        let msg: Vec<u8> = vec![1, 1, 0, 1, 0, 0, 1, 1];
        let encoded = encode(&msg);
        let soft = to_soft(&encoded);
        assert_eq!(compare_soft(&soft, &msg), 0);
    }

    #[test]
    fn bit_byte_packing_round_trips() {
        let bytes = [0b10110010u8, 0b00001111];
        let bits = bytes_to_bits(&bytes);
        assert_eq!(bits_to_bytes(&bits), bytes);
    }
}
