//! Soft-bit quantizer (§4.6).
//!
//! Grounded on the teacher crate's `binary_slicer.rs` (hard-decision
//! real-to-bit conversion), generalized here to keep the magnitude as a
//! Viterbi confidence rather than collapsing straight to a single bit.

use crate::block::{Stage, StageRet};
use crate::queue::Queue;
use crate::{Complex, Float, SoftBit};
use anyhow::Result;

/// A scale applied before saturating to `i8`, so a unit-amplitude signal
/// uses most of the dynamic range.
const QUANT_SCALE: Float = 127.0;

/// Convert the in-phase component of each sample to a saturating signed
/// 8-bit soft bit: sign is the hard decision, magnitude is confidence.
pub fn quantize(samples: &[Complex]) -> Vec<SoftBit> {
    samples
        .iter()
        .map(|s| {
            let scaled = s.re * QUANT_SCALE;
            scaled.clamp(-127.0, 127.0).round() as SoftBit
        })
        .collect()
}

/// Pipeline stage wrapping [`quantize`].
pub struct QuantizerStage {
    input: Queue<Vec<Complex>>,
    output: Queue<Vec<SoftBit>>,
}

impl QuantizerStage {
    /// Create a new stage.
    pub fn new(input: Queue<Vec<Complex>>, output: Queue<Vec<SoftBit>>) -> Self {
        Self { input, output }
    }
}

impl Stage for QuantizerStage {
    fn name(&self) -> &str {
        "quantizer"
    }

    fn work(&mut self) -> Result<StageRet> {
        let Some(block) = self.input.pop_for_read() else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
        let bits = quantize(&block);
        if !self.output.pop_for_write() {
            return Ok(StageRet::Eof);
        }
        self.output.push_write(bits);
        Ok(StageRet::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_at_plus_minus_127() {
        let samples = [Complex::new(10.0, 0.0), Complex::new(-10.0, 0.0)];
        let bits = quantize(&samples);
        assert_eq!(bits, vec![127, -127]);
    }

    #[test]
    fn sign_encodes_hard_bit() {
        let samples = [Complex::new(0.3, 0.0), Complex::new(-0.3, 0.0)];
        let bits = quantize(&samples);
        assert!(bits[0] > 0);
        assert!(bits[1] < 0);
    }
}
