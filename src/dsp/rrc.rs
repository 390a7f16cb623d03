//! Root-raised-cosine matched filter with optional decimation (§4.3).
//!
//! Tap generation follows the same shape as the teacher crate's
//! `fir::low_pass` (a closed-form impulse response sampled at the working
//! rate), adapted from a windowed-sinc low-pass to the root-raised-cosine
//! pulse; filtering keeps `fir::FIR<T>`'s "reversed taps, dot product"
//! core but adds the cross-call tail buffer and decimation the
//! specification requires.

use crate::block::{Stage, StageRet};
use crate::queue::Queue;
use crate::{Complex, Float};
use anyhow::{anyhow, Result};

/// Number of taps in the matched filter, as named in the specification.
pub const NTAPS: usize = 32;

/// Generate `ntaps` root-raised-cosine filter taps for a given sample rate,
/// symbol rate, and rolloff factor.
pub fn rrc_taps(sample_rate: Float, symbol_rate: Float, rolloff: Float, ntaps: usize) -> Vec<Float> {
    let sps = sample_rate / symbol_rate; // samples per symbol == Ts in sample units
    let mut taps = vec![0.0; ntaps];
    let center = (ntaps as Float - 1.0) / 2.0;
    for (i, tap) in taps.iter_mut().enumerate() {
        let t = (i as Float - center) / sps;
        *tap = rrc_impulse(t, rolloff);
    }
    // Normalize to unit energy so the matched filter doesn't change signal
    // scale, matching the teacher's `low_pass` normalizing by DC gain.
    let energy: Float = taps.iter().map(|x| x * x).sum::<Float>().sqrt();
    if energy > 0.0 {
        for tap in &mut taps {
            *tap /= energy;
        }
    }
    taps
}

fn rrc_impulse(t: Float, beta: Float) -> Float {
    use std::f32::consts::PI;
    if t.abs() < 1e-8 {
        return 1.0 - beta + 4.0 * beta / PI;
    }
    let denom = 4.0 * beta * t;
    if beta > 0.0 && (denom.abs() - 1.0).abs() < 1e-6 {
        let x = PI / (4.0 * beta);
        return (beta / std::f32::consts::SQRT_2)
            * ((1.0 + 2.0 / PI) * x.sin() + (1.0 - 2.0 / PI) * x.cos());
    }
    let num = (PI * t * (1.0 - beta)).sin() + 4.0 * beta * t * (PI * t * (1.0 + beta)).cos();
    let den = PI * t * (1.0 - denom * denom);
    num / den
}

/// A root-raised-cosine matched filter with a cross-call tail, so no
/// samples are lost at block boundaries, and integer decimation.
pub struct MatchedFilter {
    taps: Vec<Float>,
    decimation: usize,
    tail: Vec<Complex>,
}

impl MatchedFilter {
    /// Create a new filter. `decimation` must be at least 1.
    pub fn new(taps: Vec<Float>, decimation: usize) -> Self {
        assert!(decimation >= 1, "decimation must be >= 1");
        let ntaps = taps.len();
        Self {
            taps,
            decimation,
            tail: vec![Complex::new(0.0, 0.0); ntaps.saturating_sub(1)],
        }
    }

    /// Filter and decimate a block of samples. `input.len()` must be a
    /// multiple of the decimation factor.
    pub fn process(&mut self, input: &[Complex]) -> Result<Vec<Complex>> {
        if input.len() % self.decimation != 0 {
            return Err(anyhow!(
                "matched filter input length {} not a multiple of decimation {}",
                input.len(),
                self.decimation
            ));
        }
        let mut history = self.tail.clone();
        history.extend_from_slice(input);

        let ntaps = self.taps.len();
        let out_len = input.len() / self.decimation;
        let mut out = Vec::with_capacity(out_len);
        for i in 0..out_len {
            let center = i * self.decimation + ntaps - 1;
            let mut acc = Complex::new(0.0, 0.0);
            for (k, tap) in self.taps.iter().enumerate() {
                acc += history[center - k] * *tap;
            }
            out.push(acc);
        }

        let keep = ntaps.saturating_sub(1);
        let start = history.len() - keep;
        self.tail = history[start..].to_vec();
        Ok(out)
    }
}

/// Pipeline stage wrapping [`MatchedFilter`].
pub struct MatchedFilterStage {
    filter: MatchedFilter,
    input: Queue<Vec<Complex>>,
    output: Queue<Vec<Complex>>,
}

impl MatchedFilterStage {
    /// Create a new stage.
    pub fn new(filter: MatchedFilter, input: Queue<Vec<Complex>>, output: Queue<Vec<Complex>>) -> Self {
        Self {
            filter,
            input,
            output,
        }
    }
}

impl Stage for MatchedFilterStage {
    fn name(&self) -> &str {
        "matched_filter"
    }

    fn work(&mut self) -> Result<StageRet> {
        let Some(block) = self.input.pop_for_read() else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
        let filtered = self.filter.process(&block)?;
        if !self.output.pop_for_write() {
            return Ok(StageRet::Eof);
        }
        self.output.push_write(filtered);
        Ok(StageRet::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taps_are_symmetric() {
        let taps = rrc_taps(8.0, 2.0, 0.35, NTAPS);
        assert_eq!(taps.len(), NTAPS);
        for i in 0..NTAPS / 2 {
            assert!((taps[i] - taps[NTAPS - 1 - i]).abs() < 1e-4);
        }
    }

    #[test]
    fn decimation_reduces_output_length() {
        let taps = rrc_taps(8.0, 2.0, 0.35, NTAPS);
        let mut mf = MatchedFilter::new(taps, 4);
        let input = vec![Complex::new(1.0, 0.0); 400];
        let out = mf.process(&input).unwrap();
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn rejects_non_multiple_length() {
        let taps = rrc_taps(8.0, 2.0, 0.35, NTAPS);
        let mut mf = MatchedFilter::new(taps, 4);
        let input = vec![Complex::new(1.0, 0.0); 401];
        assert!(mf.process(&input).is_err());
    }
}
