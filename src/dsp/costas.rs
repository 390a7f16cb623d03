//! Order-2 Costas loop for BPSK carrier recovery (§4.4).
//!
//! Grounded on the teacher crate's `vco.rs` (a phase accumulator driven by
//! a per-sample frequency) combined with the loop-filter shape of
//! `single_pole_iir_filter.rs`; the phase-error/gain update itself follows
//! the exact formulas of the specification rather than any one teacher
//! file, since the teacher crate has no Costas loop block of its own.

use std::f32::consts::PI;
use std::sync::Arc;

use crate::block::{Stage, StageRet};
use crate::queue::Queue;
use crate::stats::DemodTelemetry;
use crate::{Complex, Float};
use anyhow::Result;

/// Tunables for [`CostasLoop`].
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CostasConfig {
    /// Loop bandwidth in radians/sample.
    pub bandwidth: Float,
    /// Damping factor.
    pub damping: Float,
    /// Maximum allowed frequency deviation, in radians/sample.
    pub max_deviation: Float,
}

impl Default for CostasConfig {
    fn default() -> Self {
        Self {
            bandwidth: 0.005,
            damping: std::f32::consts::FRAC_1_SQRT_2,
            max_deviation: 0.1,
        }
    }
}

fn loop_gains(bandwidth: Float, damping: Float) -> (Float, Float) {
    // Standard second-order PLL gain derivation from bandwidth/damping.
    let theta = bandwidth / (damping + 1.0 / (4.0 * damping));
    let alpha = 4.0 * damping * theta / (1.0 + 2.0 * damping * theta + theta * theta);
    let beta = 4.0 * theta * theta / (1.0 + 2.0 * damping * theta + theta * theta);
    (alpha, beta)
}

/// Tracks and removes residual carrier phase/frequency from a BPSK signal.
pub struct CostasLoop {
    phase: Float,
    freq: Float,
    alpha: Float,
    beta: Float,
    max_deviation: Float,
}

impl CostasLoop {
    /// Create a new loop with the given configuration.
    pub fn new(config: CostasConfig) -> Self {
        let (alpha, beta) = loop_gains(config.bandwidth, config.damping);
        Self {
            phase: 0.0,
            freq: 0.0,
            alpha,
            beta,
            max_deviation: config.max_deviation,
        }
    }

    /// Current frequency estimate, in radians/sample, for diagnostics.
    pub fn frequency(&self) -> Float {
        self.freq
    }

    /// Mix carrier phase/frequency out of a block of samples in place.
    pub fn process(&mut self, samples: &mut [Complex]) {
        for s in samples.iter_mut() {
            let rot = Complex::new(self.phase.cos(), -self.phase.sin());
            let mixed = *s * rot;
            *s = mixed;

            let err = (mixed.re * mixed.im).clamp(-1.0, 1.0);
            self.freq += self.beta * err;
            self.freq = self.freq.clamp(-self.max_deviation, self.max_deviation);
            self.phase += self.alpha * err + self.freq;
            while self.phase > 2.0 * PI {
                self.phase -= 2.0 * PI;
            }
            while self.phase < -2.0 * PI {
                self.phase += 2.0 * PI;
            }
        }
    }
}

/// Pipeline stage wrapping [`CostasLoop`].
pub struct CostasStage {
    loop_: CostasLoop,
    input: Queue<Vec<Complex>>,
    output: Queue<Vec<Complex>>,
    telemetry: Arc<DemodTelemetry>,
}

impl CostasStage {
    /// Create a new stage, publishing its frequency estimate through
    /// `telemetry` after every block.
    pub fn new(
        config: CostasConfig,
        input: Queue<Vec<Complex>>,
        output: Queue<Vec<Complex>>,
        telemetry: Arc<DemodTelemetry>,
    ) -> Self {
        Self {
            loop_: CostasLoop::new(config),
            input,
            output,
            telemetry,
        }
    }
}

impl Stage for CostasStage {
    fn name(&self) -> &str {
        "costas"
    }

    fn work(&mut self) -> Result<StageRet> {
        let Some(mut block) = self.input.pop_for_read() else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
        self.loop_.process(&mut block);
        let frequency = self.loop_.frequency();
        self.telemetry.update(|s| s.costas_frequency = frequency);
        if !self.output.pop_for_write() {
            return Ok(StageRet::Eof);
        }
        self.output.push_write(block);
        Ok(StageRet::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_onto_a_static_phase_offset() {
        let mut costas = CostasLoop::new(CostasConfig::default());
        let offset = 0.7_f32;
        let rot = Complex::new(offset.cos(), offset.sin());
        let mut block: Vec<Complex> = (0..20000).map(|_| Complex::new(1.0, 0.0) * rot).collect();
        costas.process(&mut block);
        let tail = &block[block.len() - 200..];
        let mean_im: Float = tail.iter().map(|c| c.im).sum::<Float>() / tail.len() as Float;
        assert!(mean_im.abs() < 0.1, "mean_im={mean_im}");
    }

    #[test]
    fn frequency_is_clamped() {
        let mut costas = CostasLoop::new(CostasConfig {
            bandwidth: 1.0,
            damping: 0.3,
            max_deviation: 0.05,
        });
        let mut block: Vec<Complex> = (0..1000)
            .map(|i| Complex::new((0.3 * i as Float).cos(), (0.3 * i as Float).sin()))
            .collect();
        costas.process(&mut block);
        assert!(costas.frequency().abs() <= 0.05 + 1e-6);
    }
}
