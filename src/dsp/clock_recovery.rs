//! Mueller-Müller symbol timing recovery (§4.5).
//!
//! The teacher crate's `symbol_sync.rs` sketches a zero-crossing timing
//! error detector against an incompatible, older stream API; this module
//! keeps its shape (a timing-error-detector loop driving an interpolating
//! strobe) but replaces the detector with the decision-directed
//! Mueller-Müller rule the specification requires, and targets the
//! current [`crate::queue::Queue`]-based stage API.

use std::sync::Arc;

use crate::block::{Stage, StageRet};
use crate::queue::Queue;
use crate::stats::DemodTelemetry;
use crate::{Complex, Float};
use anyhow::Result;

/// Tunables for [`ClockRecovery`].
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ClockRecoveryConfig {
    /// Nominal samples per symbol at startup.
    pub samples_per_symbol: Float,
    /// Gain on the fractional interpolation offset.
    pub gain_mu: Float,
    /// Gain on the samples-per-symbol estimate.
    pub gain_omega: Float,
}

impl ClockRecoveryConfig {
    /// Build a config from a sample rate and symbol rate, with the
    /// specification's default gains.
    pub fn from_rates(sample_rate: Float, symbol_rate: Float) -> Self {
        Self {
            samples_per_symbol: sample_rate / symbol_rate,
            gain_mu: 0.05,
            gain_omega: 0.00025,
        }
    }
}

/// Recovers symbol timing from an oversampled baseband signal, producing
/// one complex sample per symbol.
pub struct ClockRecovery {
    omega: Float,
    omega_min: Float,
    omega_max: Float,
    mu: Float,
    gain_mu: Float,
    gain_omega: Float,
    prev_decision: Float,
    prev_interp: Float,
    history: Vec<Complex>,
}

impl ClockRecovery {
    /// Create a new clock recovery loop.
    pub fn new(config: ClockRecoveryConfig) -> Self {
        let omega = config.samples_per_symbol;
        Self {
            omega,
            omega_min: omega * 0.965,
            omega_max: omega * 1.035,
            mu: 0.0,
            gain_mu: config.gain_mu,
            gain_omega: config.gain_omega,
            prev_decision: 0.0,
            prev_interp: 0.0,
            history: Vec::new(),
        }
    }

    /// Current samples-per-symbol estimate, for diagnostics.
    pub fn omega(&self) -> Float {
        self.omega
    }

    /// 4-tap Lagrange cubic interpolation of `samples` around index `i`
    /// with fractional offset `mu`.
    fn interpolate(samples: &[Complex], i: usize, mu: Float) -> Complex {
        let s = |k: isize| -> Complex {
            let idx = i as isize + k;
            if idx < 0 || idx as usize >= samples.len() {
                Complex::new(0.0, 0.0)
            } else {
                samples[idx as usize]
            }
        };
        let (sm1, s0, s1, s2) = (s(-1), s(0), s(1), s(2));
        let m = mu;
        // Farrow-structure cubic Lagrange interpolant.
        let c0 = s0;
        let c1 = s1 - sm1 * (1.0 / 3.0) - s0 * 0.5 - s2 * (1.0 / 6.0);
        let c2 = (sm1 + s1) * 0.5 - s0;
        let c3 = (s2 - sm1) * (1.0 / 6.0) + (s0 - s1) * 0.5;
        c0 + (c1 + (c2 + c3 * m) * m) * m
    }

    /// Process an oversampled block, returning the recovered symbols.
    pub fn process(&mut self, input: &[Complex]) -> Vec<Complex> {
        self.history.extend_from_slice(input);
        let mut out = Vec::new();

        // `i` walks the integer part of the strobe position within
        // `history`; we need one sample of look-ahead (index i+2) for the
        // interpolator, so stop when that would run past the buffer.
        let mut i: usize = 1;
        while i + 2 < self.history.len() {
            let interp = Self::interpolate(&self.history, i, self.mu);
            let decision = if interp.re >= 0.0 { 1.0 } else { -1.0 };

            let err = self.prev_decision * interp.re - decision * self.prev_interp;
            self.mu += self.gain_mu * err;
            self.omega += self.gain_omega * err;
            self.omega = self.omega.clamp(self.omega_min, self.omega_max);

            self.prev_decision = decision;
            self.prev_interp = interp.re;
            out.push(interp);

            let step = self.omega + self.mu;
            let whole = step.floor();
            self.mu = step - whole;
            i += whole as usize;
        }

        // Keep only the unconsumed tail for the next call.
        let consumed = i.saturating_sub(1).min(self.history.len());
        self.history.drain(0..consumed);
        out
    }
}

/// Pipeline stage wrapping [`ClockRecovery`].
pub struct ClockRecoveryStage {
    recovery: ClockRecovery,
    input: Queue<Vec<Complex>>,
    output: Queue<Vec<Complex>>,
    telemetry: Arc<DemodTelemetry>,
}

impl ClockRecoveryStage {
    /// Create a new stage, publishing its samples-per-symbol estimate
    /// through `telemetry` after every block.
    pub fn new(
        config: ClockRecoveryConfig,
        input: Queue<Vec<Complex>>,
        output: Queue<Vec<Complex>>,
        telemetry: Arc<DemodTelemetry>,
    ) -> Self {
        Self {
            recovery: ClockRecovery::new(config),
            input,
            output,
            telemetry,
        }
    }
}

impl Stage for ClockRecoveryStage {
    fn name(&self) -> &str {
        "clock_recovery"
    }

    fn work(&mut self) -> Result<StageRet> {
        let Some(block) = self.input.pop_for_read() else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
        let symbols = self.recovery.process(&block);
        let omega = self.recovery.omega();
        self.telemetry.update(|s| s.clock_omega = omega);
        if symbols.is_empty() {
            return Ok(StageRet::Pending);
        }
        if !self.output.pop_for_write() {
            return Ok(StageRet::Eof);
        }
        self.output.push_write(symbols);
        Ok(StageRet::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_roughly_one_symbol_per_sps_samples() {
        let sps = 4.0;
        let mut cr = ClockRecovery::new(ClockRecoveryConfig {
            samples_per_symbol: sps,
            gain_mu: 0.01,
            gain_omega: 0.0001,
        });
        let bits = [1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0];
        let mut samples = Vec::new();
        for &b in &bits {
            for _ in 0..sps as usize {
                samples.push(Complex::new(b, 0.0));
            }
        }
        let out = cr.process(&samples);
        // Expect roughly one symbol per `sps` input samples, within one
        // symbol of slack for startup transients.
        let expected = samples.len() / sps as usize;
        assert!(
            out.len() + 1 >= expected && out.len() <= expected + 1,
            "got {} symbols, expected ~{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn omega_stays_within_bounds() {
        let mut cr = ClockRecovery::new(ClockRecoveryConfig::from_rates(2_400_000.0, 293_883.0));
        let samples: Vec<Complex> = (0..40000)
            .map(|i| Complex::new(if i % 8 < 4 { 1.0 } else { -1.0 }, 0.0))
            .collect();
        cr.process(&samples);
        assert!(cr.omega() >= cr.omega_min && cr.omega() <= cr.omega_max);
    }
}
