//! Automatic gain control (§4.2).
//!
//! Grounded on the teacher crate's `single_pole_iir_filter.rs`: a tiny bit
//! of running state updated sample by sample, exposed as a block that
//! consumes one queue and produces another.

use std::sync::Arc;

use crate::block::{Stage, StageRet};
use crate::queue::Queue;
use crate::stats::DemodTelemetry;
use crate::{Complex, Float};
use anyhow::Result;

/// Tunables for [`Agc`], matching the defaults named in the specification.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct AgcConfig {
    /// Adaptation rate.
    pub alpha: Float,
    /// Minimum gain.
    pub min_gain: Float,
    /// Maximum gain.
    pub max_gain: Float,
    /// Initial gain.
    pub initial_gain: Float,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            alpha: 1e-4,
            min_gain: 1e-6,
            max_gain: 1e6,
            initial_gain: 1.0,
        }
    }
}

/// Normalizes signal magnitude to a target envelope of 0.5.
///
/// The gain is adapted from the envelope of one sample out of every block
/// of four, halving the adaptation arithmetic on oversampled signals
/// without materially changing loop behavior.
pub struct Agc {
    config: AgcConfig,
    gain: Float,
}

impl Agc {
    /// Create a new AGC with the given configuration.
    pub fn new(config: AgcConfig) -> Self {
        Self {
            gain: config.initial_gain,
            config,
        }
    }

    /// Current gain, for diagnostics.
    pub fn gain(&self) -> Float {
        self.gain
    }

    /// Apply gain control to a block of samples in place, updating the
    /// internal gain from every fourth sample's envelope.
    pub fn process(&mut self, samples: &mut [Complex]) {
        for (i, s) in samples.iter_mut().enumerate() {
            *s *= self.gain;
            if i % 4 == 0 {
                let y = s.norm();
                self.gain += self.config.alpha * (0.5 - y);
                self.gain = self.gain.clamp(self.config.min_gain, self.config.max_gain);
            }
        }
    }
}

/// Pipeline stage wrapping [`Agc`] between two sample-block queues.
pub struct AgcStage {
    agc: Agc,
    input: Queue<Vec<Complex>>,
    output: Queue<Vec<Complex>>,
    telemetry: Arc<DemodTelemetry>,
}

impl AgcStage {
    /// Create a new stage reading from `input` and writing to `output`,
    /// publishing its gain through `telemetry` after every block.
    pub fn new(
        config: AgcConfig,
        input: Queue<Vec<Complex>>,
        output: Queue<Vec<Complex>>,
        telemetry: Arc<DemodTelemetry>,
    ) -> Self {
        Self {
            agc: Agc::new(config),
            input,
            output,
            telemetry,
        }
    }
}

impl Stage for AgcStage {
    fn name(&self) -> &str {
        "agc"
    }

    fn work(&mut self) -> Result<StageRet> {
        let Some(mut block) = self.input.pop_for_read() else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
        self.agc.process(&mut block);
        let gain = self.agc.gain();
        self.telemetry.update(|s| s.agc_gain = gain);
        if !self.output.pop_for_write() {
            return Ok(StageRet::Eof);
        }
        self.output.push_write(block);
        Ok(StageRet::Ok)
    }
}
