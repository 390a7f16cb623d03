//! Wires the nine pipeline stages (§2) into one receive pipeline: source,
//! AGC, matched filter, Costas loop, clock recovery, quantizer, packetizer,
//! virtual-channel demultiplexer, and session-PDU reassembly.
//!
//! Grounded on the teacher crate's example binaries, which build a
//! `Graph`/`MTGraph` by hand from individually-constructed blocks wired
//! queue-to-queue; `build` here does the same with [`crate::block::Pipeline`]
//! and [`crate::queue::Queue`] in place of `Stream`.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::block::{Pipeline, Stage, StageRet};
use crate::dsp::agc::{AgcConfig, AgcStage};
use crate::dsp::clock_recovery::{ClockRecoveryConfig, ClockRecoveryStage};
use crate::dsp::costas::{CostasConfig, CostasStage};
use crate::dsp::quantizer::QuantizerStage;
use crate::dsp::rrc::{rrc_taps, MatchedFilter, MatchedFilterStage};
use crate::frame::packetizer::PacketizerStage;
use crate::session_pdu::SessionPdu;
use crate::source::Source;
use crate::stats::{DemodTelemetry, PacketizerStats, Publisher};
use crate::vcdu::Vcdu;
use crate::virtual_channel::VirtualChannel;
use crate::{Complex, Float};
use anyhow::Result;

/// Tunables for the whole receive pipeline, beyond the per-stage configs
/// each DSP module already owns.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveConfig {
    /// Source sample rate, in Hz.
    pub sample_rate: Float,
    /// LRIT/HRIT symbol rate, in symbols/second.
    pub symbol_rate: Float,
    /// Root-raised-cosine rolloff factor.
    pub rolloff: Float,
    /// Number of matched-filter taps.
    pub rrc_taps: usize,
    /// Matched filter decimation factor.
    pub decimation: usize,
    /// AGC tunables.
    pub agc: AgcConfig,
    /// Costas loop tunables.
    pub costas: CostasConfig,
    /// Per-stage queue object-pool capacity.
    pub queue_capacity: usize,
}

impl ReceiveConfig {
    /// Defaults matching a 293,883 symbol/second LRIT downlink at 4x
    /// oversampling.
    pub fn lrit_defaults(sample_rate: Float) -> Self {
        let symbol_rate = 293_883.0;
        Self {
            sample_rate,
            symbol_rate,
            rolloff: 0.5,
            rrc_taps: 63,
            decimation: (sample_rate / symbol_rate).round().max(1.0) as usize,
            agc: AgcConfig::default(),
            costas: CostasConfig::default(),
            queue_capacity: 8,
        }
    }
}

/// Parses raw VCDU frames and drops fill frames, the eighth of the
/// pipeline's nine stages.
struct VcduDemuxStage {
    input: crate::queue::Queue<Vec<u8>>,
    output: crate::queue::Queue<Vcdu>,
}

impl VcduDemuxStage {
    fn new(input: crate::queue::Queue<Vec<u8>>, output: crate::queue::Queue<Vcdu>) -> Self {
        Self { input, output }
    }
}

impl Stage for VcduDemuxStage {
    fn name(&self) -> &str {
        "virtual_channel_demux"
    }

    fn work(&mut self) -> Result<StageRet> {
        let Some(bytes) = self.input.pop_for_read() else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
        let Ok(frame): Result<[u8; crate::vcdu::VCDU_SIZE], _> = bytes.try_into() else {
            warn!("dropping malformed VCDU: wrong length");
            return Ok(StageRet::Ok);
        };
        let vcdu = Vcdu::parse(&frame);
        if vcdu.header.is_fill() {
            return Ok(StageRet::Ok);
        }
        if !self.output.pop_for_write() {
            return Ok(StageRet::Eof);
        }
        self.output.push_write(vcdu);
        Ok(StageRet::Ok)
    }
}

/// Reassembles Session PDUs per virtual channel, the ninth and last stage.
struct ReassemblyStage {
    channels: HashMap<u8, VirtualChannel>,
    input: crate::queue::Queue<Vcdu>,
    output: crate::queue::Queue<SessionPdu>,
}

impl ReassemblyStage {
    fn new(input: crate::queue::Queue<Vcdu>, output: crate::queue::Queue<SessionPdu>) -> Self {
        Self {
            channels: HashMap::new(),
            input,
            output,
        }
    }
}

impl Stage for ReassemblyStage {
    fn name(&self) -> &str {
        "session_pdu_reassembly"
    }

    fn work(&mut self) -> Result<StageRet> {
        let Some(vcdu) = self.input.pop_for_read() else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
        let vc = self
            .channels
            .entry(vcdu.header.vcid)
            .or_insert_with(|| VirtualChannel::new(vcdu.header.vcid));
        for spdu in vc.process(&vcdu) {
            if !self.output.pop_for_write() {
                return Ok(StageRet::Eof);
            }
            self.output.push_write(spdu);
        }
        Ok(StageRet::Ok)
    }
}

/// Everything [`build`] hands back beyond the runnable pipeline itself.
pub struct ReceiveHandles {
    /// Yields a completed [`SessionPdu`] for every Session PDU reassembled.
    pub output: crate::queue::Queue<SessionPdu>,
    /// Demodulator telemetry (AGC gain, Costas frequency, clock omega).
    pub demod_stats: Arc<DemodTelemetry>,
    /// Per-frame packetizer telemetry (Viterbi/Reed-Solomon error counts).
    pub packetizer_stats: Arc<Publisher<PacketizerStats>>,
}

/// Build the full nine-stage receive pipeline from a source and config.
///
/// Returns the runnable [`Pipeline`] plus the [`ReceiveHandles`] the
/// caller uses to read reassembled files and subscribe to telemetry. The
/// caller owns calling [`Pipeline::run`].
pub fn build(source: impl Source + 'static, config: ReceiveConfig) -> (Pipeline, ReceiveHandles) {
    let cap = config.queue_capacity;
    let q_samples: crate::queue::Queue<Vec<Complex>> = crate::queue::Queue::new(cap);
    let q_agc: crate::queue::Queue<Vec<Complex>> = crate::queue::Queue::new(cap);
    let q_filtered: crate::queue::Queue<Vec<Complex>> = crate::queue::Queue::new(cap);
    let q_costas: crate::queue::Queue<Vec<Complex>> = crate::queue::Queue::new(cap);
    let q_symbols: crate::queue::Queue<Vec<Complex>> = crate::queue::Queue::new(cap);
    let q_softbits: crate::queue::Queue<Vec<crate::SoftBit>> = crate::queue::Queue::new(cap);
    let q_vcdus: crate::queue::Queue<Vec<u8>> = crate::queue::Queue::new(cap);
    let q_parsed_vcdus: crate::queue::Queue<Vcdu> = crate::queue::Queue::new(cap);
    let q_spdus: crate::queue::Queue<SessionPdu> = crate::queue::Queue::new(cap);

    let taps = rrc_taps(config.sample_rate, config.symbol_rate, config.rolloff, config.rrc_taps);
    let filter = MatchedFilter::new(taps, config.decimation);
    let clock_config = ClockRecoveryConfig::from_rates(
        config.sample_rate / config.decimation as Float,
        config.symbol_rate,
    );

    let demod_stats = Arc::new(DemodTelemetry::new());
    let packetizer_stats = Arc::new(Publisher::new());

    let mut pipeline = Pipeline::new();
    pipeline.add(Box::new(crate::source::SourceStage::new(source, q_samples.clone())));
    pipeline.add(Box::new(AgcStage::new(
        config.agc,
        q_samples,
        q_agc.clone(),
        demod_stats.clone(),
    )));
    pipeline.add(Box::new(MatchedFilterStage::new(filter, q_agc, q_filtered.clone())));
    pipeline.add(Box::new(CostasStage::new(
        config.costas,
        q_filtered,
        q_costas.clone(),
        demod_stats.clone(),
    )));
    pipeline.add(Box::new(ClockRecoveryStage::new(
        clock_config,
        q_costas,
        q_symbols.clone(),
        demod_stats.clone(),
    )));
    pipeline.add(Box::new(QuantizerStage::new(q_symbols, q_softbits.clone())));
    pipeline.add(Box::new(PacketizerStage::new(
        q_softbits,
        q_vcdus.clone(),
        packetizer_stats.clone(),
    )));
    pipeline.add(Box::new(VcduDemuxStage::new(q_vcdus, q_parsed_vcdus.clone())));
    pipeline.add(Box::new(ReassemblyStage::new(q_parsed_vcdus, q_spdus.clone())));

    (
        pipeline,
        ReceiveHandles {
            output: q_spdus,
            demod_stats,
            packetizer_stats,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VectorSource;

    #[test]
    fn build_produces_a_runnable_pipeline_with_no_input() {
        let source = VectorSource::new(vec![Complex::new(0.0, 0.0); 16], 1_000_000);
        let mut config = ReceiveConfig::lrit_defaults(1_000_000.0);
        // Decimation 1 so the 16-sample source block (not a multiple of
        // the default decimation factor) can't trip the matched filter's
        // block-size precondition; this test only exercises shutdown.
        config.decimation = 1;
        let (mut pipeline, handles) = build(source, config);
        pipeline.run().unwrap();
        assert!(handles.output.pop_for_read().is_none());
    }

    #[test]
    fn vcdu_demux_stage_drops_fill_vcdus_without_emitting() {
        let input: crate::queue::Queue<Vec<u8>> = crate::queue::Queue::new(1);
        let output: crate::queue::Queue<Vcdu> = crate::queue::Queue::new(1);
        let mut stage = VcduDemuxStage::new(input.clone(), output.clone());

        let mut frame = vec![0u8; crate::vcdu::VCDU_SIZE];
        frame[0] = 0x80;
        frame[1] = crate::vcdu::FILL_VCID;
        input.pop_for_write();
        input.push_write(frame);

        let ret = stage.work().unwrap();
        assert_eq!(ret, StageRet::Ok);
        assert!(output.is_empty());
    }

    #[test]
    fn reassembly_stage_tracks_a_virtual_channel_per_vcid() {
        use crate::vcdu::{VcduHeader, HEADER_SIZE};

        let input: crate::queue::Queue<Vcdu> = crate::queue::Queue::new(2);
        let output: crate::queue::Queue<SessionPdu> = crate::queue::Queue::new(1);
        let mut stage = ReassemblyStage::new(input.clone(), output.clone());

        let mut frame = vec![0u8; crate::vcdu::VCDU_SIZE];
        frame[0] = 0x80;
        frame[1] = 7;
        let header = VcduHeader::parse(frame[0..HEADER_SIZE].try_into().unwrap());
        let vcdu = Vcdu {
            header,
            first_header_pointer: crate::vcdu::NO_NEW_TP_PDU,
            payload: vec![0u8; crate::vcdu::DATA_SIZE - 2],
        };

        input.pop_for_write();
        input.push_write(vcdu);
        let ret = stage.work().unwrap();
        assert_eq!(ret, StageRet::Ok);
        assert!(stage.channels.contains_key(&7));
    }
}
