//! Frame acquisition and decoding state machine (§4.7, §9).
//!
//! Grounded directly on `original_source/src/decoder/packetizer.cc`: the
//! frame geometry constants, the unlocked sliding-correlation reacquisition
//! loop, the locked phase-flip check (LRIT only), the Viterbi-decode /
//! re-encode bit-error count, the LRIT 180-degree negation, the HRIT
//! NRZ-M decode, and the "lock iff Reed-Solomon was non-negative" rule are
//! all carried over with the same control flow, translated from the
//! original's raw-pointer ring buffer to a `VecDeque` reservoir fed by a
//! [`crate::queue::Queue`] of soft-bit blocks. The specification's design
//! notes ask that the acquisition states not be hidden in nested loops;
//! they are named explicitly in [`AcquisitionState`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::block::{Stage, StageRet};
use crate::frame::correlator::{correlate, SyncType};
use crate::frame::derandomizer::Derandomizer;
use crate::frame::reed_solomon::ReedSolomon;
use crate::frame::viterbi;
use crate::queue::Queue;
use crate::stats::{PacketizerStats, Publisher};
use crate::SoftBit;
use anyhow::Result;
use log::{debug, warn};

const FRAME_BITS: usize = 8192;
const SYNC_WORD_BITS: usize = 32;
const PRELUDE_BITS: usize = 32;

const ENCODED_FRAME_BITS: usize = 2 * FRAME_BITS;
const ENCODED_SYNC_WORD_BITS: usize = 2 * SYNC_WORD_BITS;
const ENCODED_PRELUDE_BITS: usize = 2 * PRELUDE_BITS;

const PRELUDE_BYTES: usize = PRELUDE_BITS / 8;
const SYNC_WORD_BYTES: usize = SYNC_WORD_BITS / 8;

const BUF_LEN: usize = ENCODED_PRELUDE_BITS + ENCODED_FRAME_BITS + ENCODED_SYNC_WORD_BITS;

/// Explicit acquisition states, named per the specification's design note
/// that frame acquisition must be modeled as a state machine rather than
/// buried in nested loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// No sync lock; sliding correlation across the whole window.
    Unlocked,
    /// Locked, tracking the named sync type.
    Locked(SyncType),
}

/// Everything the packetizer knows about one decoded (or failed) packet.
#[derive(Debug, Clone)]
pub struct PacketizerOutput {
    /// Reed-Solomon-corrected VCDU bytes. Only meaningful when `ok`.
    pub vcdu_bytes: [u8; 892],
    /// Whether Reed-Solomon correction succeeded.
    pub ok: bool,
    /// Cursor in the symbol stream, for drop detection.
    pub symbol_pos: i64,
    /// Symbols skipped while reacquiring lock.
    pub skipped_symbols: i64,
    /// Bits Viterbi decoding disagreed with the raw soft-bit hard
    /// decisions on.
    pub viterbi_bit_errors: usize,
    /// Reed-Solomon corrected byte count, or `None` if uncorrectable.
    pub reed_solomon_byte_errors: Option<usize>,
    /// Relative time of this packet from the start of the stream.
    pub relative_time: Duration,
}

fn nrz_m_decode(data: &mut [u8]) {
    let mut b0 = 0u8;
    for byte in data.iter_mut() {
        let m = (b0 << 7) | ((*byte >> 1) & 0x7f);
        b0 = *byte & 1;
        *byte ^= m;
    }
}

/// Decodes a soft-bit stream into 892-byte VCDUs.
pub struct Packetizer {
    reservoir: VecDeque<SoftBit>,
    buf: Vec<SoftBit>,
    pos: usize,
    state: AcquisitionState,
    symbol_rate: u32,
    symbol_pos: i64,
    derandomizer: Derandomizer,
    reed_solomon: ReedSolomon,
    eof: bool,
}

impl Packetizer {
    /// Create a new packetizer.
    pub fn new() -> Self {
        Self {
            reservoir: VecDeque::new(),
            buf: vec![0; BUF_LEN],
            pos: 0,
            state: AcquisitionState::Unlocked,
            symbol_rate: 293_883,
            symbol_pos: 0,
            derandomizer: Derandomizer::new(),
            reed_solomon: ReedSolomon::new(),
            eof: false,
        }
    }

    fn pull(&mut self, n: usize, mut fetch: impl FnMut() -> Option<Vec<SoftBit>>) -> bool {
        while self.reservoir.len() < n {
            match fetch() {
                Some(block) => self.reservoir.extend(block),
                None => return false,
            }
        }
        true
    }

    fn read(&mut self, mut fetch: impl FnMut() -> Option<Vec<SoftBit>>) -> bool {
        let nbytes = BUF_LEN - self.pos;
        if !self.pull(nbytes, &mut fetch) {
            return false;
        }
        for slot in self.buf[self.pos..].iter_mut() {
            *slot = self.reservoir.pop_front().unwrap();
        }
        self.symbol_pos += nbytes as i64;
        true
    }

    /// Decode the next packet from soft bits pulled via `fetch`, which
    /// returns the next available block or `None` on end of stream.
    pub fn next_packet(&mut self, mut fetch: impl FnMut() -> Option<Vec<SoftBit>>) -> Option<PacketizerOutput> {
        if self.eof {
            return None;
        }
        let mut skipped_symbols: i64 = 0;

        if !self.read(&mut fetch) {
            self.eof = true;
            return None;
        }

        if let AcquisitionState::Locked(st) = self.state {
            if st.is_lrit() {
                let skip = ENCODED_PRELUDE_BITS;
                let window = &self.buf[skip..skip + ENCODED_SYNC_WORD_BITS];
                let c = correlate(window);
                if c.sync_type != st {
                    warn!("phase flip detected from {st:?} to {:?}", c.sync_type);
                }
                self.state = AcquisitionState::Locked(c.sync_type);
            }
        }

        if self.state == AcquisitionState::Unlocked {
            let skip = ENCODED_PRELUDE_BITS;
            loop {
                let c = correlate(&self.buf[skip..]);
                if c.position == 0 || c.position == ENCODED_FRAME_BITS {
                    self.state = AcquisitionState::Locked(c.sync_type);
                    break;
                }
                skipped_symbols += c.position as i64;
                self.buf.copy_within(c.position.., 0);
                self.pos = BUF_LEN - c.position;
                if !self.read(&mut fetch) {
                    self.eof = true;
                    return None;
                }
            }
            let AcquisitionState::Locked(st) = self.state else {
                unreachable!()
            };
            self.symbol_rate = st.symbol_rate();
            debug!("acquired lock: {st:?} at symbol rate {}", self.symbol_rate);
        }

        let AcquisitionState::Locked(sync_type) = self.state else {
            unreachable!()
        };

        let decode_bits = ENCODED_PRELUDE_BITS + ENCODED_FRAME_BITS;
        let decoded_bits = viterbi::decode_soft(&self.buf[0..decode_bits]);
        let viterbi_bit_errors = viterbi::compare_soft(&self.buf[0..decode_bits], &decoded_bits);
        let mut packet = viterbi::bits_to_bytes(&decoded_bits);

        let tail = ENCODED_PRELUDE_BITS + ENCODED_SYNC_WORD_BITS;
        self.buf.copy_within(BUF_LEN - tail.., 0);
        self.pos = tail;

        if sync_type == SyncType::LritPhase180 {
            for b in packet.iter_mut() {
                *b ^= 0xff;
            }
        }
        if sync_type.is_hrit() {
            nrz_m_decode(&mut packet);
        }

        let skip = PRELUDE_BYTES + SYNC_WORD_BYTES;
        let mut body = packet[skip..].to_vec();
        self.derandomizer.run(&mut body);

        let rs_result = self.reed_solomon.decode(&body);
        self.state = match &rs_result {
            Some(_) => AcquisitionState::Locked(sync_type),
            None => AcquisitionState::Unlocked,
        };

        let (vcdu_bytes, rs_errors) = match rs_result {
            Some((out, errs)) => (out.try_into().unwrap(), Some(errs)),
            None => (vec![0u8; 892].try_into().unwrap(), None),
        };

        let pos = self.symbol_pos - (ENCODED_FRAME_BITS as i64 + ENCODED_SYNC_WORD_BITS as i64);
        let rate = self.symbol_rate as i64;
        let relative_time = Duration::new((pos / rate) as u64, ((1_000_000_000 * (pos % rate)) / rate) as u32);

        Some(PacketizerOutput {
            vcdu_bytes,
            ok: rs_errors.is_some(),
            symbol_pos: pos,
            skipped_symbols,
            viterbi_bit_errors,
            reed_solomon_byte_errors: rs_errors,
            relative_time,
        })
    }
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline stage wrapping [`Packetizer`] between a soft-bit input queue
/// and a VCDU-bytes output queue. Only successfully corrected frames
/// (`ok == true`) are forwarded downstream, matching §7's rule that an
/// uncorrectable Reed-Solomon block is not emitted to the demultiplexer.
/// Stats are published for every packet attempt, corrected or not.
pub struct PacketizerStage {
    packetizer: Packetizer,
    input: Queue<Vec<SoftBit>>,
    output: Queue<Vec<u8>>,
    stats: Arc<Publisher<PacketizerStats>>,
}

impl PacketizerStage {
    /// Create a new stage, publishing a [`PacketizerStats`] through
    /// `stats` after every packet attempt.
    pub fn new(
        input: Queue<Vec<SoftBit>>,
        output: Queue<Vec<u8>>,
        stats: Arc<Publisher<PacketizerStats>>,
    ) -> Self {
        Self {
            packetizer: Packetizer::new(),
            input,
            output,
            stats,
        }
    }
}

impl Stage for PacketizerStage {
    fn name(&self) -> &str {
        "packetizer"
    }

    fn work(&mut self) -> Result<StageRet> {
        let input = &self.input;
        let result = self.packetizer.next_packet(|| input.pop_for_read());
        let Some(packet) = result else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
        self.stats.publish(PacketizerStats {
            ok: packet.ok,
            viterbi_bit_errors: packet.viterbi_bit_errors,
            reed_solomon_byte_errors: packet.reed_solomon_byte_errors,
            skipped_symbols: packet.skipped_symbols,
        });
        if !packet.ok {
            debug!(
                "dropping uncorrectable packet at symbol {}",
                packet.symbol_pos
            );
            return Ok(StageRet::Ok);
        }
        if !self.output.pop_for_write() {
            return Ok(StageRet::Eof);
        }
        self.output.push_write(packet.vcdu_bytes.to_vec());
        Ok(StageRet::Ok)
    }
}
