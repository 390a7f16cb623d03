//! Sample sources (§4.1).
//!
//! Grounded on the teacher's `vector_source.rs` (repeat-a-fixed-buffer
//! source) and `file_source.rs` (raw interleaved-float file reader),
//! adapted from per-sample `Stream`/`WriteStream` pairs to this crate's
//! block-oriented [`Queue`]. A real pipeline's head is an SDR device; the
//! core only needs a known sample rate and a steady supply of sample
//! blocks, so the two sources here are enough to drive the pipeline
//! end-to-end in tests without hardware.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::block::{Stage, StageRet};
use crate::queue::Queue;
use crate::{Complex, Float};
use anyhow::Result;
use log::{debug, warn};

/// Number of complex samples produced per block.
pub const BLOCK_SIZE: usize = 4096;

/// A source of complex sample blocks.
pub trait Source: Send {
    /// The source's sample rate, in samples per second.
    fn sample_rate(&self) -> u32;

    /// Produce the next block of samples, or `None` at end of stream.
    fn next_block(&mut self) -> Option<Vec<Complex>>;

    /// Request the source stop producing further blocks. Idempotent.
    fn stop(&self);
}

/// Replays a fixed, in-memory vector of samples, optionally looping.
pub struct VectorSource {
    data: Vec<Complex>,
    pos: usize,
    sample_rate: u32,
    repeat: bool,
    stopped: Arc<AtomicBool>,
}

impl VectorSource {
    /// Create a source that plays `data` once, then signals end of stream.
    pub fn new(data: Vec<Complex>, sample_rate: u32) -> Self {
        Self {
            data,
            pos: 0,
            sample_rate,
            repeat: false,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make this source loop its data forever until [`Source::stop`] is
    /// called.
    pub fn repeat_forever(mut self) -> Self {
        self.repeat = true;
        self
    }
}

impl Source for VectorSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_block(&mut self) -> Option<Vec<Complex>> {
        if self.stopped.load(Ordering::Acquire) || self.data.is_empty() {
            return None;
        }
        if self.pos >= self.data.len() {
            if !self.repeat {
                return None;
            }
            self.pos = 0;
        }
        let n = BLOCK_SIZE.min(self.data.len() - self.pos);
        let block = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Some(block)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Reads interleaved 32-bit little-endian float I/Q pairs from a raw file.
pub struct FileSource {
    filename: String,
    reader: std::io::BufReader<std::fs::File>,
    sample_rate: u32,
    leftover: Vec<u8>,
    stopped: Arc<AtomicBool>,
}

impl FileSource {
    /// Open `filename` for reading as raw interleaved float I/Q samples.
    pub fn new(filename: &str, sample_rate: u32) -> Result<Self> {
        let f = std::fs::File::open(filename)?;
        debug!("opening source {filename}");
        Ok(Self {
            filename: filename.to_string(),
            reader: std::io::BufReader::new(f),
            sample_rate,
            leftover: Vec::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

const SAMPLE_BYTES: usize = 8; // two f32s

impl Source for FileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_block(&mut self) -> Option<Vec<Complex>> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        let want_bytes = BLOCK_SIZE * SAMPLE_BYTES;
        let mut buf = vec![0u8; want_bytes];
        let mut filled = self.leftover.len().min(want_bytes);
        buf[..filled].copy_from_slice(&self.leftover[..filled]);
        self.leftover.drain(..filled);

        while filled < want_bytes {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    warn!("read error on {}: {e}", self.filename);
                    return None;
                }
            }
        }

        let whole = filled - (filled % SAMPLE_BYTES);
        self.leftover.extend_from_slice(&buf[whole..filled]);

        if whole == 0 {
            return None;
        }

        let samples = buf[..whole]
            .chunks_exact(SAMPLE_BYTES)
            .map(|c| {
                let re = Float::from_le_bytes(c[0..4].try_into().unwrap());
                let im = Float::from_le_bytes(c[4..8].try_into().unwrap());
                Complex::new(re, im)
            })
            .collect();
        Some(samples)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Pipeline stage wrapping any [`Source`] impl, pushing its blocks onto an
/// output queue until the source signals end of stream.
pub struct SourceStage<S: Source> {
    source: S,
    output: Queue<Vec<Complex>>,
}

impl<S: Source> SourceStage<S> {
    /// Create a new source stage.
    pub fn new(source: S, output: Queue<Vec<Complex>>) -> Self {
        Self { source, output }
    }
}

impl<S: Source> Stage for SourceStage<S> {
    fn name(&self) -> &str {
        "source"
    }

    fn work(&mut self) -> Result<StageRet> {
        let Some(block) = self.source.next_block() else {
            self.output.close();
            return Ok(StageRet::Eof);
        };
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
    fn vector_source_emits_then_stops() {
        let mut src = VectorSource::new(vec![Complex::new(1.0, 0.0); 10], 48_000);
        let block = src.next_block().unwrap();
        assert_eq!(block.len(), 10);
        assert!(src.next_block().is_none());
    }

    #[test]
    fn vector_source_repeats() {
        let mut src = VectorSource::new(vec![Complex::new(1.0, 0.0); 3], 48_000).repeat_forever();
        for _ in 0..5 {
            assert_eq!(src.next_block().unwrap().len(), 3);
        }
    }

    #[test]
    fn vector_source_respects_stop() {
        let src = VectorSource::new(vec![Complex::new(1.0, 0.0); 3], 48_000).repeat_forever();
        src.stop();
        let mut src = src;
        assert!(src.next_block().is_none());
    }

    #[test]
    fn file_source_reads_interleaved_floats() -> Result<()> {
        let tmpd = tempfile::tempdir()?;
        let path = tmpd.path().join("iq.bin");
        let bytes: Vec<u8> = [1.0f32, 0.0, -0.5, 0.25]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        std::fs::write(&path, &bytes)?;
        let mut src = FileSource::new(path.to_str().unwrap(), 48_000)?;
        let block = src.next_block().unwrap();
        assert_eq!(block, vec![Complex::new(1.0, 0.0), Complex::new(-0.5, 0.25)]);
        Ok(())
    }
}
