//! Rice/Golomb scan-line decompression (§4.9, §6).
//!
//! `original_source/src/assembler/session_pdu.cc` delegates decompression
//! to `szlib`'s `SZ_BufftoBuffDecompress` (the CCSDS 121.0 / NASA-Rice
//! adaptive lossless algorithm) and only specifies the parameter struct
//! (`options_mask`, `bits_per_pixel`, `pixels_per_block`,
//! `pixels_per_scanline`) this module mirrors in [`RiceParams`]. The full
//! szip bitstream (reference samples, zero-block and second-extension
//! escape codes) is not part of the retrieved source, so the decoder body
//! below is a from-scratch, simplified Golomb-Rice coder: each scanline is
//! split into `pixels_per_block`-sample blocks, each block prefixed with a
//! 5-bit Rice parameter `k` (31 meaning "verbatim", the conventional
//! escape for incompressible blocks), followed by one Golomb-Rice
//! codeword per sample. It satisfies the same contract the assembler
//! needs (decode exactly one scan line per call, fail cleanly on
//! malformed input so the caller can fall back to [`crate::session_pdu`]'s
//! synthetic line-fill salvage) without claiming bit-for-bit compatibility
//! with szip's wire format.

/// Bit mask session_pdu OR's into a Rice header's raw compression flags,
/// matching `SZ_RAW_OPTION_MASK` in the original.
pub const RAW_OPTION_MASK: u32 = 0x80;

/// Parameters controlling one Rice decoder instance, one per S_PDU.
#[derive(Debug, Clone, Copy)]
pub struct RiceParams {
    /// Compression option flags (carries [`RAW_OPTION_MASK`] plus whatever
    /// was in the wire header).
    pub options_mask: u32,
    /// Bit depth of each pixel.
    pub bits_per_pixel: u8,
    /// Samples per Rice block.
    pub pixels_per_block: u8,
    /// Samples per scan line; also the decoder's output size per call.
    pub pixels_per_scanline: u16,
}

/// Error returned when a scan line fails to decompress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiceError;

struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    fn read_bit(&mut self) -> Result<u8, RiceError> {
        let byte = *self.data.get(self.byte_pos).ok_or(RiceError)?;
        let bit = (byte >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
        Ok(bit)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32, RiceError> {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()? as u32;
        }
        Ok(v)
    }

    fn read_unary(&mut self) -> Result<u32, RiceError> {
        let mut q = 0u32;
        loop {
            if self.read_bit()? == 0 {
                return Ok(q);
            }
            q += 1;
            if q > 1 << 20 {
                return Err(RiceError);
            }
        }
    }
}

const VERBATIM_K: u32 = 31;

/// Decodes Rice-compressed scan lines one at a time.
pub struct RiceDecoder {
    params: RiceParams,
}

impl RiceDecoder {
    /// Create a decoder with the given parameters.
    pub fn new(params: RiceParams) -> Self {
        Self { params }
    }

    /// Decompress one scan line's worth of input into `out`, which must be
    /// `pixels_per_scanline` bytes. Returns the number of bytes written, or
    /// [`RiceError`] if the input is malformed or truncated.
    pub fn decompress(&self, input: &[u8], out: &mut [u8]) -> Result<usize, RiceError> {
        let n = self.params.pixels_per_scanline as usize;
        if out.len() < n {
            return Err(RiceError);
        }
        let mut reader = BitReader::new(input);
        let block_size = self.params.pixels_per_block.max(1) as usize;

        let mut produced = 0;
        while produced < n {
            let block_len = block_size.min(n - produced);
            let k = reader.read_bits(5)?;
            if k == VERBATIM_K {
                for i in 0..block_len {
                    let v = reader.read_bits(self.params.bits_per_pixel as u32)?;
                    out[produced + i] = v as u8;
                }
            } else {
                for i in 0..block_len {
                    let q = reader.read_unary()?;
                    let r = reader.read_bits(k)?;
                    let v = (q << k) | r;
                    out[produced + i] = v as u8;
                }
            }
            produced += block_len;
        }
        Ok(produced)
    }
}

/// Encode one scan line, used only by tests to validate the decoder
/// against a matching writer.
#[cfg(test)]
fn encode(params: &RiceParams, samples: &[u8]) -> Vec<u8> {
    struct BitWriter {
        bytes: Vec<u8>,
        cur: u8,
        bit_pos: u8,
    }
    impl BitWriter {
        fn new() -> Self {
            Self {
                bytes: Vec::new(),
                cur: 0,
                bit_pos: 0,
            }
        }
        fn write_bit(&mut self, bit: u8) {
            self.cur |= bit << (7 - self.bit_pos);
            self.bit_pos += 1;
            if self.bit_pos == 8 {
                self.bytes.push(self.cur);
                self.cur = 0;
                self.bit_pos = 0;
            }
        }
        fn write_bits(&mut self, value: u32, n: u32) {
            for i in (0..n).rev() {
                self.write_bit(((value >> i) & 1) as u8);
            }
        }
        fn finish(mut self) -> Vec<u8> {
            if self.bit_pos != 0 {
                self.bytes.push(self.cur);
            }
            self.bytes
        }
    }

    let mut w = BitWriter::new();
    let block_size = params.pixels_per_block.max(1) as usize;
    for chunk in samples.chunks(block_size) {
        // Pick the smallest k that can represent every sample's quotient
        // within a reasonable unary length.
        let max = *chunk.iter().max().unwrap_or(&0) as u32;
        let mut k = 0u32;
        while k < 8 && (max >> k) > 32 {
            k += 1;
        }
        w.write_bits(k, 5);
        for &s in chunk {
            let v = s as u32;
            let q = v >> k;
            let r = v & ((1 << k) - 1);
            for _ in 0..q {
                w.write_bit(1);
            }
            w.write_bit(0);
            w.write_bits(r, k);
        }
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pixels_per_scanline: u16, pixels_per_block: u8) -> RiceParams {
        RiceParams {
            options_mask: RAW_OPTION_MASK,
            bits_per_pixel: 8,
            pixels_per_block,
            pixels_per_scanline,
        }
    }

    #[test]
    fn round_trips_a_smooth_scanline() {
        let p = params(16, 8);
        let samples: Vec<u8> = (0..16).map(|i| 10 + (i % 3)).collect();
        let encoded = encode(&p, &samples);
        let dec = RiceDecoder::new(p);
        let mut out = vec![0u8; 16];
        let n = dec.decompress(&encoded, &mut out).unwrap();
        assert_eq!(n, 16);
        assert_eq!(out, samples);
    }

    #[test]
    fn round_trips_a_noisy_scanline_with_large_swings() {
        let p = params(8, 4);
        let samples: Vec<u8> = vec![0, 255, 3, 250, 1, 254, 2, 253];
        let encoded = encode(&p, &samples);
        let dec = RiceDecoder::new(p);
        let mut out = vec![0u8; 8];
        dec.decompress(&encoded, &mut out).unwrap();
        assert_eq!(out, samples);
    }

    /// Hand-builds a single-block, `k == VERBATIM_K` bitstream, since
    /// `encode()`'s k-selection never picks 31 for realistic u8 samples,
    /// to exercise the verbatim escape in `decompress` directly.
    #[test]
    fn decompresses_a_hand_built_verbatim_block() {
        let p = params(4, 4);
        let samples: [u8; 4] = [0x12, 0x9a, 0x00, 0xff];

        struct BitWriter {
            bytes: Vec<u8>,
            cur: u8,
            bit_pos: u8,
        }
        impl BitWriter {
            fn write_bits(&mut self, value: u32, n: u32) {
                for i in (0..n).rev() {
                    let bit = ((value >> i) & 1) as u8;
                    self.cur |= bit << (7 - self.bit_pos);
                    self.bit_pos += 1;
                    if self.bit_pos == 8 {
                        self.bytes.push(self.cur);
                        self.cur = 0;
                        self.bit_pos = 0;
                    }
                }
            }
            fn finish(mut self) -> Vec<u8> {
                if self.bit_pos != 0 {
                    self.bytes.push(self.cur);
                }
                self.bytes
            }
        }

        let mut w = BitWriter {
            bytes: Vec::new(),
            cur: 0,
            bit_pos: 0,
        };
        w.write_bits(VERBATIM_K, 5);
        for &s in &samples {
            w.write_bits(s as u32, p.bits_per_pixel as u32);
        }
        let encoded = w.finish();

        let dec = RiceDecoder::new(p);
        let mut out = vec![0u8; 4];
        let n = dec.decompress(&encoded, &mut out).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, samples);
    }

    #[test]
    fn truncated_input_reports_an_error() {
        let p = params(16, 8);
        let dec = RiceDecoder::new(p);
        let mut out = vec![0u8; 16];
        assert!(dec.decompress(&[], &mut out).is_err());
    }
}
