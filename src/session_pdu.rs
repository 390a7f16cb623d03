//! Session PDU (S_PDU) assembly, including Rice-compressed image
//! scan-line reconstruction (§4.9, §6).
//!
//! Grounded directly on `original_source/src/assembler/session_pdu.h`/
//! `.cc`: the three-phase `append()` (primary header, secondary headers,
//! data body), the 10-byte transmitter-prelude skip on the very first
//! TP_PDU, the Rice decoder setup gated on `ImageStructureHeader::
//! compression == 1` plus a present `RiceCompressionHeader`, and the
//! synthetic scan-line fill-in (`skipLines`) used both mid-stream (on a
//! detected TP_PDU drop) and in `finish()` to salvage a truncated image.

use crate::lrit::header::{self, HeaderMap, ImageStructureHeader, PrimaryHeader, RiceCompressionHeader};
use crate::rice::{RiceDecoder, RiceParams, RAW_OPTION_MASK};
use crate::tp_pdu::TpPdu;

/// Compute `b - a` modulo `n`, the wraparound-aware distance used for
/// both VCDU counters (mod 2^24) and TP_PDU sequence counts (mod 16384).
pub fn wrapdiff(n: u32, a: u32, b: u32) -> i64 {
    debug_assert!(a < n && b < n);
    if a <= b {
        (b - a) as i64
    } else {
        (n - a + b) as i64
    }
}

/// An in-progress or completed Session PDU, keyed by (VCID, APID).
pub struct SessionPdu {
    /// Virtual channel this S_PDU was assembled from.
    pub vcid: u8,
    /// Application process id this S_PDU was assembled from.
    pub apid: u16,
    buf: Vec<u8>,
    last_sequence_count: u16,
    header_map: HeaderMap,
    primary_header: Option<PrimaryHeader>,
    image_structure_header: Option<ImageStructureHeader>,
    rice_params: Option<RiceParams>,
    lines_done: u32,
}

impl SessionPdu {
    /// Create a new, empty S_PDU accumulator.
    pub fn new(vcid: u8, apid: u16) -> Self {
        Self {
            vcid,
            apid,
            buf: Vec::new(),
            last_sequence_count: 0,
            header_map: HeaderMap::new(),
            primary_header: None,
            image_structure_header: None,
            rice_params: None,
            lines_done: 0,
        }
    }

    /// Whether the LRIT header tree has been fully received and parsed.
    pub fn has_complete_header(&self) -> bool {
        !self.header_map.is_empty()
    }

    /// The parsed primary header, if the header is complete.
    pub fn primary_header(&self) -> Option<PrimaryHeader> {
        self.primary_header
    }

    /// The header code -> offset map.
    pub fn header_map(&self) -> &HeaderMap {
        &self.header_map
    }

    /// Accumulated buffer contents.
    pub fn get(&self) -> &[u8] {
        &self.buf
    }

    /// Accumulated buffer length, in bytes.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Best-effort file name, following the original's `getName`.
    pub fn name(&self) -> String {
        if !self.has_complete_header() {
            return "(missing header)".to_string();
        }
        let Some(&pos) = self.header_map.get(&header::CODE_ANNOTATION) else {
            return "(missing annotation header)".to_string();
        };
        header::AnnotationHeader::parse(&self.buf, pos).text
    }

    /// Append one TP_PDU's user data. Returns `false` if the data could
    /// not be incorporated (malformed header, or a Rice decompression
    /// failure).
    pub fn append(&mut self, tpdu: &TpPdu) -> bool {
        let seq = tpdu.sequence_count();
        let len = tpdu.length() as usize;

        if self.buf.is_empty() {
            self.last_sequence_count = seq;
            if len < 12 {
                return false;
            }
            // First 10 bytes of the first TP_PDU are transmitter prelude;
            // last 2 bytes of every TP_PDU are its CRC.
            return self.append_bytes(&tpdu.data[10..len - 2]);
        }

        let skip = wrapdiff(16384, self.last_sequence_count as u32, seq as u32) - 1;
        if skip > 0 {
            if !self.has_complete_header() {
                return false;
            }
            let ph = self.primary_header.unwrap();
            if ph.file_type != 0 || self.rice_params.is_none() {
                return false;
            }
            let ish = self.image_structure_header.unwrap();
            let remaining = ish.lines as i64 - self.lines_done as i64;
            if skip > remaining {
                return false;
            }
            self.skip_lines(skip as u32);
        }

        self.last_sequence_count = seq;
        self.append_bytes(&tpdu.data[..len - 2])
    }

    /// Salvage a truncated S_PDU by filling the remainder of the image
    /// with synthetic scan lines. Only possible for Rice-compressed
    /// images whose header has already been parsed.
    pub fn finish(&mut self) -> bool {
        if !self.has_complete_header() {
            return false;
        }
        let ph = self.primary_header.unwrap();
        if ph.file_type != 0 || self.rice_params.is_none() {
            return false;
        }
        let ish = self.image_structure_header.unwrap();
        let remaining = ish.lines as i64 - self.lines_done as i64;
        if remaining > 0 {
            self.skip_lines(remaining as u32);
        }
        true
    }

    fn append_bytes(&mut self, mut body: &[u8]) -> bool {
        if self.buf.len() < 16 {
            let need = 16 - self.buf.len();
            let take = need.min(body.len());
            self.buf.extend_from_slice(&body[..take]);
            body = &body[take..];
            if self.buf.len() < 16 {
                return true;
            }
            self.primary_header = Some(PrimaryHeader::parse(&self.buf, 0));
        }

        let ph = self.primary_header.unwrap();
        if (ph.total_header_length as usize) > self.buf.len() {
            let need = ph.total_header_length as usize - self.buf.len();
            let take = need.min(body.len());
            self.buf.extend_from_slice(&body[..take]);
            body = &body[take..];
            if (ph.total_header_length as usize) > self.buf.len() {
                return true;
            }
            if !self.complete_header() {
                return false;
            }
        }

        let Some(params) = self.rice_params else {
            self.buf.extend_from_slice(body);
            return true;
        };

        if body.is_empty() {
            return true;
        }
        let decoder = RiceDecoder::new(params);
        let mut scratch = vec![0u8; params.pixels_per_scanline as usize];
        match decoder.decompress(body, &mut scratch) {
            Ok(n) => {
                self.buf.extend_from_slice(&scratch[..n]);
                self.lines_done += 1;
                true
            }
            Err(_) => false,
        }
    }

    fn complete_header(&mut self) -> bool {
        self.header_map = header::header_map(&self.buf);
        if self.header_map.is_empty() {
            return false;
        }
        let ph = self.primary_header.unwrap();
        if ph.file_type != 0 {
            return true;
        }
        let Some(&pos) = self.header_map.get(&header::CODE_IMAGE_STRUCTURE) else {
            return true;
        };
        let ish = ImageStructureHeader::parse(&self.buf, pos);
        self.image_structure_header = Some(ish);
        if ish.compression != 1 {
            return true;
        }
        if let Some(&rpos) = self.header_map.get(&header::CODE_RICE_COMPRESSION) {
            let rch = RiceCompressionHeader::parse(&self.buf, rpos);
            self.rice_params = Some(RiceParams {
                options_mask: rch.flags as u32 | RAW_OPTION_MASK,
                bits_per_pixel: ish.bits_per_pixel,
                pixels_per_block: rch.pixels_per_block,
                pixels_per_scanline: ish.columns,
            });
        }
        true
    }

    fn skip_lines(&mut self, mut skip: u32) {
        if skip == 0 {
            return;
        }
        let ph = self.primary_header.unwrap();
        let columns = self.image_structure_header.unwrap().columns as usize;
        let bytes = self.buf.len() - ph.total_header_length as usize;

        if bytes == 0 {
            self.buf.extend(std::iter::repeat(0u8).take(columns));
            self.lines_done += 1;
            skip -= 1;
        }

        for _ in 0..skip {
            let last_line_start = self.buf.len() - columns;
            let last_line: Vec<u8> = self.buf[last_line_start..].to_vec();
            self.buf.extend_from_slice(&last_line);
            self.lines_done += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapdiff_handles_the_non_wrapping_case() {
        assert_eq!(wrapdiff(16384, 10, 12), 2);
    }

    #[test]
    fn wrapdiff_handles_wraparound() {
        assert_eq!(wrapdiff(16384, 16383, 1), 2);
    }

    fn crc_tpdu(apid: u16, seq_flag: u8, seq: u16, body: &[u8]) -> TpPdu {
        let mut data = body.to_vec();
        let crc = crate::crc::crc16(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        let len_field = (data.len() - 1) as u16;
        let b0 = 0x08 | ((apid >> 8) as u8 & 0x7);
        let b1 = apid as u8;
        let b2 = (seq_flag << 6) | ((seq >> 8) as u8 & 0x3f);
        let b3 = seq as u8;
        let header = [b0, b1, b2, b3, (len_field >> 8) as u8, len_field as u8];
        let mut buf = header.to_vec();
        buf.extend_from_slice(&data);
        let mut tpdu = TpPdu::new();
        tpdu.read(&buf);
        tpdu
    }

    #[test]
    fn assembles_an_uncompressed_file_from_one_tpdu() {
        let mut prelude = vec![0xffu8; 10];
        // Primary header: file_type=1 (not image), total_header_length=16, data_length(bits)=8
        let mut lrit = vec![0u8, 0, 16, 1];
        lrit.extend_from_slice(&16u32.to_be_bytes());
        lrit.extend_from_slice(&8u64.to_be_bytes());
        lrit.push(0xab); // one byte of body data
        prelude.extend_from_slice(&lrit);

        let tpdu = crc_tpdu(10, 3, 1, &prelude);
        let mut spdu = SessionPdu::new(0, 10);
        assert!(spdu.append(&tpdu));
        assert!(spdu.has_complete_header());
        assert_eq!(spdu.size(), 17);
    }

    #[test]
    fn skip_lines_duplicates_the_last_line() {
        let mut spdu = SessionPdu::new(0, 1);
        spdu.primary_header = Some(PrimaryHeader {
            file_type: 0,
            total_header_length: 0,
            data_length: 0,
        });
        spdu.image_structure_header = Some(ImageStructureHeader {
            bits_per_pixel: 8,
            columns: 4,
            lines: 10,
            compression: 1,
        });
        spdu.buf = vec![1, 2, 3, 4];
        spdu.lines_done = 1;
        spdu.skip_lines(2);
        assert_eq!(spdu.buf, vec![1, 2, 3, 4, 1, 2, 3, 4, 1, 2, 3, 4]);
        assert_eq!(spdu.lines_done, 3);
    }
}
