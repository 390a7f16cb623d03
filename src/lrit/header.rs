//! LRIT TLV header tree parsing (§3, §6).
//!
//! Grounded on `original_source/src/lrit/lrit.h`/`lrit.cc`: the
//! `{type:u8, length:u16}`-prefixed record stream, the big-endian field
//! layouts for each of the known header codes, and `getHeaderMap`'s rule
//! that a zero-length record yields an empty map (signaling the
//! enclosing file as malformed). The `HeaderStructureRecord` (code 130)
//! is intentionally not modeled: nothing in the original ever reads it
//! beyond enumerating its presence.

use std::collections::BTreeMap;

/// Header type code -> byte offset of that record within the buffer.
pub type HeaderMap = BTreeMap<u8, usize>;

/// Primary header record.
pub const CODE_PRIMARY: u8 = 0;
/// Image structure record.
pub const CODE_IMAGE_STRUCTURE: u8 = 1;
/// Image navigation record.
pub const CODE_IMAGE_NAVIGATION: u8 = 2;
/// Image data function record.
pub const CODE_IMAGE_DATA_FUNCTION: u8 = 3;
/// Annotation record.
pub const CODE_ANNOTATION: u8 = 4;
/// Timestamp record.
pub const CODE_TIME_STAMP: u8 = 5;
/// Ancillary text record.
pub const CODE_ANCILLARY_TEXT: u8 = 6;
/// Segment identification record.
pub const CODE_SEGMENT_IDENTIFICATION: u8 = 128;
/// NOAA-specific record.
pub const CODE_NOAA: u8 = 129;
/// Rice compression parameters record.
pub const CODE_RICE_COMPRESSION: u8 = 131;
/// DCS file name record.
pub const CODE_DCS_FILE_NAME: u8 = 132;

/// Scan `buf` for LRIT header records and return a map from header code
/// to byte offset. Returns an empty map if the buffer does not begin
/// with a well-formed primary header, or if any record reports a zero
/// length.
pub fn header_map(buf: &[u8]) -> HeaderMap {
    let mut m = HeaderMap::new();
    if buf.len() < 16 || buf[0] != CODE_PRIMARY {
        return m;
    }
    let header_length = u16::from_be_bytes([buf[1], buf[2]]);
    if header_length != 16 {
        return m;
    }
    let total_header_length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

    let mut pos = 0usize;
    while pos < total_header_length {
        if pos + 3 > buf.len() {
            return HeaderMap::new();
        }
        let header_type = buf[pos];
        let len = u16::from_be_bytes([buf[pos + 1], buf[pos + 2]]) as usize;
        if len == 0 {
            return HeaderMap::new();
        }
        m.insert(header_type, pos);
        pos += len;
    }
    m
}

fn text_at(buf: &[u8], pos: usize) -> String {
    let len = u16::from_be_bytes([buf[pos + 1], buf[pos + 2]]) as usize;
    String::from_utf8_lossy(&buf[pos + 3..pos + len]).into_owned()
}

/// Primary header (code 0): every LRIT file begins with one of these.
#[derive(Debug, Clone, Copy)]
pub struct PrimaryHeader {
    /// File content type (0 = image, per the NOAA-specific convention).
    pub file_type: u8,
    /// Total byte length of the full header tree.
    pub total_header_length: u32,
    /// Data length, in bits.
    pub data_length: u64,
}

impl PrimaryHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        Self {
            file_type: buf[pos + 3],
            total_header_length: u32::from_be_bytes(buf[pos + 4..pos + 8].try_into().unwrap()),
            data_length: u64::from_be_bytes(buf[pos + 8..pos + 16].try_into().unwrap()),
        }
    }
}

/// Image structure header (code 1).
#[derive(Debug, Clone, Copy)]
pub struct ImageStructureHeader {
    /// Bit depth of each pixel.
    pub bits_per_pixel: u8,
    /// Image width in pixels.
    pub columns: u16,
    /// Image height in pixels.
    pub lines: u16,
    /// Compression flag: 1 means Rice-compressed.
    pub compression: u8,
}

impl ImageStructureHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        Self {
            bits_per_pixel: buf[pos + 3],
            columns: u16::from_be_bytes([buf[pos + 4], buf[pos + 5]]),
            lines: u16::from_be_bytes([buf[pos + 6], buf[pos + 7]]),
            compression: buf[pos + 8],
        }
    }
}

/// Image navigation header (code 2).
#[derive(Debug, Clone)]
pub struct ImageNavigationHeader {
    /// Projection name, e.g. `"GOES-East(-75.2)"`.
    pub projection_name: String,
    /// Column scaling factor.
    pub column_scaling: u32,
    /// Line scaling factor.
    pub line_scaling: u32,
    /// Column offset.
    pub column_offset: u32,
    /// Line offset.
    pub line_offset: u32,
}

impl ImageNavigationHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        let raw = &buf[pos + 3..pos + 35];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let projection_name = String::from_utf8_lossy(&raw[..end]).into_owned();
        Self {
            projection_name,
            column_scaling: u32::from_be_bytes(buf[pos + 35..pos + 39].try_into().unwrap()),
            line_scaling: u32::from_be_bytes(buf[pos + 39..pos + 43].try_into().unwrap()),
            column_offset: u32::from_be_bytes(buf[pos + 43..pos + 47].try_into().unwrap()),
            line_offset: u32::from_be_bytes(buf[pos + 47..pos + 51].try_into().unwrap()),
        }
    }

    /// Parse the satellite longitude out of the parenthesized float in
    /// `projection_name`, e.g. `"GOES-East(-75.2)"` -> `-75.2`. Returns
    /// `0.0` if the name has no parenthesized number, matching the
    /// original's fallback.
    pub fn longitude(&self) -> f32 {
        let Some(lpos) = self.projection_name.find('(') else {
            return 0.0;
        };
        let Some(rpos) = self.projection_name.find(')') else {
            return 0.0;
        };
        if rpos <= lpos {
            return 0.0;
        }
        self.projection_name[lpos + 1..rpos].parse().unwrap_or(0.0)
    }
}

/// Image data function header (code 3): an opaque `key=value`-line blob.
#[derive(Debug, Clone)]
pub struct ImageDataFunctionHeader {
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

impl ImageDataFunctionHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        let len = u16::from_be_bytes([buf[pos + 1], buf[pos + 2]]) as usize;
        Self {
            data: buf[pos + 3..pos + len].to_vec(),
        }
    }
}

/// Annotation header (code 4): free-text filename/annotation.
#[derive(Debug, Clone)]
pub struct AnnotationHeader {
    /// Annotation text.
    pub text: String,
}

impl AnnotationHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        Self { text: text_at(buf, pos) }
    }
}

/// Timestamp header (code 5).
#[derive(Debug, Clone, Copy)]
pub struct TimeStampHeader {
    /// Raw 7-byte CCSDS time code.
    pub ccsds: [u8; 7],
}

impl TimeStampHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        Self {
            ccsds: buf[pos + 3..pos + 10].try_into().unwrap(),
        }
    }

    /// Parse the embedded CCSDS time.
    pub fn time(&self) -> crate::lrit::ccsds_time::CcsdsTime {
        crate::lrit::ccsds_time::CcsdsTime::parse(&self.ccsds)
    }
}

/// Ancillary text header (code 6): `key=value;` pairs.
#[derive(Debug, Clone)]
pub struct AncillaryTextHeader {
    /// Raw text.
    pub text: String,
}

impl AncillaryTextHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        Self { text: text_at(buf, pos) }
    }
}

/// Segment identification header (code 128): mission-specific.
#[derive(Debug, Clone, Copy)]
pub struct SegmentIdentificationHeader {
    /// Identifies the image this segment belongs to.
    pub image_identifier: u16,
    /// This segment's number.
    pub segment_number: u16,
    /// Column this segment starts at, within the full image.
    pub segment_start_column: u16,
    /// Line this segment starts at, within the full image.
    pub segment_start_line: u16,
    /// Total number of segments making up the image.
    pub max_segment: u16,
    /// Full image width.
    pub max_column: u16,
    /// Full image height.
    pub max_line: u16,
}

impl SegmentIdentificationHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        let u16_at = |off: usize| u16::from_be_bytes([buf[pos + off], buf[pos + off + 1]]);
        Self {
            image_identifier: u16_at(3),
            segment_number: u16_at(5),
            segment_start_column: u16_at(7),
            segment_start_line: u16_at(9),
            max_segment: u16_at(11),
            max_column: u16_at(13),
            max_line: u16_at(15),
        }
    }
}

/// NOAA-specific header (code 129).
#[derive(Debug, Clone)]
pub struct NoaaHeader {
    /// Four-character agency signature, e.g. `"NOAA"`.
    pub agency_signature: String,
    /// Product id.
    pub product_id: u16,
    /// Product sub-id.
    pub product_sub_id: u16,
    /// Product-specific parameter.
    pub parameter: u16,
    /// NOAA-specific compression flag.
    pub noaa_compression: u8,
}

impl NoaaHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        Self {
            agency_signature: String::from_utf8_lossy(&buf[pos + 3..pos + 7]).into_owned(),
            product_id: u16::from_be_bytes([buf[pos + 7], buf[pos + 8]]),
            product_sub_id: u16::from_be_bytes([buf[pos + 9], buf[pos + 10]]),
            parameter: u16::from_be_bytes([buf[pos + 11], buf[pos + 12]]),
            noaa_compression: buf[pos + 13],
        }
    }
}

/// Rice compression parameters header (code 131).
#[derive(Debug, Clone, Copy)]
pub struct RiceCompressionHeader {
    /// Compression option flags.
    pub flags: u16,
    /// Samples per Rice block.
    pub pixels_per_block: u8,
    /// Scan lines per TP_PDU.
    pub scan_lines_per_packet: u8,
}

impl RiceCompressionHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        Self {
            flags: u16::from_be_bytes([buf[pos + 3], buf[pos + 4]]),
            pixels_per_block: buf[pos + 5],
            scan_lines_per_packet: buf[pos + 6],
        }
    }
}

/// DCS file name header (code 132).
#[derive(Debug, Clone)]
pub struct DcsFileNameHeader {
    /// File name text.
    pub file_name: String,
}

impl DcsFileNameHeader {
    /// Parse at `pos` in `buf`.
    pub fn parse(buf: &[u8], pos: usize) -> Self {
        Self { file_name: text_at(buf, pos) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_record(buf: &mut Vec<u8>, code: u8, body: &[u8]) {
        let len = (3 + body.len()) as u16;
        buf.push(code);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(body);
    }

    fn sample_file() -> Vec<u8> {
        let mut buf = Vec::new();
        let total_header_length: u32 = 16 + 12; // primary + one annotation record
        push_record(
            &mut buf,
            CODE_PRIMARY,
            &{
                let mut b = Vec::new();
                b.push(0); // file_type
                b.extend_from_slice(&total_header_length.to_be_bytes());
                b.extend_from_slice(&1234u64.to_be_bytes());
                b
            },
        );
        push_record(&mut buf, CODE_ANNOTATION, b"hello.lrit");
        buf
    }

    #[test]
    fn builds_a_header_map() {
        let buf = sample_file();
        let m = header_map(&buf);
        assert!(m.contains_key(&CODE_PRIMARY));
        assert!(m.contains_key(&CODE_ANNOTATION));
    }

    #[test]
    fn parses_primary_and_annotation_headers() {
        let buf = sample_file();
        let m = header_map(&buf);
        let ph = PrimaryHeader::parse(&buf, m[&CODE_PRIMARY]);
        assert_eq!(ph.file_type, 0);
        assert_eq!(ph.total_header_length, 28);
        assert_eq!(ph.data_length, 1234);

        let ah = AnnotationHeader::parse(&buf, m[&CODE_ANNOTATION]);
        assert_eq!(ah.text, "hello.lrit");
    }

    #[test]
    fn zero_length_record_yields_empty_map() {
        let mut buf = Vec::new();
        let total_header_length: u32 = 16 + 10;
        push_record(&mut buf, CODE_PRIMARY, &{
            let mut b = Vec::new();
            b.push(0);
            b.extend_from_slice(&total_header_length.to_be_bytes());
            b.extend_from_slice(&0u64.to_be_bytes());
            b
        });
        buf.push(CODE_ANNOTATION);
        buf.extend_from_slice(&0u16.to_be_bytes()); // malformed zero length
        assert!(header_map(&buf).is_empty());
    }

    #[test]
    fn longitude_parses_parenthesized_float() {
        let mut name = [0u8; 32];
        let text = b"GOES-East(-75.2)";
        name[..text.len()].copy_from_slice(text);
        let inh = ImageNavigationHeader {
            projection_name: String::from_utf8_lossy(&name)
                .trim_end_matches('\0')
                .to_string(),
            column_scaling: 0,
            line_scaling: 0,
            column_offset: 0,
            line_offset: 0,
        };
        assert!((inh.longitude() - (-75.2)).abs() < 1e-4);
    }
}
