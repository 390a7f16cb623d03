//! CCSDS (255, 223) interleaved Reed-Solomon decoder with dual-basis
//! symbol conversion (§4.7, §6).
//!
//! The dual-basis/conventional-basis table (`TAL`) and the
//! deinterleave-decode-reinterleave structure of [`ReedSolomon::decode`]
//! are carried over directly from
//! `original_source/src/decoder/reed_solomon.cc`. That file delegates the
//! actual decode to `libcorrect`'s `correct_reed_solomon_decode`, which is
//! not part of the retrieved source; the Berlekamp-Massey / Chien search /
//! Forney algorithm below is a from-scratch implementation of that missing
//! piece, parameterized to match the exact code the original constructs
//! (`correct_rs_primitive_polynomial_ccsds`, first consecutive root 112,
//! primitive root 11, 32 roots).

/// CCSDS primitive polynomial for GF(256): x^8 + x^7 + x^2 + x + 1.
const PRIM_POLY: u16 = 0x187;

/// Codeword length.
const N: usize = 255;
/// Parity symbols per codeword.
const NROOTS: usize = 32;
/// Data symbols per codeword.
const K: usize = N - NROOTS;
/// First consecutive root, as an exponent of the generator element.
const FCR: i64 = 112;
/// Spacing between roots: the generator element used by this code is
/// `alpha^PRIM_ROOT`, not `alpha` itself.
const PRIM_ROOT: i64 = 11;
/// Interleave depth.
const INTERLEAVE: usize = 4;

struct Gf256 {
    exp: [u8; 512],
    log: [u8; 256],
}

impl Gf256 {
    fn new() -> Self {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255 {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= PRIM_POLY;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        Self { exp, log }
    }

    fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            0
        } else {
            let sum = self.log[a as usize] as usize + self.log[b as usize] as usize;
            self.exp[sum]
        }
    }

    fn inv(&self, a: u8) -> u8 {
        self.exp[255 - self.log[a as usize] as usize]
    }

    fn pow(&self, a: u8, n: i64) -> u8 {
        if a == 0 {
            return 0;
        }
        let e = (self.log[a as usize] as i64 * n).rem_euclid(255) as usize;
        self.exp[e]
    }

    /// `(alpha^PRIM_ROOT)^i`, i.e. the `i`th power of this code's
    /// generator element, for positive or negative `i`.
    fn gen_pow(&self, i: i64) -> u8 {
        let e = (PRIM_ROOT * i).rem_euclid(255) as usize;
        self.exp[e]
    }
}

fn poly_eval(gf: &Gf256, poly: &[u8], x: u8) -> u8 {
    let mut val = 0u8;
    for &c in poly.iter().rev() {
        val = gf.mul(val, x) ^ c;
    }
    val
}

fn poly_mul(gf: &Gf256, a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        if ai == 0 {
            continue;
        }
        for (j, &bj) in b.iter().enumerate() {
            out[i + j] ^= gf.mul(ai, bj);
        }
    }
    out
}

fn syndromes(gf: &Gf256, data: &[u8]) -> Vec<u8> {
    (0..NROOTS)
        .map(|i| {
            let root = gf.gen_pow(FCR + i as i64);
            let mut acc = data[0];
            for &d in &data[1..] {
                acc = gf.mul(acc, root) ^ d;
            }
            acc
        })
        .collect()
}

/// Berlekamp-Massey: find the error locator polynomial (low-degree
/// coefficient first) from a syndrome sequence.
fn berlekamp_massey(gf: &Gf256, syn: &[u8]) -> Vec<u8> {
    let nroots = syn.len();
    let mut c = vec![0u8; nroots + 1];
    c[0] = 1;
    let mut b = c.clone();
    let mut l = 0usize;
    let mut m = 1usize;
    let mut last_discrepancy = 1u8;

    for n in 0..nroots {
        let mut d = syn[n];
        for i in 1..=l {
            d ^= gf.mul(c[i], syn[n - i]);
        }
        if d == 0 {
            m += 1;
        } else if 2 * l <= n {
            let t = c.clone();
            let coef = gf.mul(d, gf.inv(last_discrepancy));
            for i in 0..c.len() {
                if i >= m {
                    c[i] ^= gf.mul(coef, b[i - m]);
                }
            }
            l = n + 1 - l;
            b = t;
            last_discrepancy = d;
            m = 1;
        } else {
            let coef = gf.mul(d, gf.inv(last_discrepancy));
            for i in 0..c.len() {
                if i >= m {
                    c[i] ^= gf.mul(coef, b[i - m]);
                }
            }
            m += 1;
        }
    }
    c.truncate(l + 1);
    c
}

fn formal_derivative(sigma: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; sigma.len().saturating_sub(1)];
    for (k, slot) in out.iter_mut().enumerate() {
        if k % 2 == 0 && k + 1 < sigma.len() {
            *slot = sigma[k + 1];
        }
    }
    out
}

/// Decode one (255, 223) codeword in conventional-basis representation in
/// place. Returns the number of corrected byte errors, or `None` if the
/// codeword is uncorrectable.
fn decode_codeword(gf: &Gf256, data: &mut [u8; N]) -> Option<usize> {
    let syn = syndromes(gf, data);
    if syn.iter().all(|&s| s == 0) {
        return Some(0);
    }

    let sigma = berlekamp_massey(gf, &syn);
    let num_errors = sigma.len() - 1;
    if num_errors == 0 || num_errors > NROOTS / 2 {
        return None;
    }

    let mut positions = Vec::with_capacity(num_errors);
    for i in 0..N {
        let x_inv = gf.gen_pow(-(i as i64));
        if poly_eval(gf, &sigma, x_inv) == 0 {
            positions.push(i);
        }
    }
    if positions.len() != num_errors {
        return None;
    }

    let omega_full = poly_mul(gf, &syn, &sigma);
    let omega: Vec<u8> = omega_full.into_iter().take(NROOTS).collect();
    let sigma_prime = formal_derivative(&sigma);

    let mut corrected = 0usize;
    for i in positions {
        let pos = N - 1 - i;
        let xk = gf.gen_pow(i as i64);
        let xk_inv = gf.gen_pow(-(i as i64));
        let omega_val = poly_eval(gf, &omega, xk_inv);
        let sigma_prime_val = poly_eval(gf, &sigma_prime, xk_inv);
        if sigma_prime_val == 0 {
            return None;
        }
        let scale = gf.pow(xk, 1 - FCR);
        let magnitude = gf.mul(gf.mul(omega_val, scale), gf.inv(sigma_prime_val));
        if magnitude != 0 {
            data[pos] ^= magnitude;
            // Only data symbols count toward the reported error count;
            // the trailing NROOTS positions are parity, not user data.
            if pos < K {
                corrected += 1;
            }
        }
    }

    if syndromes(gf, data).iter().any(|&s| s != 0) {
        return None;
    }
    Some(corrected)
}

/// Bijective conversion table between dual-basis (wire) and conventional
/// (decoder) symbol representations, built from the column-by-column
/// `T_{alpha,l}` transform matrix (CCSDS 101.0-B-6, Annex A).
fn build_basis_tables() -> ([u8; 256], [u8; 256]) {
    const TAL: [u32; 8] = [
        0b1111_1110,
        0b0110_1001,
        0b0110_1011,
        0b0000_1101,
        0b1110_1111,
        0b1111_0010,
        0b0101_1011,
        0b1100_0111,
    ];
    let mut conv_to_dual = [0u8; 256];
    let mut dual_to_conv = [0u8; 256];
    for i in 0..256u32 {
        let mut d = 0u8;
        for (j, &tal) in TAL.iter().enumerate() {
            let bit = ((i & tal).count_ones() & 1) as u8;
            d |= bit << (7 - j);
        }
        conv_to_dual[i as usize] = d;
        dual_to_conv[d as usize] = i as u8;
    }
    (conv_to_dual, dual_to_conv)
}

/// Decodes the interleaved, dual-basis CCSDS (255, 223) Reed-Solomon code
/// used on the wire, producing 892 bytes of corrected payload from 1020
/// bytes of received data.
pub struct ReedSolomon {
    gf: Gf256,
    conv_to_dual: [u8; 256],
    dual_to_conv: [u8; 256],
}

impl ReedSolomon {
    /// Build a new decoder, precomputing its Galois-field and basis
    /// conversion tables.
    pub fn new() -> Self {
        let (conv_to_dual, dual_to_conv) = build_basis_tables();
        Self {
            gf: Gf256::new(),
            conv_to_dual,
            dual_to_conv,
        }
    }

    /// Decode a 1020-byte (4 x 255) dual-basis interleaved block into 892
    /// bytes of corrected data. Returns the total number of corrected
    /// byte errors across all four codewords, or `None` if any codeword
    /// is uncorrectable (the whole packet fails, matching the original's
    /// `-1` return).
    pub fn decode(&self, data: &[u8]) -> Option<(Vec<u8>, usize)> {
        assert_eq!(data.len(), 1020, "Reed-Solomon input must be 1020 bytes");
        let mut out = vec![0u8; 892];
        let mut total_errors = 0usize;

        for lane in 0..INTERLEAVE {
            let mut codeword = [0u8; N];
            for j in 0..N {
                codeword[j] = self.dual_to_conv[data[j * INTERLEAVE + lane] as usize];
            }
            let errors = decode_codeword(&self.gf, &mut codeword)?;
            total_errors += errors;
            for j in 0..K {
                out[j * INTERLEAVE + lane] = self.conv_to_dual[codeword[j] as usize];
            }
        }

        Some((out, total_errors))
    }
}

impl Default for ReedSolomon {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gf() -> Gf256 {
        Gf256::new()
    }

    #[test]
    fn basis_conversion_is_involutive() {
        let (conv_to_dual, dual_to_conv) = build_basis_tables();
        for x in 0..256u32 {
            let x = x as u8;
            assert_eq!(dual_to_conv[conv_to_dual[x as usize] as usize], x);
        }
    }

    #[test]
    fn gf_inverse_round_trips() {
        let gf = gf();
        for a in 1..256u32 {
            let a = a as u8;
            assert_eq!(gf.mul(a, gf.inv(a)), 1);
        }
    }

    /// Build a valid systematic codeword: random data symbols, parity
    /// computed so that evaluating at every root of the generator
    /// polynomial yields zero syndromes.
    fn encode_codeword(gf: &Gf256, data: &[u8; K]) -> [u8; N] {
        // Generator polynomial g(x) = product_{i=0}^{nroots-1} (x - gen^(fcr+i)).
        let mut gen = vec![1u8];
        for i in 0..NROOTS {
            let root = gf.gen_pow(FCR + i as i64);
            gen = poly_mul(gf, &gen, &[root, 1]);
        }
        // Systematic encode: message(x)*x^nroots mod g(x) gives parity.
        let mut remainder = vec![0u8; NROOTS];
        for &d in data.iter() {
            let feedback = d ^ remainder[NROOTS - 1];
            for i in (1..NROOTS).rev() {
                remainder[i] = remainder[i - 1] ^ gf.mul(feedback, gen[i]);
            }
            remainder[0] = gf.mul(feedback, gen[0]);
        }
        let mut codeword = [0u8; N];
        codeword[..K].copy_from_slice(data);
        // Parity is reversed into the codeword's low-order end.
        for i in 0..NROOTS {
            codeword[K + i] = remainder[NROOTS - 1 - i];
        }
        codeword
    }

    #[test]
    fn decodes_a_codeword_with_no_errors() {
        let gf = gf();
        let mut data = [0u8; K];
        for (i, d) in data.iter_mut().enumerate() {
            *d = (i * 3 + 7) as u8;
        }
        let codeword = encode_codeword(&gf, &data);
        let mut buf = codeword;
        let corrected = decode_codeword(&gf, &mut buf).unwrap();
        assert_eq!(corrected, 0);
        assert_eq!(&buf[..K], &data[..]);
    }

    #[test]
    fn corrects_a_handful_of_byte_errors() {
        let gf = gf();
        let mut data = [0u8; K];
        for (i, d) in data.iter_mut().enumerate() {
            *d = (i * 5 + 1) as u8;
        }
        let codeword = encode_codeword(&gf, &data);
        let mut buf = codeword;
        for &pos in &[0usize, 50, 100, 150, 200] {
            buf[pos] ^= 0xaa;
        }
        let corrected = decode_codeword(&gf, &mut buf).unwrap();
        assert_eq!(corrected, 5);
        assert_eq!(&buf[..K], &data[..]);
    }

    #[test]
    fn errors_in_parity_bytes_are_corrected_but_not_counted() {
        let gf = gf();
        let mut data = [0u8; K];
        for (i, d) in data.iter_mut().enumerate() {
            *d = (i * 5 + 1) as u8;
        }
        let codeword = encode_codeword(&gf, &data);
        let mut buf = codeword;
        // Flip two data bytes and two parity bytes (K..N); only the data
        // errors should contribute to the reported count.
        for &pos in &[0usize, 100, K, N - 1] {
            buf[pos] ^= 0xaa;
        }
        let corrected = decode_codeword(&gf, &mut buf).unwrap();
        assert_eq!(corrected, 2);
        assert_eq!(&buf[..K], &data[..]);
    }

    #[test]
    fn reports_uncorrectable_beyond_capability() {
        let gf = gf();
        let data = [0u8; K];
        let codeword = encode_codeword(&gf, &data);
        let mut buf = codeword;
        for pos in 0..20 {
            buf[pos] ^= 0x55;
        }
        assert!(decode_codeword(&gf, &mut buf).is_none());
    }

    #[test]
    fn full_interleaved_decode_round_trips() {
        let gf = gf();
        let rs = ReedSolomon::new();
        let mut wire = vec![0u8; 1020];
        for lane in 0..INTERLEAVE {
            let mut data = [0u8; K];
            for (i, d) in data.iter_mut().enumerate() {
                *d = ((i + lane) * 13) as u8;
            }
            let codeword = encode_codeword(&gf, &data);
            for j in 0..N {
                wire[j * INTERLEAVE + lane] = rs.conv_to_dual[codeword[j] as usize];
            }
        }
        let (out, errors) = rs.decode(&wire).unwrap();
        assert_eq!(errors, 0);
        assert_eq!(out.len(), 892);
    }
}
