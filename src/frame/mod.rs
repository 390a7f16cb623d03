//! The frame layer: sync correlation, Viterbi decoding, derandomization,
//! and Reed-Solomon correction (§4.7, §6).

pub mod correlator;
pub mod derandomizer;
pub mod packetizer;
pub mod reed_solomon;
pub mod viterbi;
