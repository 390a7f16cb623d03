//! The demodulation chain: AGC, matched filter, carrier recovery, symbol
//! timing, and quantization (§4.2-4.6).
//!
//! Each submodule exposes a plain, block-at-a-time processing struct (so
//! the numerics are unit-testable without a queue in the loop) plus a thin
//! [`crate::block::Stage`] wrapper that drives it from a pair of
//! [`crate::queue::Queue`]s, in the style of the teacher crate's
//! `map_block_macro_v2!`-generated `work()` bodies.

pub mod agc;
pub mod clock_recovery;
pub mod costas;
pub mod quantizer;
pub mod rrc;
