#![warn(missing_docs)]
/*! A receiver for CCSDS-framed LRIT/HRIT satellite downlinks (GOES-class
weather satellites), from raw complex baseband samples down to
reassembled, header-parsed session PDUs.

It's heavily inspired by [GNURadio][gnuradio] and by
[ThomasHabets/rustradio][rustradio], whose block/stream architecture this
crate's [`block::Stage`]/[`queue::Queue`] pipeline is adapted from.

# Architecture overview

The receive pipeline is a fixed, linear chain of nine stages (§2),
connected by bounded [`queue::Queue`]s and each run on its own thread by
[`block::Pipeline`]:

```text
   [ Source ]
        ↓
   [ AGC ]
        ↓
   [ Matched filter (RRC) ]
        ↓
   [ Costas loop ]
        ↓
   [ Clock recovery ]
        ↓
   [ Quantizer ]
        ↓
   [ Packetizer: sync, Viterbi, derandomize, Reed-Solomon ]
        ↓
   [ Virtual channel demultiplexer ]
        ↓
   [ Session PDU reassembler ]
```

[`receive::build`] wires all nine stages, each its own [`block::Stage`] on
its own thread, from a [`source::Source`] and a [`receive::ReceiveConfig`];
the returned [`queue::Queue`] yields one [`session_pdu::SessionPdu`] per
reassembled LRIT/HRIT file.

## Links

* Framework this crate is built on: <https://github.com/ThomasHabets/rustradio>

[rustradio]: https://github.com/ThomasHabets/rustradio
[gnuradio]: https://www.gnuradio.org/
 */

pub mod block;
pub mod crc;
pub mod dsp;
pub mod error;
pub mod frame;
pub mod lrit;
pub mod queue;
pub mod receive;
pub mod rice;
pub mod session_pdu;
pub mod source;
pub mod stats;
pub mod tp_pdu;
pub mod vcdu;
pub mod virtual_channel;

/// Float type used. Usually f32, but not guaranteed.
pub type Float = f32;

/// Complex (I/Q) data.
pub type Complex = num_complex::Complex<Float>;

/// A signed 8-bit soft decision: sign is the hard bit, magnitude is the
/// Viterbi decoder's confidence in it.
pub type SoftBit = i8;
