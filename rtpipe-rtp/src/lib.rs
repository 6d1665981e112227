//! In-place RTP packet views.
//!
//! This crate deliberately does not materialize a parsed header struct.
//! A [`RawPacket`] is a byte buffer plus an offset/length window, and every
//! header field is read and written directly at its wire position, so a
//! packet can travel through a transform pipeline and be rewritten without
//! any copying or re-marshaling.

#![warn(rust_2018_idioms)]

mod packet;
pub mod seq;

pub use packet::{FLAG_DISCARD, FIXED_HEADER_SIZE, PacketKind, RawPacket};
