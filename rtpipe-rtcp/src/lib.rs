//! RTCP support for the rtpipe pipeline.
//!
//! Only the pieces the packet pipeline needs are implemented: the common
//! RTCP header, the RFC 4585 generic NACK feedback packet (built, marshaled
//! bit-for-bit, and parsed back), and in-place field access to Sender
//! Report statistics so a rewriting stage can keep them consistent with a
//! renumbered stream.

#![warn(rust_2018_idioms)]

pub mod header;
pub mod nack;
pub mod sender_report;

pub use header::RtcpHeader;
pub use nack::{GenericNack, NackEntry};
