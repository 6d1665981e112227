//! Pluggable extraction of the logical sequence identity of a packet.
//!
//! For a plain media stream the RTP header already names the stream and
//! sequence number. Retransmission formats are different: an RTX packet
//! (RFC 4588) travels on its own SSRC and payload type, while the sequence
//! number that actually matters (the one proving an original packet got
//! through) sits in the first two payload bytes. Which payload types are
//! RTX, and which original stream each belongs to, is negotiated by the
//! signaling layer and handed in as a plain table.

use std::collections::HashMap;

use rtp::RawPacket;
use shared::error::{Error, Result};

/// Maps an arriving packet to the `(ssrc, sequence number)` whose receipt
/// it proves.
pub trait SequenceStrategy: Send + Sync {
    fn sequence_identity(&self, pkt: &RawPacket) -> Result<(u32, u16)>;
}

/// Reads the RTP header fields. Correct for plain media streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderSequence;

impl SequenceStrategy for HeaderSequence {
    fn sequence_identity(&self, pkt: &RawPacket) -> Result<(u32, u16)> {
        Ok((pkt.ssrc()?, pkt.sequence_number()?))
    }
}

/// RTX-aware: packets on a configured RTX payload type are attributed to
/// the original stream's SSRC, with the original sequence number read from
/// the payload prefix. Everything else falls back to the header.
#[derive(Debug, Clone, Default)]
pub struct RtxSequenceStrategy {
    /// RTX payload type -> SSRC of the original stream.
    originals: HashMap<u8, u32>,
}

impl RtxSequenceStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `rtx_payload_type` as carrying retransmissions for the
    /// stream identified by `original_ssrc`.
    pub fn with_mapping(mut self, rtx_payload_type: u8, original_ssrc: u32) -> Self {
        self.originals.insert(rtx_payload_type, original_ssrc);
        self
    }
}

impl SequenceStrategy for RtxSequenceStrategy {
    fn sequence_identity(&self, pkt: &RawPacket) -> Result<(u32, u16)> {
        let payload_type = pkt.payload_type()?;
        let Some(&original_ssrc) = self.originals.get(&payload_type) else {
            return Ok((pkt.ssrc()?, pkt.sequence_number()?));
        };

        let payload = pkt.payload()?;
        if payload.len() < 2 {
            return Err(Error::ErrShortPacket(pkt.len()));
        }
        Ok((original_ssrc, u16::from_be_bytes([payload[0], payload[1]])))
    }
}
