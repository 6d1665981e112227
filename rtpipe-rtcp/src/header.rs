//! The common RTCP packet header.

use byteorder::{ByteOrder, NetworkEndian};
use shared::error::{Error, Result};

/// RTP/RTCP protocol version.
pub const RTCP_VERSION: u8 = 2;

/// Size of the common RTCP header in bytes.
pub const HEADER_SIZE: usize = 4;

/// RTCP packet type: Sender Report.
pub const PT_SENDER_REPORT: u8 = 200;

/// RTCP packet type: transport layer feedback (RTPFB, RFC 4585).
pub const PT_TRANSPORT_FEEDBACK: u8 = 205;

/// RTPFB feedback message type: generic NACK.
pub const FMT_GENERIC_NACK: u8 = 1;

/// Common RTCP header: version, padding, a 5-bit count (or feedback
/// message type), the packet type, and the length in 32-bit words minus
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    pub padding: bool,
    /// Reception report count, or FMT for feedback packet types.
    pub count: u8,
    pub packet_type: u8,
    /// Packet length in 32-bit words, minus one.
    pub length: u16,
}

impl RtcpHeader {
    pub fn unmarshal(buf: &[u8]) -> Result<RtcpHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::ErrShortPacket(buf.len()));
        }
        if buf[0] >> 6 != RTCP_VERSION {
            return Err(Error::ErrBadVersion);
        }
        Ok(RtcpHeader {
            padding: buf[0] & 0x20 != 0,
            count: buf[0] & 0x1f,
            packet_type: buf[1],
            length: NetworkEndian::read_u16(&buf[2..4]),
        })
    }

    pub fn marshal_to(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::ErrBufferTooShort);
        }
        buf[0] = (RTCP_VERSION << 6) | (u8::from(self.padding) << 5) | (self.count & 0x1f);
        buf[1] = self.packet_type;
        NetworkEndian::write_u16(&mut buf[2..4], self.length);
        Ok(())
    }
}
