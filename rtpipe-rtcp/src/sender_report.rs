//! In-place field access to RTCP Sender Report statistics.
//!
//! A rewriting stage that hides discarded packets from a receiver must also
//! shift the sender's advertised statistics, otherwise the receiver would
//! compute phantom loss from the difference. Only the sender-info block is
//! touched; reception report blocks pass through untouched.
//!
//! Sender-info layout after the common header and sender SSRC: NTP
//! timestamp (8 bytes), RTP timestamp (4), sender's packet count (4),
//! sender's octet count (4).

use byteorder::{ByteOrder, NetworkEndian};
use rtp::RawPacket;
use shared::error::{Error, Result};

use crate::header::{HEADER_SIZE, PT_SENDER_REPORT, RTCP_VERSION};

const SSRC_OFFSET: usize = HEADER_SIZE;
const RTP_TS_OFFSET: usize = HEADER_SIZE + 12;
const PACKET_COUNT_OFFSET: usize = HEADER_SIZE + 16;
const OCTET_COUNT_OFFSET: usize = HEADER_SIZE + 20;

/// Minimum size of a sender report: header, SSRC, and sender info.
pub const MIN_SIZE: usize = OCTET_COUNT_OFFSET + 4;

/// Whether the packet looks like an RTCP Sender Report.
pub fn is_sender_report(pkt: &RawPacket) -> bool {
    let buf = pkt.as_slice();
    buf.len() >= HEADER_SIZE && buf[0] >> 6 == RTCP_VERSION && buf[1] == PT_SENDER_REPORT
}

fn checked(pkt: &RawPacket) -> Result<&[u8]> {
    if !is_sender_report(pkt) {
        return Err(Error::ErrWrongType);
    }
    if pkt.len() < MIN_SIZE {
        return Err(Error::ErrShortPacket(pkt.len()));
    }
    Ok(pkt.as_slice())
}

fn checked_mut(pkt: &mut RawPacket) -> Result<&mut [u8]> {
    checked(pkt)?;
    Ok(pkt.as_mut_slice())
}

/// SSRC of the report's sender.
pub fn sender_ssrc(pkt: &RawPacket) -> Result<u32> {
    Ok(NetworkEndian::read_u32(&checked(pkt)?[SSRC_OFFSET..]))
}

/// The RTP timestamp in the sender-info block.
pub fn rtp_timestamp(pkt: &RawPacket) -> Result<u32> {
    Ok(NetworkEndian::read_u32(&checked(pkt)?[RTP_TS_OFFSET..]))
}

pub fn set_rtp_timestamp(pkt: &mut RawPacket, ts: u32) -> Result<()> {
    NetworkEndian::write_u32(&mut checked_mut(pkt)?[RTP_TS_OFFSET..], ts);
    Ok(())
}

/// The sender's cumulative packet count.
pub fn packet_count(pkt: &RawPacket) -> Result<u32> {
    Ok(NetworkEndian::read_u32(&checked(pkt)?[PACKET_COUNT_OFFSET..]))
}

pub fn set_packet_count(pkt: &mut RawPacket, count: u32) -> Result<()> {
    NetworkEndian::write_u32(&mut checked_mut(pkt)?[PACKET_COUNT_OFFSET..], count);
    Ok(())
}

/// The sender's cumulative payload octet count.
pub fn octet_count(pkt: &RawPacket) -> Result<u32> {
    Ok(NetworkEndian::read_u32(&checked(pkt)?[OCTET_COUNT_OFFSET..]))
}

pub fn set_octet_count(pkt: &mut RawPacket, count: u32) -> Result<()> {
    NetworkEndian::write_u32(&mut checked_mut(pkt)?[OCTET_COUNT_OFFSET..], count);
    Ok(())
}
