//! The RFC 4585 generic NACK feedback packet.
//!
//! Wire layout (all fields big-endian):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  FMT=1  |    PT=205     |            length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 SSRC of packet sender                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 SSRC of media source                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            PID                |             BLP               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Each (PID, BLP) pair names the packet `PID` plus, for every set bit `i`
//! in `BLP`, the packet `PID + i + 1`.

use bytes::{BufMut, BytesMut};
use byteorder::{ByteOrder, NetworkEndian};
use rtp::RawPacket;
use rtp::seq::seq_delta;
use shared::error::{Error, Result};

use crate::header::{FMT_GENERIC_NACK, HEADER_SIZE, PT_TRANSPORT_FEEDBACK, RtcpHeader};

/// One (PID, BLP) pair: a base sequence number and a bitmask of up to 16
/// following sequence numbers that are also missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NackEntry {
    pub pid: u16,
    pub blp: u16,
}

impl NackEntry {
    /// The missing sequence numbers this entry names, in ascending order.
    pub fn seq_nums(&self) -> impl Iterator<Item = u16> {
        let NackEntry { pid, blp } = *self;
        std::iter::once(pid).chain(
            (0u16..16)
                .filter(move |i| blp & (1 << i) != 0)
                .map(move |i| pid.wrapping_add(i + 1)),
        )
    }
}

/// A generic NACK feedback packet: which sequence numbers of one media
/// source the packet sender has not received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<NackEntry>,
}

impl GenericNack {
    /// Build a NACK from an unordered set of missing sequence numbers.
    ///
    /// The set is packed into as few (PID, BLP) pairs as possible. The set
    /// must span less than half the sequence circle for the wraparound
    /// ordering to be meaningful, which every caller in this workspace
    /// guarantees by bounding its loss window.
    pub fn new(sender_ssrc: u32, media_ssrc: u32, seq_nums: &[u16]) -> Self {
        GenericNack {
            sender_ssrc,
            media_ssrc,
            entries: entries_from_seq_nums(seq_nums),
        }
    }

    /// All missing sequence numbers named by this packet, in the order the
    /// entries list them.
    pub fn seq_nums(&self) -> Vec<u16> {
        self.entries.iter().flat_map(NackEntry::seq_nums).collect()
    }

    /// Marshaled size in bytes.
    pub fn marshal_size(&self) -> usize {
        HEADER_SIZE + 8 + 4 * self.entries.len()
    }

    fn header(&self) -> RtcpHeader {
        RtcpHeader {
            padding: false,
            count: FMT_GENERIC_NACK,
            packet_type: PT_TRANSPORT_FEEDBACK,
            length: (self.marshal_size() / 4 - 1) as u16,
        }
    }

    /// Marshal into a freshly allocated [`RawPacket`].
    pub fn marshal(&self) -> Result<RawPacket> {
        if self.entries.is_empty() {
            return Err(Error::ErrEmptyNack);
        }

        let mut buf = BytesMut::with_capacity(self.marshal_size());

        let mut header = [0u8; HEADER_SIZE];
        self.header().marshal_to(&mut header)?;
        buf.put_slice(&header);

        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        for entry in &self.entries {
            buf.put_u16(entry.pid);
            buf.put_u16(entry.blp);
        }

        Ok(RawPacket::from_bytes(buf.to_vec()))
    }

    /// Parse a generic NACK from raw bytes.
    pub fn unmarshal(buf: &[u8]) -> Result<GenericNack> {
        let header = RtcpHeader::unmarshal(buf)?;
        if header.packet_type != PT_TRANSPORT_FEEDBACK {
            return Err(Error::ErrWrongType);
        }
        if header.count != FMT_GENERIC_NACK {
            return Err(Error::ErrWrongFeedbackType);
        }

        let declared = (header.length as usize + 1) * 4;
        if buf.len() < declared || declared < HEADER_SIZE + 12 {
            return Err(Error::ErrInvalidHeader);
        }

        let sender_ssrc = NetworkEndian::read_u32(&buf[4..8]);
        let media_ssrc = NetworkEndian::read_u32(&buf[8..12]);

        let mut entries = Vec::with_capacity((declared - 12) / 4);
        let mut off = 12;
        while off + 4 <= declared {
            entries.push(NackEntry {
                pid: NetworkEndian::read_u16(&buf[off..off + 2]),
                blp: NetworkEndian::read_u16(&buf[off + 2..off + 4]),
            });
            off += 4;
        }

        Ok(GenericNack {
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }
}

/// Pack an unordered set of sequence numbers into (PID, BLP) pairs.
fn entries_from_seq_nums(seq_nums: &[u16]) -> Vec<NackEntry> {
    let mut sorted = seq_nums.to_vec();
    if let Some(&anchor) = sorted.first() {
        sorted.sort_unstable_by_key(|&s| seq_delta(s, anchor));
    }
    sorted.dedup();

    let mut entries: Vec<NackEntry> = Vec::new();
    for seq in sorted {
        let delta = entries.last().map(|entry| seq_delta(seq, entry.pid));
        match delta {
            Some(delta) if (1..=16).contains(&delta) => {
                if let Some(entry) = entries.last_mut() {
                    entry.blp |= 1 << (delta - 1);
                }
            }
            _ => entries.push(NackEntry { pid: seq, blp: 0 }),
        }
    }
    entries
}
