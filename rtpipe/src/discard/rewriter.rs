//! Sequence-number and timestamp rewriting that survives gaps.

use rtp::RawPacket;
use rtp::seq::{is_newer_seq, is_newer_ts, seq_delta, ts_delta};
use rtcp::sender_report;
use shared::error::Result;

/// Accumulates the deltas needed to renumber one SSRC's stream so that
/// dropped packets leave no visible gap.
///
/// Every packet, accepted or dropped, passes through [`rewrite_rtp`]:
/// drops grow the deltas, accepts apply them in place. The delta is
/// computed against the highest sequence number actually emitted rather
/// than counted per drop, which makes the bookkeeping immune to
/// duplicates and reordering among the dropped packets.
///
/// [`rewrite_rtp`]: ResumableStreamRewriter::rewrite_rtp
#[derive(Debug, Default)]
pub struct ResumableStreamRewriter {
    /// Value subtracted from every forwarded sequence number, mod 2^16.
    seqnum_delta: u16,
    /// Value subtracted from every forwarded timestamp, mod 2^32.
    timestamp_delta: u32,
    /// Highest rewritten sequence number emitted downstream.
    highest_seq_sent: Option<u16>,
    /// Highest rewritten timestamp emitted downstream.
    highest_ts_sent: Option<u32>,
    /// How many packets were dropped, for sender-report rewriting.
    packets_dropped: u32,
    /// How many payload octets were dropped, for sender-report rewriting.
    octets_dropped: u32,
}

impl ResumableStreamRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one packet. When `accept` is false the packet is being
    /// dropped and the deltas grow; when true its sequence number and
    /// timestamp are shifted down in place by the accumulated deltas.
    pub fn rewrite_rtp(&mut self, accept: bool, pkt: &mut RawPacket) -> Result<()> {
        let seq = pkt.sequence_number()?;
        let ts = pkt.timestamp()?;

        if accept {
            let new_seq = self.rewrite_sequence_number(seq);
            let new_ts = self.rewrite_timestamp(ts);
            if new_seq != seq {
                pkt.set_sequence_number(new_seq)?;
            }
            if new_ts != ts {
                pkt.set_timestamp(new_ts)?;
            }
        } else {
            self.octets_dropped = self
                .octets_dropped
                .wrapping_add(pkt.payload()?.len() as u32);
            self.packets_dropped = self.packets_dropped.wrapping_add(1);
            self.drop_sequence_number(seq);
            self.drop_timestamp(ts);
        }
        Ok(())
    }

    /// Shift a Sender Report's statistics by what was dropped so far: the
    /// RTP timestamp moves with the stream's timestamps, and the packet
    /// and octet counts shrink to what the receiver actually saw.
    pub fn rewrite_rtcp_sr(&self, pkt: &mut RawPacket) -> Result<()> {
        if self.timestamp_delta != 0 {
            let ts = sender_report::rtp_timestamp(pkt)?;
            sender_report::set_rtp_timestamp(pkt, ts.wrapping_sub(self.timestamp_delta))?;
        }
        if self.packets_dropped != 0 {
            let count = sender_report::packet_count(pkt)?;
            sender_report::set_packet_count(pkt, count.wrapping_sub(self.packets_dropped))?;
        }
        if self.octets_dropped != 0 {
            let count = sender_report::octet_count(pkt)?;
            sender_report::set_octet_count(pkt, count.wrapping_sub(self.octets_dropped))?;
        }
        Ok(())
    }

    fn rewrite_sequence_number(&mut self, seq: u16) -> u16 {
        let new_seq = seq.wrapping_sub(self.seqnum_delta);
        if self.highest_seq_sent.is_none_or(|highest| is_newer_seq(new_seq, highest)) {
            self.highest_seq_sent = Some(new_seq);
        }
        new_seq
    }

    fn drop_sequence_number(&mut self, seq: u16) {
        // Until something was emitted there is no gap to close.
        if let Some(highest) = self.highest_seq_sent {
            let gap = seq.wrapping_sub(highest);
            if seq_delta(gap, self.seqnum_delta) > 0 {
                self.seqnum_delta = gap;
            }
        }
    }

    fn rewrite_timestamp(&mut self, ts: u32) -> u32 {
        let new_ts = ts.wrapping_sub(self.timestamp_delta);
        if self.highest_ts_sent.is_none_or(|highest| is_newer_ts(new_ts, highest)) {
            self.highest_ts_sent = Some(new_ts);
        }
        new_ts
    }

    fn drop_timestamp(&mut self, ts: u32) {
        if let Some(highest) = self.highest_ts_sent {
            let gap = ts.wrapping_sub(highest);
            if ts_delta(gap, self.timestamp_delta) > 0 {
                self.timestamp_delta = gap;
            }
        }
    }

    /// Packets dropped so far.
    pub fn packets_dropped(&self) -> u32 {
        self.packets_dropped
    }

    /// Payload octets dropped so far.
    pub fn octets_dropped(&self) -> u32 {
        self.octets_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(seq: u16, ts: u32, payload_len: usize) -> RawPacket {
        let mut buf = vec![0u8; 12 + payload_len];
        buf[0] = 0x80;
        buf[1] = 96;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&ts.to_be_bytes());
        RawPacket::from_bytes(buf)
    }

    #[test]
    fn test_no_drops_is_identity() {
        let mut rewriter = ResumableStreamRewriter::new();
        for seq in 0..10u16 {
            let mut pkt = rtp_packet(seq, seq as u32 * 3000, 0);
            rewriter.rewrite_rtp(true, &mut pkt).unwrap();
            assert_eq!(pkt.sequence_number().unwrap(), seq);
            assert_eq!(pkt.timestamp().unwrap(), seq as u32 * 3000);
        }
        assert_eq!(rewriter.packets_dropped(), 0);
    }

    #[test]
    fn test_drops_close_the_sequence_gap() {
        let mut rewriter = ResumableStreamRewriter::new();
        let mut out = Vec::new();

        // Accept 0, 1; drop 2, 3; accept 4, 5.
        for seq in 0..6u16 {
            let accept = !(2..=3).contains(&seq);
            let mut pkt = rtp_packet(seq, 0, 0);
            rewriter.rewrite_rtp(accept, &mut pkt).unwrap();
            if accept {
                out.push(pkt.sequence_number().unwrap());
            }
        }

        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(rewriter.packets_dropped(), 2);
    }

    #[test]
    fn test_interleaved_drops() {
        let mut rewriter = ResumableStreamRewriter::new();
        let mut out = Vec::new();

        for seq in 0..10u16 {
            let accept = seq % 2 == 0;
            let mut pkt = rtp_packet(seq, 0, 0);
            rewriter.rewrite_rtp(accept, &mut pkt).unwrap();
            if accept {
                out.push(pkt.sequence_number().unwrap());
            }
        }

        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sequence_gap_closure_across_wraparound() {
        let mut rewriter = ResumableStreamRewriter::new();
        let mut out = Vec::new();

        for seq in [65533u16, 65534, 65535, 0, 1, 2] {
            let accept = seq != 65535 && seq != 0;
            let mut pkt = rtp_packet(seq, 0, 0);
            rewriter.rewrite_rtp(accept, &mut pkt).unwrap();
            if accept {
                out.push(pkt.sequence_number().unwrap());
            }
        }

        assert_eq!(out, vec![65533, 65534, 65535, 0]);
    }

    #[test]
    fn test_duplicate_drop_does_not_grow_delta() {
        let mut rewriter = ResumableStreamRewriter::new();

        let mut pkt = rtp_packet(10, 0, 0);
        rewriter.rewrite_rtp(true, &mut pkt).unwrap();

        // Drop a copy of an already-emitted packet: no gap appears.
        let mut dup = rtp_packet(10, 0, 0);
        rewriter.rewrite_rtp(false, &mut dup).unwrap();

        let mut next = rtp_packet(11, 0, 0);
        rewriter.rewrite_rtp(true, &mut next).unwrap();
        assert_eq!(next.sequence_number().unwrap(), 11);
    }

    #[test]
    fn test_timestamps_shift_with_dropped_frames() {
        let mut rewriter = ResumableStreamRewriter::new();

        // Frame A (ts 0) accepted, frame B (ts 3000) dropped entirely,
        // frame C (ts 6000) accepted.
        let mut a = rtp_packet(0, 0, 0);
        rewriter.rewrite_rtp(true, &mut a).unwrap();

        let mut b = rtp_packet(1, 3000, 0);
        rewriter.rewrite_rtp(false, &mut b).unwrap();

        let mut c = rtp_packet(2, 6000, 0);
        rewriter.rewrite_rtp(true, &mut c).unwrap();

        assert_eq!(c.sequence_number().unwrap(), 1);
        assert_eq!(c.timestamp().unwrap(), 3000);
    }

    #[test]
    fn test_sender_report_rewrite() {
        let mut rewriter = ResumableStreamRewriter::new();

        let mut pkt = rtp_packet(0, 1000, 100);
        rewriter.rewrite_rtp(true, &mut pkt).unwrap();
        let mut pkt = rtp_packet(1, 2000, 100);
        rewriter.rewrite_rtp(false, &mut pkt).unwrap();
        let mut pkt = rtp_packet(2, 3000, 100);
        rewriter.rewrite_rtp(true, &mut pkt).unwrap();

        assert_eq!(rewriter.packets_dropped(), 1);
        assert_eq!(rewriter.octets_dropped(), 100);

        let mut sr = sender_report_packet(3000, 3, 300);
        rewriter.rewrite_rtcp_sr(&mut sr).unwrap();

        assert_eq!(sender_report::packet_count(&sr).unwrap(), 2);
        assert_eq!(sender_report::octet_count(&sr).unwrap(), 200);
        // The SR timestamp shifts by the same delta as the media stream.
        assert_eq!(sender_report::rtp_timestamp(&sr).unwrap(), 3000 - 1000);
    }

    fn sender_report_packet(rtp_ts: u32, packets: u32, octets: u32) -> RawPacket {
        let mut buf = vec![0u8; 28];
        buf[0] = 0x80;
        buf[1] = 200;
        buf[3] = 6;
        buf[16..20].copy_from_slice(&rtp_ts.to_be_bytes());
        buf[20..24].copy_from_slice(&packets.to_be_bytes());
        buf[24..28].copy_from_slice(&octets.to_be_bytes());
        RawPacket::from_bytes(buf)
    }
}
