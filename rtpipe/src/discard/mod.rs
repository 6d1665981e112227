//! Dropping flagged packets without leaving visible gaps.
//!
//! An upstream stage outside this crate (bandwidth adaptation, simulcast
//! selection) marks packets it wants gone with [`FLAG_DISCARD`]. Simply
//! not sending them would punch holes in the sequence space, which the
//! receiver would read as network loss and answer with NACKs. This engine
//! consumes the flag: flagged packets end their pass here, and every
//! surviving packet is renumbered so the stream stays contiguous. Sender
//! Reports for a rewritten stream get their statistics shifted to match.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::trace;
use rtcp::sender_report;
use rtp::{FLAG_DISCARD, PacketKind, RawPacket};

use crate::transform::{SinglePacketTransform, TransformEngine};
use crate::util::WarnOnce;

pub mod rewriter;

use rewriter::ResumableStreamRewriter;

/// Transform engine that drops discard-flagged outbound packets and
/// rewrites the survivors (and their Sender Reports) to close the gaps.
#[derive(Default)]
pub struct DiscardRewriteEngine {
    /// One rewriter per SSRC, touched only from the outbound path.
    rewriters: Mutex<HashMap<u32, ResumableStreamRewriter>>,
    malformed_warned: WarnOnce,
}

impl DiscardRewriteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the rewriter state for a torn-down stream.
    pub fn remove_stream(&self, ssrc: u32) {
        self.lock().remove(&ssrc);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, ResumableStreamRewriter>> {
        self.rewriters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transform_rtp(&self, mut pkt: RawPacket) -> Option<RawPacket> {
        let ssrc = match pkt.ssrc() {
            Ok(ssrc) => ssrc,
            Err(err) => {
                log::log!(
                    self.malformed_warned.level(),
                    "dropping malformed outbound RTP packet: {err}"
                );
                return None;
            }
        };

        let accept = !pkt.has_flag(FLAG_DISCARD);
        {
            let mut rewriters = self.lock();
            let rewriter = rewriters.entry(ssrc).or_default();
            if let Err(err) = rewriter.rewrite_rtp(accept, &mut pkt) {
                log::log!(
                    self.malformed_warned.level(),
                    "rewrite failed for ssrc={ssrc}: {err}"
                );
            }
        }

        if accept {
            Some(pkt)
        } else {
            trace!("discarding flagged packet for ssrc={ssrc}");
            None
        }
    }

    fn transform_rtcp(&self, mut pkt: RawPacket) -> Option<RawPacket> {
        if !sender_report::is_sender_report(&pkt) {
            return Some(pkt);
        }
        let Ok(ssrc) = sender_report::sender_ssrc(&pkt) else {
            // Not a well-formed SR; let downstream decide what to do.
            return Some(pkt);
        };

        let rewriters = self.lock();
        if let Some(rewriter) = rewriters.get(&ssrc) {
            if let Err(err) = rewriter.rewrite_rtcp_sr(&mut pkt) {
                log::log!(
                    self.malformed_warned.level(),
                    "sender report rewrite failed for ssrc={ssrc}: {err}"
                );
            }
        }
        Some(pkt)
    }
}

impl SinglePacketTransform for DiscardRewriteEngine {
    fn transform(&self, pkt: RawPacket) -> Option<RawPacket> {
        match pkt.kind() {
            Some(PacketKind::Rtp) => self.transform_rtp(pkt),
            Some(PacketKind::Rtcp) => self.transform_rtcp(pkt),
            None => {
                log::log!(
                    self.malformed_warned.level(),
                    "dropping unclassifiable outbound packet"
                );
                None
            }
        }
    }
}

impl TransformEngine for DiscardRewriteEngine {
    fn rtp_transform(&self) -> Option<&dyn SinglePacketTransform> {
        Some(self)
    }

    fn rtcp_transform(&self) -> Option<&dyn SinglePacketTransform> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(ssrc: u32, seq: u16, discard: bool) -> RawPacket {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x80;
        buf[1] = 96;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        let mut pkt = RawPacket::from_bytes(buf);
        if discard {
            pkt.set_flag(FLAG_DISCARD);
        }
        pkt
    }

    #[test]
    fn test_flagged_packets_are_dropped() {
        let engine = DiscardRewriteEngine::new();
        assert!(engine.transform(rtp_packet(1, 0, false)).is_some());
        assert!(engine.transform(rtp_packet(1, 1, true)).is_none());
    }

    #[test]
    fn test_survivors_are_renumbered_contiguously() {
        let engine = DiscardRewriteEngine::new();
        let mut out = Vec::new();

        for seq in 0..8u16 {
            let discard = seq == 2 || seq == 5;
            if let Some(pkt) = engine.transform(rtp_packet(1, seq, discard)) {
                out.push(pkt.sequence_number().unwrap());
            }
        }

        assert_eq!(out, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_streams_are_rewritten_independently() {
        let engine = DiscardRewriteEngine::new();

        engine.transform(rtp_packet(1, 0, false)).unwrap();
        assert!(engine.transform(rtp_packet(1, 1, true)).is_none());

        // Stream 2 saw no drops; its numbering is untouched.
        let out = engine.transform(rtp_packet(2, 100, false)).unwrap();
        assert_eq!(out.sequence_number().unwrap(), 100);

        // Stream 1 shifts by its own single drop.
        let out = engine.transform(rtp_packet(1, 2, false)).unwrap();
        assert_eq!(out.sequence_number().unwrap(), 1);
    }

    #[test]
    fn test_non_sr_rtcp_passes_through() {
        let engine = DiscardRewriteEngine::new();
        let nack = RawPacket::from_bytes(vec![
            0x81, 205, 0, 3, 0, 0, 0, 1, 0, 0, 0, 2, 0, 5, 0, 0,
        ]);
        let out = engine.transform(nack.clone()).unwrap();
        assert_eq!(out, nack);
    }

    #[test]
    fn test_reverse_path_is_untouched() {
        let engine = DiscardRewriteEngine::new();
        let pkt = rtp_packet(1, 7, false);
        let out = engine.reverse_transform(pkt.clone()).unwrap();
        assert_eq!(out, pkt);
    }
}
