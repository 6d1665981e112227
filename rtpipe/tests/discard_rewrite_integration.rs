//! Integration tests for the discard/rewrite engine.

use std::sync::Arc;

use rtcp::sender_report;
use rtp::{FLAG_DISCARD, RawPacket};
use rtpipe::{DiscardRewriteEngine, TransformChain, TransformEngine};

fn rtp_packet(ssrc: u32, seq: u16, ts: u32, payload_len: usize, discard: bool) -> RawPacket {
    let mut buf = vec![0u8; 12 + payload_len];
    buf[0] = 0x80;
    buf[1] = 96;
    buf[2..4].copy_from_slice(&seq.to_be_bytes());
    buf[4..8].copy_from_slice(&ts.to_be_bytes());
    buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
    let mut pkt = RawPacket::from_bytes(buf);
    if discard {
        pkt.set_flag(FLAG_DISCARD);
    }
    pkt
}

fn sender_report_packet(ssrc: u32, rtp_ts: u32, packets: u32, octets: u32) -> RawPacket {
    let mut buf = vec![0u8; 28];
    buf[0] = 0x80;
    buf[1] = 200;
    buf[3] = 6;
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
    buf[16..20].copy_from_slice(&rtp_ts.to_be_bytes());
    buf[20..24].copy_from_slice(&packets.to_be_bytes());
    buf[24..28].copy_from_slice(&octets.to_be_bytes());
    RawPacket::from_bytes(buf)
}

#[test]
fn test_discarded_packets_leave_no_gap() {
    const SSRC: u32 = 0xabcd;
    const TOTAL: u16 = 50;

    let engine = Arc::new(DiscardRewriteEngine::new());
    let chain = TransformChain::new(vec![engine as Arc<dyn TransformEngine>]);

    // Discard every 7th packet.
    let mut out = Vec::new();
    let mut dropped = 0u32;
    for seq in 0..TOTAL {
        let discard = seq % 7 == 0;
        if discard {
            dropped += 1;
        }
        if let Some(pkt) = chain.transform(rtp_packet(SSRC, seq, seq as u32 * 100, 10, discard)) {
            out.push(pkt.sequence_number().unwrap());
        }
    }

    assert_eq!(out.len(), (TOTAL as u32 - dropped) as usize);
    for (i, &seq) in out.iter().enumerate() {
        assert_eq!(seq, i as u16, "output numbering must be contiguous");
    }
}

#[test]
fn test_sender_report_statistics_follow_the_stream() {
    const SSRC: u32 = 0xabcd;
    const PAYLOAD: usize = 100;

    let engine = Arc::new(DiscardRewriteEngine::new());
    let chain = TransformChain::new(vec![engine as Arc<dyn TransformEngine>]);

    // 10 packets, 3 discarded.
    let mut accepted = 0u32;
    for seq in 0..10u16 {
        let discard = seq == 2 || seq == 3 || seq == 8;
        if chain
            .transform(rtp_packet(SSRC, seq, 0, PAYLOAD, discard))
            .is_some()
        {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 7);

    // The sender's SR claims 10 packets; the receiver saw 7.
    let sr = chain
        .transform(sender_report_packet(SSRC, 0, 10, 10 * PAYLOAD as u32))
        .unwrap();
    assert_eq!(sender_report::packet_count(&sr).unwrap(), 7);
    assert_eq!(sender_report::octet_count(&sr).unwrap(), 7 * PAYLOAD as u32);
}

#[test]
fn test_sender_report_for_unrewritten_stream_is_untouched() {
    let engine = Arc::new(DiscardRewriteEngine::new());
    let chain = TransformChain::new(vec![engine as Arc<dyn TransformEngine>]);

    let sr = sender_report_packet(0x9999, 5000, 42, 4200);
    let out = chain.transform(sr.clone()).unwrap();
    assert_eq!(out, sr);
}

#[test]
fn test_timestamp_gap_closes_when_frames_are_dropped() {
    const SSRC: u32 = 0xabcd;

    let engine = Arc::new(DiscardRewriteEngine::new());
    let chain = TransformChain::new(vec![engine as Arc<dyn TransformEngine>]);

    // Three one-packet frames at 3000-tick spacing; the middle one is
    // discarded.
    let a = chain
        .transform(rtp_packet(SSRC, 0, 0, 0, false))
        .unwrap();
    assert!(chain.transform(rtp_packet(SSRC, 1, 3000, 0, true)).is_none());
    let c = chain
        .transform(rtp_packet(SSRC, 2, 6000, 0, false))
        .unwrap();

    assert_eq!(a.timestamp().unwrap(), 0);
    assert_eq!(c.timestamp().unwrap(), 3000);
    assert_eq!(c.sequence_number().unwrap(), 1);
}

#[test]
fn test_wraparound_renumbering() {
    const SSRC: u32 = 0xabcd;

    let engine = Arc::new(DiscardRewriteEngine::new());
    let chain = TransformChain::new(vec![engine as Arc<dyn TransformEngine>]);

    let mut out = Vec::new();
    for seq in [65533u16, 65534, 65535, 0, 1] {
        let discard = seq == 65535;
        if let Some(pkt) = chain.transform(rtp_packet(SSRC, seq, 0, 0, discard)) {
            out.push(pkt.sequence_number().unwrap());
        }
    }

    assert_eq!(out, vec![65533, 65534, 65535, 0]);
}
