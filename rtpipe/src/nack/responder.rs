//! The retransmission responder: answers NACKs from cached packets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{trace, warn};
use rtcp::GenericNack;
use rtp::{PacketKind, RawPacket};
use shared::error::Result;

use crate::PacketInjector;
use crate::nack::DEFAULT_CACHE_CAPACITY;
use crate::nack::cache::PacketCache;
use crate::stream_info::StreamInfo;
use crate::transform::{SinglePacketTransform, TransformEngine};
use crate::util::WarnOnce;

/// Builder for [`RetransmissionResponder`].
pub struct RetransmissionResponderBuilder {
    capacity: u16,
}

impl Default for RetransmissionResponderBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl RetransmissionResponderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-SSRC cache capacity in packets. Must be a power of two; larger
    /// caches can answer for older packets at the cost of memory.
    pub fn with_capacity(mut self, capacity: u16) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn build(self, injector: PacketInjector) -> RetransmissionResponder {
        RetransmissionResponder {
            capacity: self.capacity,
            injector,
            streams: Mutex::new(HashMap::new()),
            malformed_warned: WarnOnce::new(),
        }
    }
}

/// Per-stream responder state.
struct CachedStream {
    cache: PacketCache,
    /// RFC 4588 retransmission framing, when negotiated.
    ssrc_rtx: Option<u32>,
    payload_type_rtx: Option<u8>,
    rtx_sequence_number: u16,
}

/// Caches outgoing RTP packets per SSRC and re-injects them when an
/// arriving generic NACK names them.
///
/// As a [`TransformEngine`] it sits on both paths: the RTP transform
/// observes outgoing packets into the cache (`transform`), and the RTCP
/// transform consumes inbound NACKs addressed to a cached SSRC
/// (`reverse_transform`). Retransmissions leave through the injector with
/// `is_data = true`, not by re-entering the chain.
pub struct RetransmissionResponder {
    capacity: u16,
    injector: PacketInjector,
    streams: Mutex<HashMap<u32, Arc<Mutex<CachedStream>>>>,
    malformed_warned: WarnOnce,
}

impl RetransmissionResponder {
    /// Start caching packets for a stream. Overwrites any previous state
    /// for the same SSRC.
    pub fn add_stream(&self, info: &StreamInfo) -> Result<()> {
        let stream = CachedStream {
            cache: PacketCache::new(self.capacity)?,
            ssrc_rtx: info.ssrc_rtx,
            payload_type_rtx: info.payload_type_rtx,
            rtx_sequence_number: 0,
        };
        self.lock_map()
            .insert(info.ssrc, Arc::new(Mutex::new(stream)));
        Ok(())
    }

    /// Drop all cached packets for a torn-down stream.
    pub fn remove_stream(&self, ssrc: u32) {
        self.lock_map().remove(&ssrc);
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<u32, Arc<Mutex<CachedStream>>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream_for(&self, ssrc: u32) -> Option<Arc<Mutex<CachedStream>>> {
        self.lock_map().get(&ssrc).cloned()
    }

    fn handle_nack(&self, nack: &GenericNack) {
        let Some(stream) = self.stream_for(nack.media_ssrc) else {
            trace!("NACK for unknown ssrc={}, ignoring", nack.media_ssrc);
            return;
        };
        let mut stream = stream.lock().unwrap_or_else(PoisonError::into_inner);

        for seq in nack.seq_nums() {
            let Some(original) = stream.cache.get(seq).cloned() else {
                trace!(
                    "ssrc={} seq={seq} not cached, cannot retransmit",
                    nack.media_ssrc
                );
                continue;
            };

            let packet = if let (Some(ssrc_rtx), Some(pt_rtx)) =
                (stream.ssrc_rtx, stream.payload_type_rtx)
            {
                let rtx_seq = stream.rtx_sequence_number;
                stream.rtx_sequence_number = rtx_seq.wrapping_add(1);
                match rtx_rewrap(&original, ssrc_rtx, pt_rtx, rtx_seq) {
                    Ok(packet) => packet,
                    Err(err) => {
                        warn!("failed to build RTX packet for seq {seq}: {err}");
                        continue;
                    }
                }
            } else {
                original
            };

            if let Err(err) = (self.injector)(packet, true) {
                warn!("failed to retransmit ssrc={} seq={seq}: {err}", nack.media_ssrc);
            }
        }
    }
}

/// Re-frame a cached packet as RFC 4588 RTX: the retransmission stream's
/// SSRC and payload type, its own sequence counter, and the original
/// sequence number prepended to the payload.
fn rtx_rewrap(
    original: &RawPacket,
    ssrc_rtx: u32,
    payload_type_rtx: u8,
    rtx_seq: u16,
) -> Result<RawPacket> {
    let header_len = original.header_len()?;
    let original_seq = original.sequence_number()?;
    let payload = original.payload()?;

    let mut buf = Vec::with_capacity(header_len + 2 + payload.len());
    buf.extend_from_slice(&original.as_slice()[..header_len]);
    buf.extend_from_slice(&original_seq.to_be_bytes());
    buf.extend_from_slice(payload);

    let mut pkt = RawPacket::from_bytes(buf);
    pkt.set_ssrc(ssrc_rtx)?;
    pkt.set_payload_type(payload_type_rtx)?;
    pkt.set_sequence_number(rtx_seq)?;
    Ok(pkt)
}

impl SinglePacketTransform for RetransmissionResponder {
    /// Cache an outgoing RTP packet. The packet always passes through; a
    /// packet this transform cannot parse is simply not cached.
    fn transform(&self, pkt: RawPacket) -> Option<RawPacket> {
        if pkt.kind() == Some(PacketKind::Rtp) {
            match (pkt.ssrc(), pkt.sequence_number()) {
                (Ok(ssrc), Ok(seq)) => {
                    if let Some(stream) = self.stream_for(ssrc) {
                        stream
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .cache
                            .add(seq, pkt.clone());
                    }
                }
                (Err(err), _) | (_, Err(err)) => {
                    log::log!(
                        self.malformed_warned.level(),
                        "not caching malformed outgoing packet: {err}"
                    );
                }
            }
        }
        Some(pkt)
    }

    /// Consume inbound generic NACKs addressed to a cached stream; all
    /// other packets pass through.
    fn reverse_transform(&self, pkt: RawPacket) -> Option<RawPacket> {
        if pkt.kind() == Some(PacketKind::Rtcp) {
            if let Ok(nack) = GenericNack::unmarshal(pkt.as_slice()) {
                self.handle_nack(&nack);
                return None;
            }
        }
        Some(pkt)
    }
}

impl TransformEngine for RetransmissionResponder {
    fn rtp_transform(&self) -> Option<&dyn SinglePacketTransform> {
        Some(self)
    }

    fn rtcp_transform(&self) -> Option<&dyn SinglePacketTransform> {
        Some(self)
    }
}
