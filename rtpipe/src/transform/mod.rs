//! The bidirectional packet-transform contract and chain composition.
//!
//! A transform works on one packet at a time: [`transform`] on the way out,
//! [`reverse_transform`] on the way in, either returning the (possibly
//! mutated or replaced) packet or `None` to end the packet's life for this
//! pass. Returning `None` is the only error-signaling channel on the data
//! path; transforms must not panic and internal failures are expected to
//! log and fail open.
//!
//! [`transform`]: SinglePacketTransform::transform
//! [`reverse_transform`]: SinglePacketTransform::reverse_transform

use std::sync::Arc;

use rtp::{PacketKind, RawPacket};

use crate::util::WarnOnce;

/// The unit of per-packet work.
///
/// All methods take `&self`: a transform that keeps state (and most do)
/// uses interior mutability, because the same object may also be driven
/// from the scheduler thread. Both directions default to the identity so
/// one-directional transforms implement only what they need.
pub trait SinglePacketTransform: Send + Sync {
    /// Which protocol this transform is willing to see. The chain never
    /// invokes a transform on a packet kind it does not accept.
    fn accepts(&self, kind: PacketKind) -> bool {
        let _ = kind;
        true
    }

    /// Applied to locally generated, outgoing packets.
    fn transform(&self, pkt: RawPacket) -> Option<RawPacket> {
        Some(pkt)
    }

    /// Applied to packets arriving from the network.
    fn reverse_transform(&self, pkt: RawPacket) -> Option<RawPacket> {
        Some(pkt)
    }

    /// Release per-stream resources. Called once at chain teardown.
    fn close(&self) {}
}

/// A pair of transforms installed together: one for the RTP path, one for
/// the RTCP path. Either may be absent, and both may be the same object.
pub trait TransformEngine: Send + Sync {
    fn rtp_transform(&self) -> Option<&dyn SinglePacketTransform> {
        None
    }

    fn rtcp_transform(&self) -> Option<&dyn SinglePacketTransform> {
        None
    }
}

/// An ordered chain of engines evaluated per direction.
///
/// Outbound packets visit the engines front to back; inbound packets visit
/// them back to front, so a pair of transforms that undo each other can be
/// installed as one engine and nest correctly with its neighbors.
pub struct TransformChain {
    engines: Vec<Arc<dyn TransformEngine>>,
    unclassified_warned: WarnOnce,
}

impl TransformChain {
    pub fn new(engines: Vec<Arc<dyn TransformEngine>>) -> Self {
        Self {
            engines,
            unclassified_warned: WarnOnce::new(),
        }
    }

    /// Run an outgoing packet through the chain in order.
    pub fn transform(&self, pkt: RawPacket) -> Option<RawPacket> {
        let mut pkt = Some(pkt);
        for engine in &self.engines {
            pkt = self.step(engine.as_ref(), pkt?, false);
        }
        pkt
    }

    /// Run an incoming packet through the chain in reverse order.
    pub fn reverse_transform(&self, pkt: RawPacket) -> Option<RawPacket> {
        let mut pkt = Some(pkt);
        for engine in self.engines.iter().rev() {
            pkt = self.step(engine.as_ref(), pkt?, true);
        }
        pkt
    }

    /// Close every installed transform.
    pub fn close(&self) {
        for engine in &self.engines {
            if let Some(t) = engine.rtp_transform() {
                t.close();
            }
            if let Some(t) = engine.rtcp_transform() {
                t.close();
            }
        }
    }

    fn step(
        &self,
        engine: &dyn TransformEngine,
        pkt: RawPacket,
        reverse: bool,
    ) -> Option<RawPacket> {
        // Re-classify at every step: a transform may have replaced the
        // packet with one of a different kind.
        let Some(kind) = pkt.kind() else {
            log::log!(
                self.unclassified_warned.level(),
                "dropping unclassifiable {}-byte packet",
                pkt.len()
            );
            return None;
        };

        let transform = match kind {
            PacketKind::Rtp => engine.rtp_transform(),
            PacketKind::Rtcp => engine.rtcp_transform(),
        };

        match transform {
            Some(t) if t.accepts(kind) => {
                if reverse {
                    t.reverse_transform(pkt)
                } else {
                    t.transform(pkt)
                }
            }
            _ => Some(pkt),
        }
    }
}
