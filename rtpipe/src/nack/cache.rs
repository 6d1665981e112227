//! Circular cache of recently sent packets, indexed by sequence number.

use rtp::RawPacket;
use rtp::seq::seq_delta;
use shared::error::{Error, Result};

/// Cache of the most recent sent packets for one SSRC.
///
/// Slots are addressed by sequence number modulo a power-of-two capacity,
/// so lookup is O(1) and an entry is implicitly evicted when a newer
/// packet lands in its slot. Gaps in the outgoing sequence space clear
/// the skipped slots so a later lookup cannot resurrect a stale packet.
pub(crate) struct PacketCache {
    slots: Vec<Option<(u16, RawPacket)>>,
    size: u16,
    highest_added: u16,
    started: bool,
}

impl PacketCache {
    /// Capacity must be a power of two between 1 and 32768.
    pub(crate) fn new(size: u16) -> Result<Self> {
        let is_valid = (0..=15).any(|i| size == 1 << i);
        if !is_valid {
            return Err(Error::ErrInvalidCapacity(size));
        }

        Ok(Self {
            slots: vec![None; size as usize],
            size,
            highest_added: 0,
            started: false,
        })
    }

    pub(crate) fn add(&mut self, seq: u16, pkt: RawPacket) {
        if !self.started {
            self.slots[(seq % self.size) as usize] = Some((seq, pkt));
            self.highest_added = seq;
            self.started = true;
            return;
        }

        let diff = seq_delta(seq, self.highest_added);
        if diff == 0 {
            // Duplicate send, keep the first copy.
            return;
        }
        if diff > 0 {
            // Clear the slots of any skipped sequence numbers.
            let mut skipped = self.highest_added.wrapping_add(1);
            while skipped != seq {
                self.slots[(skipped % self.size) as usize] = None;
                skipped = skipped.wrapping_add(1);
            }
            self.highest_added = seq;
        }
        // Out-of-order sends are stored without advancing the high mark.

        self.slots[(seq % self.size) as usize] = Some((seq, pkt));
    }

    pub(crate) fn get(&self, seq: u16) -> Option<&RawPacket> {
        if !self.started {
            return None;
        }

        let age = seq_delta(self.highest_added, seq);
        if age < 0 || age >= self.size as i32 {
            return None;
        }

        match &self.slots[(seq % self.size) as usize] {
            Some((stored_seq, pkt)) if *stored_seq == seq => Some(pkt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(tag: u8) -> RawPacket {
        RawPacket::from_bytes(vec![0x80, 96, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, tag])
    }

    #[test]
    fn test_invalid_capacity_rejected() {
        assert!(PacketCache::new(0).is_err());
        assert!(PacketCache::new(3).is_err());
        assert!(PacketCache::new(100).is_err());
        assert!(PacketCache::new(8).is_ok());
        assert!(PacketCache::new(32768).is_ok());
    }

    #[test]
    fn test_add_and_get() {
        let mut cache = PacketCache::new(8).unwrap();
        cache.add(5, packet(5));

        assert!(cache.get(5).is_some());
        assert!(cache.get(6).is_none());
    }

    #[test]
    fn test_old_entries_age_out() {
        let mut cache = PacketCache::new(8).unwrap();
        for seq in 0..16u16 {
            cache.add(seq, packet(seq as u8));
        }

        for seq in 0..8u16 {
            assert!(cache.get(seq).is_none(), "seq {seq} should have aged out");
        }
        for seq in 8..16u16 {
            assert!(cache.get(seq).is_some(), "seq {seq} should be cached");
        }
    }

    #[test]
    fn test_send_gap_clears_skipped_slots() {
        let mut cache = PacketCache::new(8).unwrap();
        cache.add(0, packet(0));
        cache.add(1, packet(1));
        cache.add(5, packet(5));

        assert!(cache.get(0).is_some());
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_none());
        assert!(cache.get(4).is_none());
        assert!(cache.get(5).is_some());
    }

    #[test]
    fn test_out_of_order_add() {
        let mut cache = PacketCache::new(8).unwrap();
        cache.add(0, packet(0));
        cache.add(2, packet(2));
        cache.add(1, packet(1));

        assert!(cache.get(0).is_some());
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn test_wraparound() {
        let mut cache = PacketCache::new(8).unwrap();
        for seq in [65534u16, 65535, 0, 1] {
            cache.add(seq, packet(seq as u8));
        }

        for seq in [65534u16, 65535, 0, 1] {
            assert!(cache.get(seq).is_some(), "seq {seq} should be cached");
        }
    }
}
