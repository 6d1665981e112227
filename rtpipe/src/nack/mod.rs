//! NACK-based packet loss recovery.
//!
//! Two sides of the same feedback loop:
//!
//! - [`RetransmissionRequester`]: watches inbound sequence numbers per
//!   SSRC, detects gaps, and asks for the missing packets with RTCP
//!   generic NACKs (RFC 4585), re-asking on a timer until the packet
//!   arrives or the retry budget runs out.
//! - [`RetransmissionResponder`]: caches recently sent packets per SSRC
//!   and answers arriving NACKs by re-injecting the named packets,
//!   optionally re-framed as RTX (RFC 4588).
//!
//! [`RetransmissionRequester`]: requester::RetransmissionRequester
//! [`RetransmissionResponder`]: responder::RetransmissionResponder

use std::time::Duration;

pub mod requester;
pub mod responder;
pub mod strategy;

pub(crate) mod cache;
pub(crate) mod tracker;

/// If more than this many consecutive packets are lost, retransmission is
/// not requested for them; the per-SSRC state resets instead. Bounds both
/// memory and the NACK flood after a long outage or source restart.
pub const MAX_MISSING: u16 = 100;

/// Maximum number of retransmission requests sent for a single packet
/// before giving up on it.
pub const MAX_REQUESTS: u32 = 10;

/// How long to wait before re-requesting a packet that has not arrived.
/// Ideally this would track the RTT to the endpoint rather than being a
/// constant.
pub const RE_REQUEST_AFTER: Duration = Duration::from_millis(150);

/// Fallback interval at which the scheduler re-checks a requester that
/// currently has no pending work.
pub const WAKEUP_INTERVAL: Duration = Duration::from_millis(1000);

/// Default capacity of the responder's per-SSRC packet cache.
pub const DEFAULT_CACHE_CAPACITY: u16 = 1024;
