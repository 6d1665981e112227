//! Per-SSRC loss bookkeeping.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::debug;
use rtp::seq::seq_delta;

/// Knobs shared by every [`Requester`] of a session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequesterConfig {
    pub(crate) max_missing: u16,
    pub(crate) max_requests: u32,
    pub(crate) re_request_after: Duration,
}

/// A pending retransmission request for one sequence number (the key in
/// the owning map).
#[derive(Debug, Default)]
struct Request {
    times_requested: u32,
    first_request_sent_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    /// Highest sequence number at the end of the contiguous prefix.
    last_received_seq: Option<u16>,
    /// Outstanding requests, keyed by missing sequence number.
    requests: HashMap<u16, Request>,
    /// When the next NACK for this SSRC is due. `None` iff `requests` is
    /// empty.
    next_request_at: Option<Instant>,
}

/// Loss state for a single SSRC.
///
/// Touched from two threads: the packet-receive path ([`received`]) and
/// the scheduler ([`collect_for_nack`]), so all state sits behind this
/// requester's own mutex. Locking is per-SSRC on purpose: unrelated
/// streams never contend.
///
/// [`received`]: Requester::received
/// [`collect_for_nack`]: Requester::collect_for_nack
pub(crate) struct Requester {
    ssrc: u32,
    config: RequesterConfig,
    state: Mutex<State>,
}

impl Requester {
    pub(crate) fn new(ssrc: u32, config: RequesterConfig) -> Self {
        Self {
            ssrc,
            config,
            state: Mutex::new(State::default()),
        }
    }

    pub(crate) fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The lock only guards loss bookkeeping; recovering from poison
        // cannot violate any cross-field invariant worse than losing one
        // update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an arriving sequence number.
    ///
    /// Returns true when the arrival created work that is due right now
    /// (the caller should nudge the scheduler).
    pub(crate) fn received(&self, now: Instant, seq: u16) -> bool {
        let mut state = self.lock();

        let Some(last) = state.last_received_seq else {
            // First packet on this stream: a baseline, nothing to detect
            // loss against yet.
            state.last_received_seq = Some(seq);
            return false;
        };

        let diff = seq_delta(seq, last);
        if diff <= 0 {
            // Not newer than the contiguous prefix: a duplicate, or a
            // retransmission of something we asked for.
            if let Some(request) = state.requests.remove(&seq) {
                if let Some(first) = request.first_request_sent_at {
                    debug!(
                        "ssrc={} seq={seq} recovered {:?} after the first request",
                        self.ssrc,
                        now.saturating_duration_since(first)
                    );
                }
            }
            if state.requests.is_empty() {
                state.next_request_at = None;
            }
            false
        } else if diff == 1 {
            // The very next packet, as expected.
            state.last_received_seq = Some(seq);
            false
        } else if diff <= self.config.max_missing as i32 {
            let mut missing = last.wrapping_add(1);
            while missing != seq {
                state.requests.insert(missing, Request::default());
                missing = missing.wrapping_add(1);
            }
            state.last_received_seq = Some(seq);
            state.next_request_at = Some(now);
            true
        } else {
            // Too many packets missing to recover economically; reset.
            debug!(
                "ssrc={}: discontinuity of {diff}, dropping {} unsatisfied requests",
                self.ssrc,
                state.requests.len()
            );
            state.requests.clear();
            state.next_request_at = None;
            state.last_received_seq = Some(seq);
            false
        }
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.lock().next_request_at.is_some_and(|at| at <= now)
    }

    pub(crate) fn next_request_at(&self) -> Option<Instant> {
        self.lock().next_request_at
    }

    /// Snapshot the sequence numbers still missing, assuming they will be
    /// NACKed immediately: retry counters advance, requests that hit the
    /// retry cap are dropped for good (after being included one last
    /// time), and the re-request timer restarts.
    pub(crate) fn collect_for_nack(&self, now: Instant) -> Option<Vec<u16>> {
        let mut state = self.lock();
        if state.requests.is_empty() {
            return None;
        }

        let missing: Vec<u16> = state.requests.keys().copied().collect();
        for &seq in &missing {
            let give_up = match state.requests.get_mut(&seq) {
                Some(request) => {
                    request.times_requested += 1;
                    if request.times_requested == 1 {
                        request.first_request_sent_at = Some(now);
                    }
                    request.times_requested >= self.config.max_requests
                }
                None => false,
            };
            if give_up {
                debug!(
                    "ssrc={} seq={seq}: giving up after {} requests",
                    self.ssrc, self.config.max_requests
                );
                state.requests.remove(&seq);
            }
        }

        state.next_request_at = if state.requests.is_empty() {
            None
        } else {
            Some(now + self.config.re_request_after)
        };
        Some(missing)
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> Vec<u16> {
        let mut seqs: Vec<u16> = self.lock().requests.keys().copied().collect();
        seqs.sort_unstable();
        seqs
    }
}
