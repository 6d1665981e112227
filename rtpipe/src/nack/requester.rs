//! The session-level retransmission requester.
//!
//! Detects lost RTP packets across all of a session's SSRCs and requests
//! their retransmission by injecting RTCP generic NACK packets into the
//! outbound path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rtcp::GenericNack;
use rtp::{PacketKind, RawPacket};

use crate::PacketInjector;
use crate::nack::strategy::{HeaderSequence, SequenceStrategy};
use crate::nack::tracker::{Requester, RequesterConfig};
use crate::nack::{MAX_MISSING, MAX_REQUESTS, RE_REQUEST_AFTER, WAKEUP_INTERVAL};
use crate::scheduler::RecurringRunnable;
use crate::transform::{SinglePacketTransform, TransformEngine};
use crate::util::WarnOnce;

/// Signals the scheduler that NACK work just became due.
pub type WorkReadyCallback = Box<dyn Fn() + Send + Sync>;

/// Builder for [`RetransmissionRequester`].
///
/// # Example
///
/// ```ignore
/// let requester = RetransmissionRequesterBuilder::new()
///     .with_sender_ssrc(local_ssrc)
///     .with_re_request_after(Duration::from_millis(100))
///     .build(injector);
/// ```
pub struct RetransmissionRequesterBuilder {
    max_missing: u16,
    max_requests: u32,
    re_request_after: Duration,
    wakeup_interval: Duration,
    sender_ssrc: Option<u32>,
    strategy: Box<dyn SequenceStrategy>,
}

impl Default for RetransmissionRequesterBuilder {
    fn default() -> Self {
        Self {
            max_missing: MAX_MISSING,
            max_requests: MAX_REQUESTS,
            re_request_after: RE_REQUEST_AFTER,
            wakeup_interval: WAKEUP_INTERVAL,
            sender_ssrc: None,
            strategy: Box::new(HeaderSequence),
        }
    }
}

impl RetransmissionRequesterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest run of consecutive losses that will still be requested;
    /// anything bigger resets the stream state instead.
    pub fn with_max_missing(mut self, max_missing: u16) -> Self {
        self.max_missing = max_missing;
        self
    }

    /// How many times a single packet is requested before giving up.
    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Delay before an unanswered request is sent again.
    pub fn with_re_request_after(mut self, re_request_after: Duration) -> Self {
        self.re_request_after = re_request_after;
        self
    }

    /// Fallback poll interval reported to the scheduler when idle.
    pub fn with_wakeup_interval(mut self, wakeup_interval: Duration) -> Self {
        self.wakeup_interval = wakeup_interval;
        self
    }

    /// The packet-sender SSRC placed in outgoing NACKs. Random when unset.
    pub fn with_sender_ssrc(mut self, sender_ssrc: u32) -> Self {
        self.sender_ssrc = Some(sender_ssrc);
        self
    }

    /// How to extract the logical (SSRC, sequence number) from arriving
    /// packets; see [`RtxSequenceStrategy`](crate::RtxSequenceStrategy).
    pub fn with_sequence_strategy(mut self, strategy: Box<dyn SequenceStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn build(self, injector: PacketInjector) -> RetransmissionRequester {
        RetransmissionRequester {
            config: RequesterConfig {
                max_missing: self.max_missing,
                max_requests: self.max_requests,
                re_request_after: self.re_request_after,
            },
            wakeup_interval: self.wakeup_interval,
            sender_ssrc: AtomicU32::new(self.sender_ssrc.unwrap_or_else(rand::random)),
            strategy: self.strategy,
            injector,
            requesters: Mutex::new(HashMap::new()),
            work_ready: Mutex::new(None),
            malformed_warned: WarnOnce::new(),
        }
    }
}

/// Detects lost packets per SSRC and emits NACKs for them.
///
/// One object, two pipeline roles: as a [`TransformEngine`] its RTP
/// transform observes every inbound packet (passing it through untouched),
/// and as a [`RecurringRunnable`] it is driven by the executor to build
/// and inject due NACKs.
///
/// Lock ordering: the session-level `requesters` map lock is only ever
/// held to look up, insert, or snapshot `Arc`s. It is never held across
/// a per-requester lock acquisition, and never the other way around.
pub struct RetransmissionRequester {
    config: RequesterConfig,
    wakeup_interval: Duration,
    sender_ssrc: AtomicU32,
    strategy: Box<dyn SequenceStrategy>,
    injector: PacketInjector,
    requesters: Mutex<HashMap<u32, Arc<Requester>>>,
    work_ready: Mutex<Option<WorkReadyCallback>>,
    malformed_warned: WarnOnce,
}

impl RetransmissionRequester {
    /// Install the callback used to interrupt the scheduler's sleep when
    /// newly detected loss is due immediately.
    pub fn set_work_ready_callback(&self, callback: WorkReadyCallback) {
        *self
            .work_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Set the packet-sender SSRC used in outgoing NACKs. Typically called
    /// once, when the signaling layer learns the local SSRC.
    pub fn set_sender_ssrc(&self, ssrc: u32) {
        self.sender_ssrc.store(ssrc, Ordering::Relaxed);
    }

    /// Record a received sequence number for `ssrc`. Returns true when
    /// NACK work became due right now.
    pub fn packet_received(&self, now: Instant, ssrc: u32, seq: u16) -> bool {
        let requester = self.requester_for(ssrc);
        requester.received(now, seq)
    }

    /// Drop all loss state for a torn-down stream.
    pub fn remove_stream(&self, ssrc: u32) {
        self.lock_map().remove(&ssrc);
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<u32, Arc<Requester>>> {
        self.requesters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn requester_for(&self, ssrc: u32) -> Arc<Requester> {
        let mut map = self.lock_map();
        Arc::clone(map.entry(ssrc).or_insert_with(|| {
            debug!("creating requester for ssrc={ssrc}");
            Arc::new(Requester::new(ssrc, self.config))
        }))
    }

    fn snapshot(&self) -> Vec<Arc<Requester>> {
        self.lock_map().values().cloned().collect()
    }

    fn notify_work_ready(&self) {
        let callback = self
            .work_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback();
        }
    }
}

impl RecurringRunnable for RetransmissionRequester {
    fn time_until_next_run(&self, now: Instant) -> Duration {
        let next = self
            .snapshot()
            .iter()
            .filter_map(|r| r.next_request_at())
            .min();
        match next {
            Some(at) => at.saturating_duration_since(now),
            None => self.wakeup_interval,
        }
    }

    fn run(&self, now: Instant) {
        let due: Vec<Arc<Requester>> = self
            .snapshot()
            .into_iter()
            .filter(|r| r.is_due(now))
            .collect();
        trace!("{} requesters due", due.len());

        for requester in due {
            let Some(missing) = requester.collect_for_nack(now) else {
                continue;
            };
            let nack = GenericNack::new(
                self.sender_ssrc.load(Ordering::Relaxed),
                requester.ssrc(),
                &missing,
            );
            let packet = match nack.marshal() {
                Ok(packet) => packet,
                Err(err) => {
                    warn!("failed to build NACK for ssrc={}: {err}", requester.ssrc());
                    continue;
                }
            };

            trace!(
                "injecting NACK for ssrc={} naming {} packets",
                requester.ssrc(),
                missing.len()
            );
            if let Err(err) = (self.injector)(packet, false) {
                // Loss state is untouched; the requests stay outstanding
                // and the next run retries.
                warn!("failed to inject NACK for ssrc={}: {err}", requester.ssrc());
            }
        }
    }
}

impl SinglePacketTransform for RetransmissionRequester {
    fn accepts(&self, kind: PacketKind) -> bool {
        kind == PacketKind::Rtp
    }

    /// Observe an arriving packet; the packet always passes through
    /// unmodified unless it is too malformed to identify.
    fn reverse_transform(&self, pkt: RawPacket) -> Option<RawPacket> {
        match self.strategy.sequence_identity(&pkt) {
            Ok((ssrc, seq)) => {
                if self.packet_received(Instant::now(), ssrc, seq) {
                    self.notify_work_ready();
                }
                Some(pkt)
            }
            Err(err) => {
                log::log!(
                    self.malformed_warned.level(),
                    "dropping malformed inbound RTP packet: {err}"
                );
                None
            }
        }
    }
}

impl TransformEngine for RetransmissionRequester {
    fn rtp_transform(&self) -> Option<&dyn SinglePacketTransform> {
        Some(self)
    }
}
