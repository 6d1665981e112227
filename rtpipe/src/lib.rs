//! RTP packet-transform pipeline with NACK-based loss recovery.
//!
//! This crate sits on the media-transport path of a real-time session. It
//! runs per packet, keeps per-SSRC state across unbounded streams, and
//! synthesizes RTCP feedback out-of-band under a cooperative scheduler
//! shared by many streams.
//!
//! # Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TransformChain`] | Ordered chain of [`TransformEngine`]s applied per packet, in reverse order for inbound traffic |
//! | [`RetransmissionRequester`] | Detects lost inbound packets and requests their retransmission with RTCP generic NACKs (RFC 4585) |
//! | [`RetransmissionResponder`] | Caches outbound packets and retransmits on NACK, with optional RTX framing (RFC 4588) |
//! | [`DiscardRewriteEngine`] | Drops packets flagged for discarding and renumbers the stream so no gap is visible downstream |
//! | [`RecurringRunnableExecutor`] | One thread driving every registered per-stream timer cooperatively |
//!
//! # Wiring
//!
//! A requester participates in the pipeline twice: as a transform engine it
//! observes inbound sequence numbers, and as a [`RecurringRunnable`] it is
//! driven by the executor to emit NACKs when retransmission requests come
//! due. The two roles share one object:
//!
//! ```ignore
//! let requester = Arc::new(
//!     RetransmissionRequesterBuilder::new()
//!         .with_sender_ssrc(local_ssrc)
//!         .build(injector),
//! );
//!
//! let executor = RecurringRunnableExecutor::new("media")?;
//! executor.register(requester.clone());
//! let wake = executor.wake_handle();
//! requester.set_work_ready_callback(Box::new(move || wake.wake()));
//!
//! let chain = TransformChain::new(vec![
//!     requester,
//!     Arc::new(DiscardRewriteEngine::new()),
//! ]);
//! ```

#![warn(rust_2018_idioms)]

pub mod discard;
pub mod nack;
pub mod scheduler;
pub mod stream_info;
pub mod transform;

pub(crate) mod util;

use rtp::RawPacket;

pub use discard::{DiscardRewriteEngine, rewriter::ResumableStreamRewriter};
pub use nack::{
    requester::{RetransmissionRequester, RetransmissionRequesterBuilder, WorkReadyCallback},
    responder::{RetransmissionResponder, RetransmissionResponderBuilder},
    strategy::{HeaderSequence, RtxSequenceStrategy, SequenceStrategy},
};
pub use scheduler::{RecurringRunnable, RecurringRunnableExecutor, WakeHandle};
pub use stream_info::StreamInfo;
pub use transform::{SinglePacketTransform, TransformChain, TransformEngine};

/// Callback that hands a synthesized packet to the outbound send path.
///
/// `is_data` is `true` for media packets (retransmissions) and `false` for
/// feedback. Failures are reported back so callers can log and retry on
/// their own schedule; in-memory loss state is never affected by them.
pub type PacketInjector = Box<dyn Fn(RawPacket, bool) -> shared::error::Result<()> + Send + Sync>;
