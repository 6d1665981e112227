//! Per-stream configuration handed down by the signaling layer.

/// What the pipeline needs to know about one negotiated media stream.
///
/// Populated from session negotiation, which is outside this crate. The
/// RTX fields describe the RFC 4588 retransmission stream associated with
/// the primary SSRC, when one was negotiated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub ssrc: u32,
    pub payload_type: u8,
    /// SSRC retransmissions are sent on, if RTX was negotiated.
    pub ssrc_rtx: Option<u32>,
    /// Payload type used for RTX packets, if RTX was negotiated.
    pub payload_type_rtx: Option<u8>,
}
