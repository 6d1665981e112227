use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    //RTP errors
    /// Buffer is shorter than the fixed RTP/RTCP header.
    #[error("packet is not large enough: {0} bytes")]
    ErrShortPacket(usize),
    /// Header carries a version other than 2.
    #[error("invalid packet version")]
    ErrBadVersion,
    /// The buffer cannot be classified as either RTP or RTCP.
    #[error("packet is neither RTP nor RTCP")]
    ErrUnknownProtocol,
    /// Header declares an extension that does not fit the buffer.
    #[error("header size insufficient for extension")]
    ErrHeaderSizeInsufficientForExtension,

    //RTCP errors
    /// Buffer too short to hold the marshaled packet.
    #[error("buffer too short to be written")]
    ErrBufferTooShort,
    /// Wrong RTCP packet type.
    #[error("wrong packet type")]
    ErrWrongType,
    /// Wrong feedback message type.
    #[error("wrong feedback message type")]
    ErrWrongFeedbackType,
    /// A NACK must name at least one missing sequence number.
    #[error("empty NACK")]
    ErrEmptyNack,
    /// Declared length field disagrees with the buffer.
    #[error("invalid header")]
    ErrInvalidHeader,

    //pipeline errors
    /// The outbound injector rejected a synthesized packet.
    #[error("packet injection failed: {0}")]
    ErrInjectionFailed(String),
    /// Invalid cache or log capacity (must be a power of two).
    #[error("invalid capacity: {0}")]
    ErrInvalidCapacity(u16),

    #[error("mutex poison: {0}")]
    PoisonError(String),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::PoisonError(e.to_string())
    }
}
