use thiserror::Error;

/// Errors produced while framing or parsing wire bytes.
///
/// Most of these are per-frame conditions that the stream decoder
/// swallows while it skips past the offending frame; only
/// [`WireError::TruncatedHeader`] and [`WireError::PayloadLengthMismatch`]
/// abort a whole decode call and tear the connection down.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer shorter than a message header")]
    TruncatedHeader,

    #[error("payload length runs past the buffered data")]
    PayloadLengthMismatch,

    #[error("varint runs past the end of the buffer")]
    InvalidVarint,

    #[error("inventory count exceeds the per-message limit")]
    InvalidInvCount,

    #[error("unrecognized inventory entry type")]
    InvalidInvType,

    #[error("malformed {0} payload")]
    PayloadDecode(&'static str),
}

/// Errors surfaced by the connection engine and its public calls.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("wire decode failed")]
    Wire(#[from] WireError),

    #[error("socket error")]
    Socket(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("getdata request timed out")]
    GetDataTimeout,

    #[error("inventory entry is not a transaction")]
    WrongInvType,

    #[error("another connect attempt is underway")]
    ConnectInProgress,

    #[error("not connected to the node")]
    NotConnected,
}
