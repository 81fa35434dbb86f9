//! Error types surfaced by the protocol core
// (c) 2025 Ross Younger

use crate::protocol::wire::RequestType;

/// Convenience alias for results using our [`Error`] type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the protocol core.
///
/// Errors arising inside a transaction handler are routed to the error
/// channel (see [`Peer::error_channel`](crate::Peer::error_channel)) and the
/// offending stream is closed; they are never fatal to the peer as a whole.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// QUIC stream I/O failed. The connection is usually dead when this happens.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// The underlying QUIC connection failed or was lost.
    #[error(transparent)]
    Connection(#[from] quinn::ConnectionError),

    /// An outbound connection could not be initiated.
    #[error(transparent)]
    Connect(#[from] quinn::ConnectError),

    /// The stream or connection was closed cleanly by the remote.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// EOF part-way through a length-prefixed record.
    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead {
        /// Number of bytes the frame promised
        wanted: usize,
        /// Number of bytes actually delivered
        got: usize,
    },

    /// A record was longer than its frame width allows.
    #[error("record of {size} bytes exceeds the {limit} byte frame limit")]
    LengthMismatch {
        /// Encoded size of the offending record
        size: usize,
        /// Maximum the frame width can carry
        limit: usize,
    },

    /// A record could not be encoded or decoded.
    #[error("malformed record: {0}")]
    MalformedRecord(#[from] serde_bare::error::Error),

    /// The first record on a fresh stream was not a transaction handshake.
    #[error("request type is not transaction (got {0})")]
    NotTransaction(RequestType),

    /// The peer echoed back a different transaction name or ID than was sent.
    #[error("transaction handshake mismatch")]
    HandshakeMismatch,

    /// The peer signalled an error in-band.
    #[error("peer error: {0}")]
    Peer(String),

    /// A receive operation saw a different request type than it expected.
    #[error("wrong request type: expected {expected}, got {actual}")]
    WrongRequestType {
        /// What the receive call was prepared to handle
        expected: RequestType,
        /// What actually arrived
        actual: RequestType,
    },

    /// The peer aborted its half of the stream with the given application code.
    ///
    /// Code 1 ([`FILE_MODIFIED_CODE`](crate::stream::FILE_MODIFIED_CODE))
    /// means a file changed on the sender's disk mid-transfer.
    #[error("peer aborted the stream (code {0})")]
    PeerAborted(u64),

    /// The file changed on disk while we were sending it.
    #[error("file modified during transfer")]
    FileModifiedDuringTransfer,

    /// File content ended early or did not match the declared size.
    #[error("file content is {actual} bytes, expected {expected}")]
    SizeMismatch {
        /// Size declared in the FileInfo record
        expected: i64,
        /// Number of content bytes actually seen
        actual: i64,
    },

    /// A received FileInfo record declared a nonsensical size.
    #[error("file info declares invalid size {0}")]
    InvalidFileSize(i64),

    /// "default" is reserved for the fallback transaction handler.
    #[error("'default' is a reserved transaction name")]
    ReservedName,

    /// Operation attempted on a connection that is closed or was never opened.
    #[error("connection is not open")]
    ConnectionNotOpen,

    /// A connection was supplied whose TLS handshake has not completed.
    #[error("TLS handshake is not complete")]
    HandshakeIncomplete,

    /// The remote did not answer within the dial deadline.
    #[error("dial timed out")]
    DialTimeout,

    /// A TLS configuration could not be assembled.
    #[error("TLS configuration: {0}")]
    TlsConfig(String),

    /// Filesystem I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps an I/O error bubbled up through a QUIC stream into its protocol
    /// meaning. A reset or stop from the remote carries an application error
    /// code; everything else is a plain transport failure.
    pub(crate) fn from_stream_io(e: std::io::Error) -> Self {
        if let Some(inner) = e.get_ref() {
            if let Some(quinn::ReadError::Reset(code)) = inner.downcast_ref::<quinn::ReadError>() {
                return Error::PeerAborted(code.into_inner());
            }
            if let Some(quinn::WriteError::Stopped(code)) =
                inner.downcast_ref::<quinn::WriteError>()
            {
                return Error::PeerAborted(code.into_inner());
            }
        }
        Error::Transport(e)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn stream_io_maps_reset_to_peer_aborted() {
        let reset = quinn::ReadError::Reset(quinn::VarInt::from_u32(1));
        let io = std::io::Error::other(reset);
        let err = Error::from_stream_io(io);
        assert!(matches!(err, Error::PeerAborted(1)));
    }

    #[test]
    fn stream_io_maps_stop_to_peer_aborted() {
        let stopped = quinn::WriteError::Stopped(quinn::VarInt::from_u32(7));
        let io = std::io::Error::other(stopped);
        let err = Error::from_stream_io(io);
        assert!(matches!(err, Error::PeerAborted(7)));
    }

    #[test]
    fn stream_io_falls_back_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "oops");
        let err = Error::from_stream_io(io);
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn display_strings() {
        assert_eq!(
            Error::ShortRead { wanted: 4, got: 1 }.to_string(),
            "short read: wanted 4 bytes, got 1"
        );
        assert_eq!(
            Error::Peer("boom".into()).to_string(),
            "peer error: boom"
        );
        assert_eq!(
            Error::ReservedName.to_string(),
            "'default' is a reserved transaction name"
        );
    }
}
