use std::sync::Arc;

/// Failure to talk to the remote key-value store: connection problems, I/O
/// errors mid-exchange, malformed replies, or explicit server error replies.
///
/// The wire client never swallows these; the cache repository catches them and
/// degrades to its in-process store.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// An I/O error on the underlying stream.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// The server sent bytes that don't decode as a valid reply.
    #[error("malformed server reply: {0}")]
    Protocol(String),

    /// The server answered with an explicit error reply.
    #[error("server error reply: {0}")]
    ErrorReply(String),

    /// The reply decoded fine but has the wrong shape for the command.
    #[error("unexpected reply type for {command}")]
    UnexpectedReply {
        /// Command that produced the reply.
        command: &'static str,
    },
}

impl From<std::io::Error> for TransportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// A payload could not be serialized into the cache's storage format.
///
/// Raised only at cache write boundaries, where it is logged and swallowed:
/// the caller keeps its in-hand value, the entry is simply not cached.
#[derive(thiserror::Error, Debug, Clone)]
#[error(transparent)]
pub struct EncodingError(Arc<serde_json::Error>);

impl From<serde_json::Error> for EncodingError {
    fn from(value: serde_json::Error) -> Self {
        Self(Arc::new(value))
    }
}
