use thiserror::Error;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Internal failures on the session send path.
///
/// Protocol violations are not errors at this level; they are answered with a
/// `disconnect` message instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The outbound channel to the socket writer is gone
    #[error("Outbound channel closed")]
    ChannelClosed,

    /// A server message could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session has already been closed
    #[error("Session is closed")]
    Closed,
}
