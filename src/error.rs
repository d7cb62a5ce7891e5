//! Error types for the call orchestration core

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Local media acquisition errors.
///
/// Scoped to a single acquisition attempt; never tears down an otherwise
/// healthy call.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MediaError {
    /// Device access was denied or the fallback acquisition also failed
    #[error("media access denied")]
    Denied,

    /// No matching capture device is present
    #[error("media device unavailable: {0}")]
    Unavailable(String),

    /// Acquisition did not settle within the configured window
    #[error("media acquisition timed out")]
    Timeout,
}

/// Signaling transport errors.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConnectError {
    /// No acknowledgment from the signaling endpoint within the bounded window
    #[error("signaling connect timed out")]
    Timeout,

    /// The endpoint rejected the presented identity
    #[error("signaling endpoint rejected identity: {0}")]
    AuthRejected(String),

    /// The channel is not currently connected; callers decide whether to retry
    #[error("signaling transport not connected")]
    NotConnected,

    /// The endpoint could not be reached at the dial stage
    #[error("signaling endpoint unreachable: {0}")]
    Unreachable(String),

    /// `connect` was called while a connection is already established
    #[error("signaling transport already connected")]
    AlreadyConnected,
}

/// Per-peer negotiation errors.
///
/// Recoverable by dropping just the affected participant, not the whole call.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PeerError {
    /// The session did not reach `Connected` within the negotiation window
    #[error("peer negotiation timed out")]
    Timeout,

    /// SDP/ICE exchange failed inside the underlying link
    #[error("peer negotiation failed: {0}")]
    Negotiation(String),

    /// The underlying link is already closed
    #[error("peer link closed")]
    LinkClosed,

    /// In-place track replacement failed on the live connection
    #[error("track replacement failed: {0}")]
    TrackReplacement(String),
}

/// Malformed signaling payloads.
///
/// Dropped and logged, never propagated as fatal.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame could not be parsed
    #[error("malformed signaling frame: {0}")]
    Malformed(String),

    /// Frame was well-formed but not valid at this point of the exchange
    #[error("unexpected signaling frame: {0}")]
    UnexpectedFrame(String),
}

/// Errors that can occur in call orchestration operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local media acquisition failed
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Signaling transport failed
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A single peer session failed
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// Malformed signaling payload
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Operation is not valid in the current call state
    #[error("invalid call state: {0}")]
    InvalidState(String),

    /// Operation was cancelled because the call moved on before it settled
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The controller task is gone
    #[error("call controller stopped")]
    ControllerStopped,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is scoped to one peer or one acquisition and
    /// leaves the rest of the call healthy.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Media(_) | Error::Peer(_) | Error::Protocol(_))
    }

    /// Check if this error tears down the whole call session
    pub fn is_fatal_for_call(&self) -> bool {
        matches!(self, Error::Connect(ConnectError::Timeout))
            || matches!(self, Error::Connect(ConnectError::AuthRejected(_)))
            || matches!(self, Error::Connect(ConnectError::Unreachable(_)))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("bad".to_string());
        assert_eq!(err.to_string(), "invalid configuration: bad");

        let err = Error::from(PeerError::Timeout);
        assert_eq!(err.to_string(), "peer negotiation timed out");
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::from(MediaError::Denied).is_recoverable());
        assert!(Error::from(PeerError::Timeout).is_recoverable());
        assert!(!Error::from(ConnectError::NotConnected).is_recoverable());
    }

    #[test]
    fn test_error_is_fatal_for_call() {
        assert!(Error::from(ConnectError::Timeout).is_fatal_for_call());
        assert!(Error::from(ConnectError::AuthRejected("nope".into())).is_fatal_for_call());
        assert!(!Error::from(MediaError::Denied).is_fatal_for_call());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }
}
