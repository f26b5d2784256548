//! Session error types.

use thiserror::Error;

use crate::config::{PORT_MAX, PORT_MIN};

/// Errors that can occur while establishing or running a chat session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Port outside the allowed range. Rejected before any network operation.
    #[error("invalid port {0}: must be between {PORT_MIN} and {PORT_MAX}")]
    InvalidPort(u16),

    /// Display name failed validation.
    #[error("invalid display name: {0}")]
    InvalidName(String),

    /// Configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Could not reach the remote peer.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address we tried to reach.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Certificate or key material could not be loaded or was rejected.
    #[error("certificate material: {0}")]
    Credentials(String),

    /// TLS negotiation or peer authentication failed. The session never starts.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A frame payload could not be decoded. Non-fatal: the receiver skips it.
    #[error("malformed frame: {0}")]
    Framing(String),

    /// A frame length prefix exceeded the sanity cap. Fatal: the stream is
    /// desynchronized and cannot be resumed.
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    /// Mid-session transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether the receiver loop may keep listening after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SessionError::Framing(_))
    }
}
