//! Core error type for all APDU operations
//!
//! Every layer of the stack (transport, processor, secure channel, session)
//! reports failures through this single enum so callers can match on the
//! failure class without caring which layer produced it.

use crate::response::status::StatusWord;
use crate::transport::TransportError;

/// Result type alias using the core [`Error`]
pub type Result<T> = core::result::Result<T, Error>;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure below the protocol (link drop, timeout at the transport)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or unexpected wire data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// MAC verification failure, decryption failure or desynchronized channel state
    #[error("Security error: {0}")]
    Security(&'static str),

    /// Well-formed response carrying a non-success status word
    #[error("Status error {status}: {}", .status.description())]
    Status {
        /// Status word returned by the card
        status: StatusWord,
    },

    /// A version-gated feature is not available on the connected device
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Command does not fit the selected APDU encoding
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Caller supplied an argument the operation cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new security error
    pub const fn security(message: &'static str) -> Self {
        Self::Security(message)
    }

    /// Create a new status error
    pub const fn status(sw1: u8, sw2: u8) -> Self {
        Self::Status {
            status: StatusWord::new(sw1, sw2),
        }
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// The error with any context layers removed
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Status word carried by this error, if it is a device status failure
    pub fn status_word(&self) -> Option<StatusWord> {
        match self.root() {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error indicates the secure channel can no longer be trusted
    pub fn is_security(&self) -> bool {
        matches!(self.root(), Self::Security(_))
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}
