//! Error types for OpenPGP card operations

use iso7816_tlv::TlvError;
use keyport_apdu_core::StatusWord;

/// Result type alias using the OpenPGP [`Error`]
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for OpenPGP card operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport, status word or session errors from the APDU layer
    #[error(transparent)]
    Core(#[from] keyport_apdu_core::Error),

    /// Malformed BER-TLV
    #[error("TLV error: {0}")]
    Tlv(TlvError),

    /// Response or key data that does not have the expected shape
    #[error("Invalid data: {0}")]
    InvalidData(&'static str),

    /// Operation or parameter not supported by this card
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Operation refused in the current card state
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// PIN verification failed
    #[error("Wrong PIN, {remaining} attempts remaining")]
    WrongPin {
        /// Attempts left before the PIN blocks
        remaining: u8,
    },
}

// TlvError only implements std::error::Error with a feature the crate lacks
impl From<TlvError> for Error {
    fn from(error: TlvError) -> Self {
        Self::Tlv(error)
    }
}

impl Error {
    /// Create an [`Error::Unsupported`]
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported(message.into())
    }

    /// Status word of the card response that caused this error, if any
    pub fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::Core(err) => err.status_word(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word() {
        let err = Error::from(keyport_apdu_core::Error::status(0x6A, 0x86));
        assert_eq!(err.status_word(), Some(StatusWord::new(0x6A, 0x86)));
        assert_eq!(Error::InvalidData("x").status_word(), None);
    }

    #[test]
    fn test_tlv_error() {
        let err = Error::from(TlvError::TruncatedInput);
        assert!(matches!(err, Error::Tlv(TlvError::TruncatedInput)));
        assert_eq!(err.to_string(), "TLV error: Error input too short");
    }

    #[test]
    fn test_wrong_pin_display() {
        let err = Error::WrongPin { remaining: 2 };
        assert_eq!(err.to_string(), "Wrong PIN, 2 attempts remaining");
    }
}
