//! Error types for CTAP2 operations

use derive_more::Display;

/// Result type alias using the FIDO [`Error`]
pub type Result<T> = core::result::Result<T, Error>;

/// CTAP2 status code returned as the first byte of every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("0x{_0:02X} ({})", self.name())]
pub struct CtapStatus(pub u8);

impl CtapStatus {
    /// Success
    pub const OK: Self = Self(0x00);
    /// Invalid command
    pub const INVALID_COMMAND: Self = Self(0x01);
    /// Invalid parameter
    pub const INVALID_PARAMETER: Self = Self(0x02);
    /// Invalid length
    pub const INVALID_LENGTH: Self = Self(0x03);
    /// Invalid CBOR
    pub const INVALID_CBOR: Self = Self(0x12);
    /// Missing parameter
    pub const MISSING_PARAMETER: Self = Self(0x14);
    /// Operation denied
    pub const OPERATION_DENIED: Self = Self(0x27);
    /// Operation not allowed in the current state
    pub const NOT_ALLOWED: Self = Self(0x30);
    /// Wrong PIN
    pub const PIN_INVALID: Self = Self(0x31);
    /// PIN blocked
    pub const PIN_BLOCKED: Self = Self(0x32);
    /// pinUvAuthParam did not verify
    pub const PIN_AUTH_INVALID: Self = Self(0x33);
    /// PIN auth blocked until power cycle
    pub const PIN_AUTH_BLOCKED: Self = Self(0x34);
    /// No PIN has been set
    pub const PIN_NOT_SET: Self = Self(0x35);
    /// PIN/UV auth token required
    pub const PUAT_REQUIRED: Self = Self(0x36);
    /// PIN does not satisfy the policy
    pub const PIN_POLICY_VIOLATION: Self = Self(0x37);
    /// Unsupported option
    pub const UNSUPPORTED_OPTION: Self = Self(0x2B);
    /// Unknown clientPIN sub-command
    pub const INVALID_SUBCOMMAND: Self = Self(0x3E);
    /// Built-in user verification blocked
    pub const UV_BLOCKED: Self = Self(0x3C);
    /// Unauthorized permission
    pub const UNAUTHORIZED_PERMISSION: Self = Self(0x40);

    /// Symbolic name of the status
    pub const fn name(&self) -> &'static str {
        match self.0 {
            0x00 => "OK",
            0x01 => "INVALID_COMMAND",
            0x02 => "INVALID_PARAMETER",
            0x03 => "INVALID_LENGTH",
            0x12 => "INVALID_CBOR",
            0x14 => "MISSING_PARAMETER",
            0x27 => "OPERATION_DENIED",
            0x2B => "UNSUPPORTED_OPTION",
            0x30 => "NOT_ALLOWED",
            0x31 => "PIN_INVALID",
            0x32 => "PIN_BLOCKED",
            0x33 => "PIN_AUTH_INVALID",
            0x34 => "PIN_AUTH_BLOCKED",
            0x35 => "PIN_NOT_SET",
            0x36 => "PUAT_REQUIRED",
            0x37 => "PIN_POLICY_VIOLATION",
            0x3C => "UV_BLOCKED",
            0x3E => "INVALID_SUBCOMMAND",
            0x40 => "UNAUTHORIZED_PERMISSION",
            _ => "UNKNOWN",
        }
    }
}

/// Errors raised by the FIDO crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failure in the APDU layer below
    #[error(transparent)]
    Core(#[from] keyport_apdu_core::Error),

    /// PIN rejected before anything was sent
    #[error("Invalid PIN: {0}")]
    InvalidPin(&'static str),

    /// Authenticator returned a non-zero CTAP status
    #[error("CTAP error {0}")]
    Ctap(CtapStatus),

    /// CBOR encoding or decoding failed
    #[error("CBOR error: {0}")]
    Cbor(String),

    /// Response is missing a required member or has the wrong shape
    #[error("Invalid response: {0}")]
    InvalidResponse(&'static str),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(&'static str),

    /// Session is not in a state that allows the operation
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Operation is not available for this authenticator or protocol
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// CTAP status carried by this error, if any
    pub const fn ctap_status(&self) -> Option<CtapStatus> {
        match self {
            Self::Ctap(status) => Some(*status),
            _ => None,
        }
    }
}
