//! PIN/UV auth token permissions

use bitflags::bitflags;

use crate::ctap::command;

bitflags! {
    /// Permissions requested for a PIN/UV auth token (CTAP 2.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        /// authenticatorMakeCredential
        const MAKE_CREDENTIAL = 0x01;
        /// authenticatorGetAssertion
        const GET_ASSERTION = 0x02;
        /// authenticatorCredentialManagement
        const CREDENTIAL_MANAGEMENT = 0x04;
        /// authenticatorBioEnrollment
        const BIO_ENROLLMENT = 0x08;
        /// authenticatorLargeBlobs writes
        const LARGE_BLOB_WRITE = 0x10;
        /// authenticatorConfig
        const AUTHENTICATOR_CONFIG = 0x20;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::MAKE_CREDENTIAL | Self::GET_ASSERTION
    }
}

impl Permissions {
    /// Permission a command needs, empty for commands that need none
    pub const fn for_command(cmd: u8) -> Self {
        match cmd {
            command::MAKE_CREDENTIAL => Self::MAKE_CREDENTIAL,
            command::GET_ASSERTION => Self::GET_ASSERTION,
            command::CREDENTIAL_MANAGEMENT | command::CREDENTIAL_MANAGEMENT_PRE => {
                Self::CREDENTIAL_MANAGEMENT
            }
            command::BIO_ENROLLMENT | command::BIO_ENROLLMENT_PRE => Self::BIO_ENROLLMENT,
            command::LARGE_BLOBS => Self::LARGE_BLOB_WRITE,
            command::CONFIG => Self::AUTHENTICATOR_CONFIG,
            _ => Self::empty(),
        }
    }
}
