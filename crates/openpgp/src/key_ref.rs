//! Key slots and data object identifiers

use derive_more::Display;

/// Data object identifiers used with GET DATA / PUT DATA
pub mod data_object {
    /// Application identifier
    pub const AID: u16 = 0x4F;
    /// Security support template (signature counter)
    pub const SECURITY_SUPPORT_TEMPLATE: u16 = 0x7A;
    /// Application related data
    pub const APPLICATION_RELATED_DATA: u16 = 0x6E;
    /// Extended capabilities
    pub const EXTENDED_CAPABILITIES: u16 = 0xC0;
    /// PW status bytes
    pub const PW_STATUS_BYTES: u16 = 0xC4;
    /// Fingerprints of all keys
    pub const FINGERPRINTS: u16 = 0xC5;
    /// Generation times of all keys
    pub const GENERATION_TIMES: u16 = 0xCD;
    /// Algorithm information
    pub const ALGORITHM_INFORMATION: u16 = 0xFA;
    /// Signature counter inside the security support template
    pub const SIGNATURE_COUNTER: u16 = 0x93;
}

/// Key slot of the OpenPGP application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum KeyRef {
    /// Signature key
    #[display("SIG")]
    Sig,
    /// Decryption key
    #[display("DEC")]
    Dec,
    /// Authentication key
    #[display("AUT")]
    Aut,
    /// Attestation key
    #[display("ATT")]
    Att,
}

impl KeyRef {
    /// Every key slot
    pub const ALL: [Self; 4] = [Self::Sig, Self::Dec, Self::Aut, Self::Att];

    /// Data object holding the slot's algorithm attributes
    pub const fn algorithm_attributes(self) -> u16 {
        match self {
            Self::Sig => 0xC1,
            Self::Dec => 0xC2,
            Self::Aut => 0xC3,
            Self::Att => 0xDA,
        }
    }

    /// Data object holding the slot's user interaction flag
    pub const fn uif(self) -> u16 {
        match self {
            Self::Sig => 0xD6,
            Self::Dec => 0xD7,
            Self::Aut => 0xD8,
            Self::Att => 0xD9,
        }
    }

    /// Data object holding the slot's key generation timestamp
    pub const fn generation_time(self) -> u16 {
        match self {
            Self::Sig => 0xCE,
            Self::Dec => 0xCF,
            Self::Aut => 0xD0,
            Self::Att => 0xDD,
        }
    }

    /// Data object holding the slot's key fingerprint
    pub const fn fingerprint(self) -> u16 {
        match self {
            Self::Sig => 0xC7,
            Self::Dec => 0xC8,
            Self::Aut => 0xC9,
            Self::Att => 0xDB,
        }
    }

    /// Control reference template selecting the slot
    pub const fn crt(self) -> &'static [u8] {
        match self {
            Self::Sig => &[0xB6, 0x00],
            Self::Dec => &[0xB8, 0x00],
            Self::Aut => &[0xA4, 0x00],
            Self::Att => &[0xB6, 0x03, 0x84, 0x01, 0x81],
        }
    }

    /// Slot whose algorithm attributes live in data object `do_id`
    pub fn from_algorithm_attributes(do_id: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key_ref| key_ref.algorithm_attributes() == do_id)
    }
}
