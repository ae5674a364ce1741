//! Application related data (DO 6E) and the objects nested in it

use std::collections::BTreeMap;

use bitflags::bitflags;
use derive_more::Display;
use iso7816_tlv::ber::Tlv;

use crate::algorithm::AlgorithmAttributes;
use crate::key_ref::{KeyRef, data_object};
use crate::tlv::flatten;
use crate::{Error, Result};

bitflags! {
    /// Flags in the first byte of the extended capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExtendedCapabilityFlags: u8 {
        /// Key derived format for PINs
        const KDF = 0x01;
        /// PSO:DEC/ENC with AES
        const PSO_DEC_ENC_AES = 0x02;
        /// Algorithm attributes can be changed with PUT DATA
        const ALGORITHM_ATTRIBUTES_CHANGEABLE = 0x04;
        /// Private use data objects
        const PRIVATE_USE = 0x08;
        /// PW status byte can be changed
        const PW_STATUS_CHANGEABLE = 0x10;
        /// Private key import
        const KEY_IMPORT = 0x20;
        /// GET CHALLENGE
        const GET_CHALLENGE = 0x40;
        /// Secure messaging
        const SECURE_MESSAGING = 0x80;
    }
}

/// Extended capabilities (DO C0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedCapabilities {
    /// Capability flags
    pub flags: ExtendedCapabilityFlags,
    /// Secure messaging algorithm
    pub sm_algorithm: u8,
    /// Largest GET CHALLENGE length
    pub challenge_max_length: u16,
    /// Largest cardholder certificate
    pub certificate_max_length: u16,
    /// Largest special data object
    pub special_do_max_length: u16,
    /// Whether PIN block 2 format is supported
    pub pin_block_2_format: bool,
    /// Whether MANAGE SECURITY ENVIRONMENT is supported
    pub mse_command: bool,
}

impl ExtendedCapabilities {
    /// Parse the content of DO C0
    pub fn parse(data: &[u8]) -> Result<Self> {
        let [flags, sm_algorithm, c1, c2, r1, r2, s1, s2, rest @ ..] = data else {
            return Err(Error::InvalidData("Extended capabilities too short"));
        };
        Ok(Self {
            flags: ExtendedCapabilityFlags::from_bits_retain(*flags),
            sm_algorithm: *sm_algorithm,
            challenge_max_length: u16::from_be_bytes([*c1, *c2]),
            certificate_max_length: u16::from_be_bytes([*r1, *r2]),
            special_do_max_length: u16::from_be_bytes([*s1, *s2]),
            pin_block_2_format: rest.first().is_some_and(|b| *b == 1),
            mse_command: rest.get(1).is_some_and(|b| *b == 1),
        })
    }

    /// Whether every flag in `flags` is set
    pub const fn supports(&self, flags: ExtendedCapabilityFlags) -> bool {
        self.flags.contains(flags)
    }
}

/// Validity of a user PIN verification for PSO:CDS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum PinPolicy {
    /// One signature per verification
    Once = 0x00,
    /// Verification valid for several signatures
    Always = 0x01,
}

/// PW status bytes (DO C4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwStatus {
    /// Signature PIN policy
    pub pin_policy_user: PinPolicy,
    /// Maximum user PIN length
    pub max_len_user: u8,
    /// Maximum reset code length
    pub max_len_reset: u8,
    /// Maximum admin PIN length
    pub max_len_admin: u8,
    /// Remaining user PIN attempts
    pub attempts_user: u8,
    /// Remaining reset code attempts
    pub attempts_reset: u8,
    /// Remaining admin PIN attempts
    pub attempts_admin: u8,
}

impl PwStatus {
    /// Parse the content of DO C4
    pub fn parse(data: &[u8]) -> Result<Self> {
        let [policy, max_user, max_reset, max_admin, user, reset, admin, ..] = data else {
            return Err(Error::InvalidData("PW status too short"));
        };
        Ok(Self {
            pin_policy_user: if *policy == 0 {
                PinPolicy::Once
            } else {
                PinPolicy::Always
            },
            max_len_user: *max_user,
            max_len_reset: *max_reset,
            max_len_admin: *max_admin,
            attempts_user: *user,
            attempts_reset: *reset,
            attempts_admin: *admin,
        })
    }
}

/// User interaction flag of a key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum Uif {
    /// No touch required
    Off = 0x00,
    /// Touch required
    On = 0x01,
    /// Touch required, cannot be turned off without a reset
    Fixed = 0x02,
    /// Touch required, cached for 15 seconds
    Cached = 0x03,
    /// Cached touch, cannot be turned off without a reset
    CachedFixed = 0x04,
}

impl Uif {
    /// General feature management byte (button) that follows the flag
    pub const GENERAL_FEATURE_BUTTON: u8 = 0x20;

    /// Whether the setting is locked until the application is reset
    pub const fn is_fixed(self) -> bool {
        matches!(self, Self::Fixed | Self::CachedFixed)
    }

    /// Whether touches are cached
    pub const fn is_cached(self) -> bool {
        matches!(self, Self::Cached | Self::CachedFixed)
    }

    /// Data object content for PUT DATA
    pub const fn to_bytes(self) -> [u8; 2] {
        [self as u8, Self::GENERAL_FEATURE_BUTTON]
    }
}

impl TryFrom<u8> for Uif {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::Fixed),
            0x03 => Ok(Self::Cached),
            0x04 => Ok(Self::CachedFixed),
            _ => Err(Error::InvalidData("Unknown UIF value")),
        }
    }
}

/// Application related data (DO 6E)
///
/// Nested templates (`73` discretionary data objects and friends) are
/// flattened; every primitive object is reachable through [`Self::raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRelatedData {
    aid: Vec<u8>,
    extended_capabilities: ExtendedCapabilities,
    pw_status: PwStatus,
    algorithm_attributes: BTreeMap<KeyRef, AlgorithmAttributes>,
    objects: BTreeMap<u16, Vec<u8>>,
}

impl ApplicationRelatedData {
    /// Parse a GET DATA 6E response
    pub fn parse(data: &[u8]) -> Result<Self> {
        let tlv = Tlv::from_bytes(data)?;
        if crate::tlv::tag_number(tlv.tag()) != data_object::APPLICATION_RELATED_DATA {
            return Err(Error::InvalidData("Expected application related data"));
        }
        let mut objects = BTreeMap::new();
        flatten(&tlv, &mut objects);

        let required = |do_id: u16, missing: &'static str| {
            objects.get(&do_id).ok_or(Error::InvalidData(missing))
        };
        let aid = required(data_object::AID, "Missing AID")?.clone();
        let extended_capabilities = ExtendedCapabilities::parse(required(
            data_object::EXTENDED_CAPABILITIES,
            "Missing extended capabilities",
        )?)?;
        let pw_status =
            PwStatus::parse(required(data_object::PW_STATUS_BYTES, "Missing PW status")?)?;

        let algorithm_attributes = KeyRef::ALL
            .into_iter()
            .filter_map(|key_ref| {
                let data = objects.get(&key_ref.algorithm_attributes())?;
                AlgorithmAttributes::parse(data)
                    .ok()
                    .map(|attributes| (key_ref, attributes))
            })
            .collect();

        Ok(Self {
            aid,
            extended_capabilities,
            pw_status,
            algorithm_attributes,
            objects,
        })
    }

    /// Full application identifier
    pub fn aid(&self) -> &[u8] {
        &self.aid
    }

    /// Serial number embedded in the AID
    pub fn serial(&self) -> Option<u32> {
        let bytes = self.aid.get(10..14)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Extended capabilities
    pub const fn extended_capabilities(&self) -> &ExtendedCapabilities {
        &self.extended_capabilities
    }

    /// PW status at the time the data was read
    pub const fn pw_status(&self) -> &PwStatus {
        &self.pw_status
    }

    /// Algorithm attributes of `key_ref`, if the slot is present
    pub fn algorithm_attributes(&self, key_ref: KeyRef) -> Option<&AlgorithmAttributes> {
        self.algorithm_attributes.get(&key_ref)
    }

    /// Fingerprint of the key in `key_ref`; all zeroes when the slot is empty
    pub fn fingerprint(&self, key_ref: KeyRef) -> Option<&[u8]> {
        if let Some(own) = self.objects.get(&key_ref.fingerprint()) {
            return Some(own);
        }
        let index = match key_ref {
            KeyRef::Sig => 0,
            KeyRef::Dec => 1,
            KeyRef::Aut => 2,
            KeyRef::Att => return None,
        };
        self.objects
            .get(&data_object::FINGERPRINTS)?
            .chunks_exact(20)
            .nth(index)
    }

    /// Primitive data object `do_id`, wherever it was nested
    pub fn raw(&self, do_id: u16) -> Option<&[u8]> {
        self.objects.get(&do_id).map(Vec::as_slice)
    }
}
