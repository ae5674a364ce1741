//! OpenPGP application session
//!
//! [`OpenPgpSession`] selects the OpenPGP applet (activating it when the
//! card reports it as terminated), reads the firmware version and gates
//! its operations on the [`Feature`]s below.

use iso7816_tlv::ber::{Tlv, Value};
use keyport_apdu_core::response::status::common;
use keyport_apdu_core::{
    ApduFormat, ApplicationSession, Bytes, Command, Executor, Feature, Requirement, ResultExt,
    SessionState, Version,
};
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use crate::algorithm::{
    ALGORITHM_ECDSA, AlgorithmAttributes, AlgorithmInformation, RsaImportFormat,
    correct_curve25519, legacy_algorithm_information, parse_algorithm_information,
};
use crate::app_data::{
    ApplicationRelatedData, ExtendedCapabilities, ExtendedCapabilityFlags, PinPolicy, PwStatus,
    Uif,
};
use crate::curve::OpenPgpCurve;
use crate::key_ref::{KeyRef, data_object};
use crate::keys::{PrivateKeyTemplate, PrivateKeyValues, PublicKeyValues, TAG_PUBLIC_KEY};
use crate::tlv::{self, write_tlv};
use crate::{Error, Result};

/// AID of the OpenPGP application
pub const OPENPGP_AID: [u8; 6] = [0xD2, 0x76, 0x00, 0x01, 0x24, 0x01];

const INS_VERIFY: u8 = 0x20;
const INS_PSO: u8 = 0x2A;
const INS_ACTIVATE: u8 = 0x44;
const INS_GENERATE_ASYM: u8 = 0x47;
const INS_GET_CHALLENGE: u8 = 0x84;
const INS_INTERNAL_AUTHENTICATE: u8 = 0x88;
const INS_GET_DATA: u8 = 0xCA;
const INS_PUT_DATA: u8 = 0xDA;
const INS_PUT_DATA_ODD: u8 = 0xDB;
const INS_TERMINATE: u8 = 0xE6;
const INS_GET_VERSION: u8 = 0xF1;
const INS_SET_PIN_RETRIES: u8 = 0xF2;

/// PW1 for PSO:CDS
pub const PW_USER: u8 = 0x81;
/// PW1 for other operations
pub const PW_USER_EXTENDED: u8 = 0x82;
/// PW3
pub const PW_ADMIN: u8 = 0x83;

const INVALID_PIN: [u8; 8] = [0; 8];

/// Factory reset of the application
pub const FEATURE_RESET: Feature = Feature::new("Reset", 1, 0, 6);
/// User interaction flags
pub const FEATURE_UIF: Feature = Feature::new("UIF", 4, 2, 0);
/// Attestation key slot
pub const FEATURE_ATTESTATION: Feature = Feature::new("Attestation", 5, 2, 1);
/// Cached user interaction flags
pub const FEATURE_CACHED: Feature = Feature::new("Cached UIF", 5, 2, 1);
/// Elliptic curve keys
pub const FEATURE_EC_KEYS: Feature = Feature::new("Elliptic curve keys", 5, 2, 0);
/// Changing the number of PIN attempts
pub const FEATURE_PIN_ATTEMPTS: Feature = Feature::with_requirement(
    "Set PIN attempts",
    Requirement::ByMajor {
        major: 1,
        floor: Version::new(1, 0, 7),
        otherwise: Version::new(4, 3, 1),
    },
);
/// On-card RSA key generation
pub const FEATURE_RSA_GENERATION: Feature =
    Feature::with_requirement("RSA key generation", Requirement::Predicate(rsa_generation));

/// RSA generation is disabled on the 4.2.6 - 4.3.4 range
fn rsa_generation(version: Version) -> bool {
    version.is_less_than(4, 2, 6) || version.is_at_least(4, 3, 5)
}

fn get_data_command(do_id: u16) -> Command {
    let [p1, p2] = do_id.to_be_bytes();
    Command::new(0x00, INS_GET_DATA, p1, p2)
}

/// Session with the OpenPGP application
#[derive(Debug)]
pub struct OpenPgpSession<E: Executor> {
    executor: E,
    version: Version,
    app_data: ApplicationRelatedData,
    state: SessionState,
}

impl<E: Executor> OpenPgpSession<E> {
    /// Select the OpenPGP application and read its version and
    /// application related data
    ///
    /// Uses extended APDUs on firmware 4.0.0 and later when the transport
    /// supports them.
    pub fn new(mut executor: E) -> Result<Self> {
        let mut state = SessionState::default();
        let activate = Command::new(0x00, INS_ACTIVATE, 0x00, 0x00);
        executor
            .select_with_activation(
                &OPENPGP_AID,
                &activate,
                &[common::NO_INPUT_DATA, common::CONDITIONS_NOT_SATISFIED],
            )
            .context("Selecting OpenPGP application failed")?;
        state.advance(SessionState::Selected);

        debug!("Getting version number");
        let version_bcd = executor.send_and_receive(&Command::new(0x00, INS_GET_VERSION, 0, 0))?;
        let version = Version::from_bcd(&version_bcd)?;
        executor.enable_workarounds(&version);

        if executor.supports_extended_length() && version.is_at_least(4, 0, 0) {
            executor.set_format(ApduFormat::Extended)?;
        }

        // Cached: only fields that cannot change while the session is open
        // are read from it.
        let app_data = ApplicationRelatedData::parse(
            &executor.send_and_receive(&get_data_command(data_object::APPLICATION_RELATED_DATA))?,
        )?;

        state.advance(SessionState::Ready);
        debug!(%version, aid = %hex::encode(app_data.aid()), "OpenPGP session initialized");
        Ok(Self {
            executor,
            version,
            app_data,
            state,
        })
    }

    /// Lifecycle state of the session
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Underlying executor
    pub fn executor(&mut self) -> &mut E {
        &mut self.executor
    }

    /// Release the executor
    pub fn into_executor(self) -> E {
        self.executor
    }

    fn send(&mut self, command: &Command) -> Result<Bytes> {
        if self.state == SessionState::Closed {
            return Err(Error::InvalidState("Session is closed"));
        }
        Ok(self.executor.send_and_receive(command)?)
    }

    /// Read a data object
    pub fn get_data(&mut self, do_id: u16) -> Result<Bytes> {
        debug!(do_id = format_args!("{do_id:04X}"), "Reading data object");
        self.send(&get_data_command(do_id))
    }

    /// Write a data object
    pub fn put_data(&mut self, do_id: u16, data: impl Into<Bytes>) -> Result<()> {
        let [p1, p2] = do_id.to_be_bytes();
        self.send(&Command::new_with_data(0x00, INS_PUT_DATA, p1, p2, data))?;
        debug!(do_id = format_args!("{do_id:04X}"), "Wrote data object");
        Ok(())
    }

    /// Read the application related data from the card
    pub fn get_application_related_data(&mut self) -> Result<ApplicationRelatedData> {
        ApplicationRelatedData::parse(&self.get_data(data_object::APPLICATION_RELATED_DATA)?)
    }

    /// Application related data read when the session was opened
    pub const fn application_related_data(&self) -> &ApplicationRelatedData {
        &self.app_data
    }

    /// Full application identifier
    pub fn aid(&self) -> &[u8] {
        self.app_data.aid()
    }

    /// Extended capabilities of the application
    pub const fn extended_capabilities(&self) -> &ExtendedCapabilities {
        self.app_data.extended_capabilities()
    }

    /// Current PIN status
    pub fn get_pin_status(&mut self) -> Result<PwStatus> {
        PwStatus::parse(&self.get_data(data_object::PW_STATUS_BYTES)?)
    }

    /// Number of signatures made with the signature key
    pub fn get_signature_counter(&mut self) -> Result<u32> {
        let data = self.get_data(data_object::SECURITY_SUPPORT_TEMPLATE)?;
        let mut objects = std::collections::BTreeMap::new();
        tlv::flatten(&Tlv::from_bytes(&data)?, &mut objects);
        let counter = objects
            .get(&data_object::SIGNATURE_COUNTER)
            .ok_or(Error::InvalidData("Missing signature counter"))?;
        Ok(counter
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte)))
    }

    fn verify(&mut self, pw: u8, pin: &str) -> Result<()> {
        // The PIN buffer is wiped once the command is dropped at the end of
        // this call; frames encoded from it live for a single exchange.
        let pin = Bytes::from_owner(Zeroizing::new(pin.as_bytes().to_vec()));
        let command = Command::new_with_data(0x00, INS_VERIFY, 0x00, pw, pin);
        match self.send(&command) {
            Ok(_) => Ok(()),
            Err(err) if err.status_word().is_some() => {
                let status = self.get_pin_status()?;
                let remaining = if pw == PW_ADMIN {
                    status.attempts_admin
                } else {
                    status.attempts_user
                };
                warn!(pw, remaining, "PIN verification failed");
                Err(Error::WrongPin { remaining })
            }
            Err(err) => Err(err),
        }
    }

    /// Verify the user PIN
    ///
    /// `extended` verifies PW1 for decryption and authentication instead of
    /// signing.
    ///
    /// # Errors
    /// [`Error::WrongPin`] with the remaining attempts when the card rejects
    /// the PIN.
    pub fn verify_user_pin(&mut self, pin: &str, extended: bool) -> Result<()> {
        self.verify(if extended { PW_USER_EXTENDED } else { PW_USER }, pin)
    }

    /// Verify the admin PIN
    pub fn verify_admin_pin(&mut self, pin: &str) -> Result<()> {
        self.verify(PW_ADMIN, pin)
    }

    /// Random bytes from the card
    pub fn get_challenge(&mut self, length: u16) -> Result<Bytes> {
        let capabilities = *self.extended_capabilities();
        if !capabilities.supports(ExtendedCapabilityFlags::GET_CHALLENGE) {
            return Err(Error::unsupported("GET CHALLENGE is not supported"));
        }
        if length > capabilities.challenge_max_length {
            return Err(Error::unsupported(format!(
                "Challenge length {length} exceeds {}",
                capabilities.challenge_max_length
            )));
        }

        debug!(length, "Getting random bytes");
        self.send(&Command::new_with_le(
            0x00,
            INS_GET_CHALLENGE,
            0x00,
            0x00,
            u32::from(length),
        ))
    }

    /// Whether one user PIN verification allows one or several signatures
    pub fn set_signature_pin_policy(&mut self, policy: PinPolicy) -> Result<()> {
        debug!(%policy, "Setting signature PIN policy");
        self.put_data(data_object::PW_STATUS_BYTES, vec![policy as u8])?;
        info!("Signature PIN policy set");
        Ok(())
    }

    /// Reset the application to factory state
    ///
    /// Both PINs are blocked with wrong attempts first, then the application
    /// is terminated and activated again.
    pub fn reset(&mut self) -> Result<()> {
        self.require(&FEATURE_RESET)?;
        debug!("Preparing OpenPGP reset");

        let status = self.get_pin_status()?;
        for (pw, attempts) in [
            (PW_USER, status.attempts_user),
            (PW_ADMIN, status.attempts_admin),
        ] {
            debug!(pw, attempts, "Blocking PIN with invalid attempts");
            for _ in 0..attempts {
                let command = Command::new_with_data(0x00, INS_VERIFY, 0x00, pw, INVALID_PIN.to_vec());
                match self.send(&command) {
                    Ok(_) => {}
                    Err(err) if err.status_word().is_some() => {
                        trace!(%err, "Invalid PIN rejected");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        debug!("Sending TERMINATE, then ACTIVATE");
        self.send(&Command::new(0x00, INS_TERMINATE, 0x00, 0x00))?;
        self.send(&Command::new(0x00, INS_ACTIVATE, 0x00, 0x00))?;
        info!("OpenPGP application data reset performed");
        Ok(())
    }

    /// Set the retry counters of the user PIN, reset code and admin PIN
    pub fn set_pin_attempts(&mut self, user: u8, reset: u8, admin: u8) -> Result<()> {
        self.require(&FEATURE_PIN_ATTEMPTS)?;
        debug!(user, reset, admin, "Setting PIN attempts");
        self.send(&Command::new_with_data(
            0x00,
            INS_SET_PIN_RETRIES,
            0x00,
            0x00,
            vec![user, reset, admin],
        ))?;
        info!("Number of PIN attempts has been changed");
        Ok(())
    }

    /// User interaction flag of `key_ref`
    ///
    /// Cards without UIF support report [`Uif::Off`].
    pub fn get_uif(&mut self, key_ref: KeyRef) -> Result<Uif> {
        match self.get_data(key_ref.uif()) {
            Ok(data) => Uif::try_from(
                *data
                    .first()
                    .ok_or(Error::InvalidData("Empty UIF data object"))?,
            ),
            Err(err) if err.status_word() == Some(common::INCORRECT_P1P2) => Ok(Uif::Off),
            Err(err) => Err(err),
        }
    }

    /// Change the user interaction flag of `key_ref`
    ///
    /// # Errors
    /// [`Error::InvalidState`] when the current flag is fixed.
    pub fn set_uif(&mut self, key_ref: KeyRef, uif: Uif) -> Result<()> {
        self.require(&FEATURE_UIF)?;
        if key_ref == KeyRef::Att {
            self.require(&FEATURE_ATTESTATION)?;
        }
        if uif.is_cached() {
            self.require(&FEATURE_CACHED)?;
        }

        debug!(%key_ref, %uif, "Setting UIF");
        if self.get_uif(key_ref)?.is_fixed() {
            return Err(Error::InvalidState("Cannot change UIF when set to FIXED"));
        }
        self.put_data(key_ref.uif(), uif.to_bytes().to_vec())?;
        info!(%key_ref, "UIF changed");
        Ok(())
    }

    /// Algorithm attributes each key slot accepts
    ///
    /// Firmware below 5.2.0 has no algorithm information object and gets a
    /// fixed RSA list; firmware below 5.6.1 has its Curve25519 entries
    /// corrected.
    pub fn get_algorithm_information(&mut self) -> Result<AlgorithmInformation> {
        if !self
            .extended_capabilities()
            .supports(ExtendedCapabilityFlags::ALGORITHM_ATTRIBUTES_CHANGEABLE)
        {
            return Err(Error::unsupported(
                "Writing algorithm attributes is not supported",
            ));
        }
        if self.version.is_less_than(5, 2, 0) {
            return Ok(legacy_algorithm_information(self.version));
        }

        debug!("Getting supported algorithm information");
        let data = self.get_data(data_object::ALGORITHM_INFORMATION)?;
        let entries = match Tlv::from_bytes(&data) {
            Ok(outer) if tlv::tag_number(outer.tag()) == data_object::ALGORITHM_INFORMATION => {
                match outer.value() {
                    Value::Constructed(children) => children.clone(),
                    Value::Primitive(inner) => tlv::parse_lenient(inner),
                }
            }
            Ok(_) => return Err(Error::InvalidData("Expected algorithm information")),
            Err(err) => {
                // Some firmware declares a longer outer length than it sends
                warn!(%err, "Malformed algorithm information, parsing leniently");
                if data.first() != Some(&(data_object::ALGORITHM_INFORMATION as u8)) {
                    return Err(Error::InvalidData("Expected algorithm information"));
                }
                let (_, rest) = tlv::split_header(&data)?;
                tlv::parse_lenient(rest)
            }
        };

        let mut info = parse_algorithm_information(&entries);
        if self.version.is_less_than(5, 6, 1) {
            correct_curve25519(&mut info);
        }
        Ok(info)
    }

    /// Change the algorithm of `key_ref`
    ///
    /// # Errors
    /// [`Error::Unsupported`] unless the card lists `attributes` for the slot.
    pub fn set_algorithm_attributes(
        &mut self,
        key_ref: KeyRef,
        attributes: &AlgorithmAttributes,
    ) -> Result<()> {
        debug!(%key_ref, %attributes, "Setting algorithm attributes");
        let supported = self.get_algorithm_information()?;
        let slot = supported
            .get(&key_ref)
            .ok_or_else(|| Error::unsupported(format!("Key slot {key_ref} not supported")))?;
        if !slot.contains(attributes) {
            return Err(Error::unsupported(format!(
                "Algorithm attributes {attributes} not supported"
            )));
        }

        self.put_data(key_ref.algorithm_attributes(), attributes.to_bytes())?;
        info!(%key_ref, "Algorithm attributes have been changed");
        Ok(())
    }

    /// Store the key generation timestamp of `key_ref`
    pub fn set_generation_time(&mut self, key_ref: KeyRef, timestamp: u32) -> Result<()> {
        debug!(%key_ref, timestamp, "Setting key generation timestamp");
        self.put_data(key_ref.generation_time(), timestamp.to_be_bytes().to_vec())?;
        info!(%key_ref, "Key generation timestamp set");
        Ok(())
    }

    /// Store the key fingerprint of `key_ref`
    pub fn set_fingerprint(&mut self, key_ref: KeyRef, fingerprint: &[u8]) -> Result<()> {
        debug!(%key_ref, "Setting key fingerprint");
        self.put_data(key_ref.fingerprint(), fingerprint.to_vec())?;
        info!(%key_ref, "Key fingerprint set");
        Ok(())
    }

    fn parse_public_key(response: &[u8], curve: Option<OpenPgpCurve>) -> Result<PublicKeyValues> {
        let Value::Constructed(children) = tlv::unpack(TAG_PUBLIC_KEY, response)? else {
            return Err(Error::InvalidData("Public key object is not constructed"));
        };
        PublicKeyValues::from_public_key_data(&tlv::primitive_map(&children), curve)
    }

    fn generate(&mut self, key_ref: KeyRef, curve: Option<OpenPgpCurve>) -> Result<PublicKeyValues> {
        let response = self.send(&Command::new_with_data(
            0x00,
            INS_GENERATE_ASYM,
            0x80,
            0x00,
            key_ref.crt(),
        ))?;
        Self::parse_public_key(&response, curve)
    }

    /// Generate an RSA key of `n_len` bits in `key_ref`
    pub fn generate_rsa_key(&mut self, key_ref: KeyRef, n_len: u16) -> Result<PublicKeyValues> {
        self.require(&FEATURE_RSA_GENERATION)?;
        debug!(%key_ref, n_len, "Generating RSA private key");

        if self
            .extended_capabilities()
            .supports(ExtendedCapabilityFlags::ALGORITHM_ATTRIBUTES_CHANGEABLE)
        {
            self.set_algorithm_attributes(
                key_ref,
                &AlgorithmAttributes::rsa(n_len, RsaImportFormat::Standard),
            )?;
        } else if n_len != 2048 {
            return Err(Error::unsupported("Algorithm attributes not supported"));
        }

        let public_key = self.generate(key_ref, None)?;
        info!(%key_ref, "RSA key generated");
        Ok(public_key)
    }

    /// Generate an elliptic curve key on `curve` in `key_ref`
    pub fn generate_ec_key(
        &mut self,
        key_ref: KeyRef,
        curve: OpenPgpCurve,
    ) -> Result<PublicKeyValues> {
        self.require(&FEATURE_EC_KEYS)?;
        debug!(%key_ref, %curve, "Generating EC private key");

        self.set_algorithm_attributes(key_ref, &AlgorithmAttributes::ec(key_ref, curve))?;
        let public_key = self.generate(key_ref, Some(curve))?;
        info!(%key_ref, "EC key generated");
        Ok(public_key)
    }

    /// Import a private key into `key_ref`
    ///
    /// Firmware below 4.0.0 takes RSA keys in CRT form with the modulus.
    pub fn put_key(&mut self, key_ref: KeyRef, key: &PrivateKeyValues) -> Result<()> {
        debug!(%key_ref, "Importing a private key");
        let use_crt = self.version.is_less_than(4, 0, 0);
        let attributes = key.attributes(key_ref, use_crt)?;

        if self
            .extended_capabilities()
            .supports(ExtendedCapabilityFlags::ALGORITHM_ATTRIBUTES_CHANGEABLE)
        {
            self.set_algorithm_attributes(key_ref, &attributes)?;
        } else if !matches!(attributes, AlgorithmAttributes::Rsa { n_len: 2048, .. }) {
            return Err(Error::unsupported("This device only supports RSA 2048 keys"));
        }

        let template = PrivateKeyTemplate::new(key_ref, key, use_crt)?;
        trace!(?template, "Sending private key template");
        self.send(&Command::new_with_data(
            0x00,
            INS_PUT_DATA_ODD,
            0x3F,
            0xFF,
            template.to_bytes().to_vec(),
        ))?;
        info!(%key_ref, "Private key imported");
        Ok(())
    }

    /// Public key of `key_ref`
    pub fn get_public_key(&mut self, key_ref: KeyRef) -> Result<PublicKeyValues> {
        debug!(%key_ref, "Getting public key");
        let response = self.send(&Command::new_with_data(
            0x00,
            INS_GENERATE_ASYM,
            0x81,
            0x00,
            key_ref.crt(),
        ))?;
        let curve = match self
            .get_application_related_data()?
            .algorithm_attributes(key_ref)
        {
            Some(AlgorithmAttributes::Ec { curve, .. }) => Some(*curve),
            _ => None,
        };
        Self::parse_public_key(&response, curve)
    }

    /// Delete the key in `key_ref` by switching its algorithm twice
    ///
    /// # Errors
    /// [`Error::Unsupported`] on firmware below 4.0.0, which can only
    /// overwrite a key by importing another one.
    pub fn delete_key(&mut self, key_ref: KeyRef) -> Result<()> {
        if self.version.is_less_than(4, 0, 0) {
            return Err(Error::unsupported(
                "Deleting keys requires firmware 4.0.0 or later",
            ));
        }
        debug!(%key_ref, "Deleting private key");
        // PUT DATA directly: RSA 4096 need not be listed for the slot
        self.put_data(
            key_ref.algorithm_attributes(),
            AlgorithmAttributes::rsa(4096, RsaImportFormat::Standard).to_bytes(),
        )?;
        self.set_algorithm_attributes(
            key_ref,
            &AlgorithmAttributes::rsa(2048, RsaImportFormat::Standard),
        )?;
        info!(%key_ref, "Private key deleted");
        Ok(())
    }

    fn algorithm_id(&mut self, key_ref: KeyRef) -> Result<Option<u8>> {
        Ok(self
            .get_application_related_data()?
            .algorithm_attributes(key_ref)
            .map(AlgorithmAttributes::algorithm_id))
    }

    /// Sign `payload` with the signature key
    ///
    /// ECDSA signatures are returned DER encoded.
    pub fn sign(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let algorithm_id = self.algorithm_id(KeyRef::Sig)?;
        debug!(?algorithm_id, "Signing a message");
        let response = self.send(&Command::new_with_data(
            0x00,
            INS_PSO,
            0x9E,
            0x9A,
            Bytes::copy_from_slice(payload),
        ))?;
        info!("Message signed");
        if algorithm_id == Some(ALGORITHM_ECDSA) {
            return format_dss_signature(&response);
        }
        Ok(response.to_vec())
    }

    /// Decrypt an RSA cryptogram with the decryption key
    pub fn decrypt(&mut self, payload: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        debug!("Decrypting a value");
        let mut data = Vec::with_capacity(payload.len() + 1);
        data.push(0x00);
        data.extend_from_slice(payload);
        let response = self.send(&Command::new_with_data(0x00, INS_PSO, 0x80, 0x86, data))?;
        info!("Value decrypted");
        Ok(Zeroizing::new(response.to_vec()))
    }

    /// ECDH with the decryption key and `peer`
    pub fn decrypt_with_peer(&mut self, peer: &PublicKeyValues) -> Result<Zeroizing<Vec<u8>>> {
        let point = peer
            .agreement_bytes()
            .ok_or(Error::InvalidData("Peer key must be an elliptic curve key"))?;
        let mut public_key = Vec::new();
        write_tlv(&mut public_key, 0x86, point);
        let mut cipher_do = Vec::new();
        write_tlv(&mut cipher_do, TAG_PUBLIC_KEY, &public_key);
        let mut data = Vec::new();
        write_tlv(&mut data, 0xA6, &cipher_do);

        let response = self.send(&Command::new_with_data(0x00, INS_PSO, 0x80, 0x86, data))?;
        info!("ECDH key agreement performed");
        Ok(Zeroizing::new(response.to_vec()))
    }

    /// Sign `payload` with the authentication key
    pub fn authenticate(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let algorithm_id = self.algorithm_id(KeyRef::Aut)?;
        debug!(?algorithm_id, "Authenticating a message");
        let response = self.send(&Command::new_with_data(
            0x00,
            INS_INTERNAL_AUTHENTICATE,
            0x00,
            0x00,
            Bytes::copy_from_slice(payload),
        ))?;
        info!("Message authenticated");
        if algorithm_id == Some(ALGORITHM_ECDSA) {
            return format_dss_signature(&response);
        }
        Ok(response.to_vec())
    }
}

impl<E: Executor> ApplicationSession for OpenPgpSession<E> {
    fn version(&self) -> Version {
        self.version
    }

    fn close(&mut self) -> keyport_apdu_core::Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state.advance(SessionState::Closed);
        debug!("Closing OpenPGP session");
        self.executor.close()
    }
}

/// Unsigned big-endian integer as DER INTEGER content
fn der_integer(value: &[u8]) -> Vec<u8> {
    let start = value
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(value.len().saturating_sub(1));
    let trimmed = &value[start..];
    match trimmed.first() {
        Some(first) if first & 0x80 != 0 => [&[0x00][..], trimmed].concat(),
        Some(_) => trimmed.to_vec(),
        None => vec![0x00],
    }
}

/// Convert a raw `r || s` signature to a DER `SEQUENCE { r, s }`
fn format_dss_signature(response: &[u8]) -> Result<Vec<u8>> {
    let (r, s) = response.split_at(response.len() / 2);
    let integer = |value: &[u8]| -> Result<Tlv> {
        Ok(Tlv::new(tlv::tag(0x02)?, Value::Primitive(der_integer(value)))?)
    };
    let sequence = Tlv::new(
        tlv::tag(0x30)?,
        Value::Constructed(vec![integer(r)?, integer(s)?]),
    )?;
    Ok(sequence.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{ALGORITHM_ECDH, ALGORITHM_EDDSA, EcImportFormat};
    use crate::keys::{EcPrivateKey, RsaPrivateKey};
    use crate::simulator::{ADMIN_PIN, OpenPgpCard, SERIAL_AID, USER_PIN};
    use hex_literal::hex;
    use keyport_apdu_core::CardExecutor;
    use keyport_apdu_core::transport::mock::MockTransport;
    use std::sync::{Arc, Mutex};

    type Session = OpenPgpSession<CardExecutor<MockTransport>>;

    fn new_card(version: [u8; 3]) -> Arc<Mutex<OpenPgpCard>> {
        Arc::new(Mutex::new(OpenPgpCard::new(version)))
    }

    fn open(card: &Arc<Mutex<OpenPgpCard>>) -> Session {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        OpenPgpSession::new(CardExecutor::new(OpenPgpCard::transport(card.clone()))).unwrap()
    }

    fn sent(session: &mut Session) -> Vec<Vec<u8>> {
        session
            .executor()
            .transport()
            .commands
            .iter()
            .map(|frame| frame.to_vec())
            .collect()
    }

    fn algorithm_information(entries: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (tag, value) in entries {
            write_tlv(&mut body, *tag, value);
        }
        let mut out = Vec::new();
        write_tlv(&mut out, data_object::ALGORITHM_INFORMATION, &body);
        out
    }

    #[test]
    fn test_open() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);

        assert_eq!(session.version(), Version::new(5, 4, 3));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.aid(), &SERIAL_AID);
        assert_eq!(session.application_related_data().serial(), Some(0x01020304));

        let frames = sent(&mut session);
        assert_eq!(frames[0], hex!("00A4040006D27600012401"));
        assert_eq!(frames[1], hex!("00F10000"));
        assert_eq!(frames[2], hex!("00CA006E"));
        assert_eq!(
            session.executor().processor().config().max_apdu_size,
            keyport_apdu_core::MaxApduSize::YK4_3
        );
    }

    #[test]
    fn test_open_activates_terminated_applet() {
        let card = new_card([0x05, 0x02, 0x07]);
        card.lock().unwrap().active = false;
        let mut session = open(&card);

        let frames = sent(&mut session);
        assert_eq!(frames[1], hex!("00440000"));
        assert_eq!(frames[2], hex!("00A4040006D27600012401"));
        assert!(card.lock().unwrap().active);
    }

    #[test]
    fn test_open_extended_from_4_0_0() {
        for (version, format) in [
            ([0x03, 0x04, 0x00], ApduFormat::Short),
            ([0x04, 0x03, 0x05], ApduFormat::Extended),
        ] {
            let card = new_card(version);
            let transport = OpenPgpCard::transport(card.clone()).with_extended(true);
            let mut session = OpenPgpSession::new(CardExecutor::new(transport)).unwrap();
            assert_eq!(session.executor().processor().format(), format);
        }
    }

    #[test]
    fn test_verify_pins() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);

        session.verify_user_pin(USER_PIN, false).unwrap();
        session.verify_user_pin(USER_PIN, true).unwrap();
        session.verify_admin_pin(ADMIN_PIN).unwrap();

        let err = session.verify_user_pin("000000", true).unwrap_err();
        assert!(matches!(err, Error::WrongPin { remaining: 2 }));
        let err = session.verify_admin_pin("00000000").unwrap_err();
        assert!(matches!(err, Error::WrongPin { remaining: 2 }));

        let frames = sent(&mut session);
        assert!(frames.contains(&hex!("0020008106313233343536").to_vec()));
        assert!(frames.contains(&hex!("0020008206313233343536").to_vec()));
    }

    #[test]
    fn test_pin_status_and_attempts() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();
        session.set_pin_attempts(5, 0, 4).unwrap();

        let status = session.get_pin_status().unwrap();
        assert_eq!(status.attempts_user, 5);
        assert_eq!(status.attempts_reset, 0);
        assert_eq!(status.attempts_admin, 4);

        session.set_signature_pin_policy(PinPolicy::Once).unwrap();
        assert_eq!(session.get_pin_status().unwrap().pin_policy_user, PinPolicy::Once);
    }

    #[test]
    fn test_set_pin_attempts_gated() {
        let card = new_card([0x04, 0x03, 0x00]);
        let mut session = open(&card);
        let err = session.set_pin_attempts(3, 3, 3).unwrap_err();
        assert!(matches!(
            err,
            Error::Core(keyport_apdu_core::Error::Unsupported(_))
        ));
        // nothing sent beyond session setup
        assert_eq!(sent(&mut session).len(), 3);
    }

    #[test]
    fn test_reset() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();
        session.set_pin_attempts(2, 0, 2).unwrap();

        session.reset().unwrap();

        let frames = sent(&mut session);
        let blocking = frames
            .iter()
            .filter(|frame| frame[1] == INS_VERIFY && frame[5..] == INVALID_PIN)
            .count();
        assert_eq!(blocking, 4);
        assert_eq!(frames[frames.len() - 2], hex!("00E60000"));
        assert_eq!(frames[frames.len() - 1], hex!("00440000"));

        // factory state again
        assert_eq!(session.get_pin_status().unwrap().attempts_user, 3);
    }

    #[test]
    fn test_reset_stops_on_transport_failure() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let card = new_card([0x05, 0x04, 0x03]);
        let transport = OpenPgpCard::transport(card.clone()).with_failure(|frame| {
            frame.len() > 5 && frame[1] == INS_VERIFY && frame[5..] == INVALID_PIN
        });
        let mut session = OpenPgpSession::new(CardExecutor::new(transport)).unwrap();

        let err = session.reset().unwrap_err();
        assert!(matches!(err, Error::Core(keyport_apdu_core::Error::Transport(_))));

        let frames = sent(&mut session);
        assert!(!frames.iter().any(|frame| frame[1] == INS_TERMINATE));
        assert!(!frames.iter().any(|frame| frame[1] == INS_ACTIVATE));
        assert_eq!(card.lock().unwrap().attempts, [3, 3, 3]);
    }

    #[test]
    fn test_uif() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();

        assert_eq!(session.get_uif(KeyRef::Sig).unwrap(), Uif::Off);
        session.set_uif(KeyRef::Sig, Uif::Fixed).unwrap();
        assert_eq!(session.get_uif(KeyRef::Sig).unwrap(), Uif::Fixed);
        assert!(matches!(
            session.set_uif(KeyRef::Sig, Uif::Off),
            Err(Error::InvalidState(_))
        ));

        card.lock().unwrap().uif_unsupported = true;
        assert_eq!(session.get_uif(KeyRef::Aut).unwrap(), Uif::Off);
    }

    #[test]
    fn test_uif_feature_gates() {
        let card = new_card([0x05, 0x02, 0x00]);
        let mut session = open(&card);
        assert!(session.set_uif(KeyRef::Att, Uif::On).is_err());
        assert!(session.set_uif(KeyRef::Dec, Uif::Cached).is_err());

        let card = new_card([0x04, 0x01, 0x00]);
        let mut session = open(&card);
        assert!(session.set_uif(KeyRef::Sig, Uif::On).is_err());
    }

    #[test]
    fn test_algorithm_information_legacy() {
        let card = new_card([0x04, 0x03, 0x07]);
        let mut session = open(&card);
        let info = session.get_algorithm_information().unwrap();
        assert_eq!(info[&KeyRef::Sig].len(), 3);
        assert!(!info.contains_key(&KeyRef::Att));
    }

    #[test]
    fn test_algorithm_information_requires_capability() {
        let card = new_card([0x05, 0x04, 0x03]);
        card.lock().unwrap().extended_capabilities[0] = 0x00;
        let mut session = open(&card);
        assert!(matches!(
            session.get_algorithm_information(),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_algorithm_information_corrected() {
        let card = new_card([0x05, 0x04, 0x03]);
        let eddsa_x25519 = hex!("16 2B060104019755010501").to_vec();
        let ed25519 = hex!("16 2B06010401DA470F01").to_vec();
        card.lock().unwrap().algorithm_information = Some(algorithm_information(&[
            (0xC1, hex!("010800001100").to_vec()),
            (0xC1, ed25519.clone()),
            (0xC1, eddsa_x25519.clone()),
            (0xC2, ed25519.clone()),
            (0xC2, eddsa_x25519),
            (0xDA, ed25519),
            (0xDA, hex!("132A8648CE3D030107").to_vec()),
        ]));
        let mut session = open(&card);

        let info = session.get_algorithm_information().unwrap();
        assert_eq!(info[&KeyRef::Sig].len(), 2);
        assert_eq!(
            info[&KeyRef::Dec],
            vec![AlgorithmAttributes::Ec {
                algorithm_id: ALGORITHM_ECDH,
                curve: OpenPgpCurve::X25519,
                import_format: EcImportFormat::Standard,
            }]
        );
        assert_eq!(info[&KeyRef::Att].len(), 1);
    }

    #[test]
    fn test_algorithm_information_uncorrected_from_5_6_1() {
        let card = new_card([0x05, 0x07, 0x00]);
        card.lock().unwrap().algorithm_information = Some(algorithm_information(&[(
            0xC2,
            hex!("16 2B06010401DA470F01").to_vec(),
        )]));
        let mut session = open(&card);

        let info = session.get_algorithm_information().unwrap();
        assert_eq!(info[&KeyRef::Dec][0].algorithm_id(), ALGORITHM_EDDSA);
    }

    #[test]
    fn test_algorithm_information_bad_outer_length() {
        let card = new_card([0x05, 0x04, 0x03]);
        // outer length claims two bytes more than sent
        card.lock().unwrap().algorithm_information = Some(hex!("FA0A C106 010800001100").to_vec());
        let mut session = open(&card);

        let info = session.get_algorithm_information().unwrap();
        assert_eq!(
            info[&KeyRef::Sig],
            vec![AlgorithmAttributes::rsa(2048, RsaImportFormat::Standard)]
        );
    }

    #[test]
    fn test_generate_ec_key() {
        let card = new_card([0x05, 0x04, 0x03]);
        card.lock().unwrap().algorithm_information = Some(algorithm_information(&[
            (0xC1, hex!("132A8648CE3D030107").to_vec()),
            (0xC3, hex!("16 2B06010401DA470F01").to_vec()),
        ]));
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();

        let key = session
            .generate_ec_key(KeyRef::Sig, OpenPgpCurve::Secp256r1)
            .unwrap();
        let PublicKeyValues::Ec {
            curve,
            encoded_point,
        } = key
        else {
            panic!("expected an EC key");
        };
        assert_eq!(curve, OpenPgpCurve::Secp256r1);
        assert_eq!(encoded_point.len(), 65);
        assert_eq!(
            card.lock().unwrap().objects[&0xC1],
            hex!("132A8648CE3D030107").to_vec()
        );

        let key = session
            .generate_ec_key(KeyRef::Aut, OpenPgpCurve::Ed25519)
            .unwrap();
        assert!(matches!(key, PublicKeyValues::Cv25519 { .. }));
        assert_eq!(session.get_public_key(KeyRef::Aut).unwrap(), key);

        // not listed for DEC
        assert!(matches!(
            session.generate_ec_key(KeyRef::Dec, OpenPgpCurve::Secp256r1),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_generate_ec_key_gated() {
        let card = new_card([0x05, 0x01, 0x02]);
        let mut session = open(&card);
        assert!(
            session
                .generate_ec_key(KeyRef::Sig, OpenPgpCurve::Secp256r1)
                .is_err()
        );
    }

    #[test]
    fn test_generate_rsa_key() {
        let card = new_card([0x04, 0x03, 0x07]);
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();

        let key = session.generate_rsa_key(KeyRef::Dec, 3072).unwrap();
        let PublicKeyValues::Rsa { modulus, exponent } = &key else {
            panic!("expected an RSA key");
        };
        assert_eq!(modulus.len(), 384);
        assert_eq!(exponent, &hex!("010001"));
        assert_eq!(session.get_public_key(KeyRef::Dec).unwrap(), key);
    }

    #[test]
    fn test_generate_rsa_key_gap() {
        let card = new_card([0x04, 0x03, 0x04]);
        let mut session = open(&card);
        assert!(matches!(
            session.generate_rsa_key(KeyRef::Sig, 2048),
            Err(Error::Core(keyport_apdu_core::Error::Unsupported(_)))
        ));
    }

    #[test]
    fn test_put_rsa_key_chained() {
        let card = new_card([0x05, 0x04, 0x03]);
        card.lock().unwrap().algorithm_information = Some(algorithm_information(&[(
            0xC1,
            hex!("010800001100").to_vec(),
        )]));
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();

        let key = PrivateKeyValues::Rsa(RsaPrivateKey {
            modulus: vec![0xC5; 256],
            public_exponent: hex!("010001").to_vec(),
            prime_p: vec![0xE1; 128],
            prime_q: vec![0xE3; 128],
            prime_exponent_p: None,
            prime_exponent_q: None,
            crt_coefficient: None,
        });
        session.put_key(KeyRef::Sig, &key).unwrap();

        let imported = card.lock().unwrap().imported.clone();
        assert_eq!(imported.len(), 1);
        assert_eq!(
            imported[0],
            PrivateKeyTemplate::new(KeyRef::Sig, &key, false)
                .unwrap()
                .to_bytes()
                .to_vec()
        );
        let frames = sent(&mut session);
        assert!(frames.iter().any(|frame| frame[..4] == hex!("10DB3FFF")));
    }

    #[test]
    fn test_put_key_crt_on_neo() {
        let card = new_card([0x03, 0x04, 0x03]);
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();

        let key = PrivateKeyValues::Rsa(RsaPrivateKey {
            modulus: vec![0xC5; 256],
            public_exponent: hex!("010001").to_vec(),
            prime_p: vec![0xE1; 128],
            prime_q: vec![0xE3; 128],
            prime_exponent_p: Some(vec![0x11; 128]),
            prime_exponent_q: Some(vec![0x22; 128]),
            crt_coefficient: Some(vec![0x33; 128]),
        });
        session.put_key(KeyRef::Dec, &key).unwrap();

        let imported = card.lock().unwrap().imported.clone();
        assert_eq!(
            imported[0],
            PrivateKeyTemplate::new(KeyRef::Dec, &key, true)
                .unwrap()
                .to_bytes()
                .to_vec()
        );
        assert_eq!(
            card.lock().unwrap().objects[&0xC2],
            AlgorithmAttributes::rsa(2048, RsaImportFormat::CrtWithModulus).to_bytes()
        );
    }

    #[test]
    fn test_put_key_without_changeable_attributes() {
        let card = new_card([0x05, 0x04, 0x03]);
        card.lock().unwrap().extended_capabilities[0] = 0x20;
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();

        let key = PrivateKeyValues::Ec(EcPrivateKey {
            curve: OpenPgpCurve::Secp256r1,
            secret: vec![0x42; 32],
        });
        assert!(matches!(
            session.put_key(KeyRef::Sig, &key),
            Err(Error::Unsupported(_))
        ));
        assert!(card.lock().unwrap().imported.is_empty());
    }

    #[test]
    fn test_delete_key() {
        let card = new_card([0x05, 0x04, 0x03]);
        card.lock().unwrap().algorithm_information = Some(algorithm_information(&[(
            0xC3,
            hex!("010800001100").to_vec(),
        )]));
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();
        session.delete_key(KeyRef::Aut).unwrap();

        let frames = sent(&mut session);
        assert!(frames.contains(&hex!("00DA00C306 011000001100").to_vec()));
        assert!(frames.contains(&hex!("00DA00C306 010800001100").to_vec()));

        let card = new_card([0x03, 0x04, 0x03]);
        let mut session = open(&card);
        assert!(matches!(session.delete_key(KeyRef::Aut), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_generation_time_and_fingerprint() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);
        session.verify_admin_pin(ADMIN_PIN).unwrap();
        session.set_generation_time(KeyRef::Att, 0x6000_0000).unwrap();
        session.set_fingerprint(KeyRef::Dec, &[0xF0; 20]).unwrap();

        let card = card.lock().unwrap();
        assert_eq!(card.objects[&0xDD], hex!("60000000").to_vec());
        assert_eq!(card.objects[&0xC8], vec![0xF0; 20]);
    }

    #[test]
    fn test_challenge() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);
        assert_eq!(session.get_challenge(16).unwrap().as_ref(), &[0xC3; 16]);
        assert!(matches!(session.get_challenge(0x21), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_sign_formats_ecdsa() {
        let card = new_card([0x05, 0x04, 0x03]);
        card.lock()
            .unwrap()
            .objects
            .insert(0xC1, hex!("132A8648CE3D030107").to_vec());
        let mut session = open(&card);
        session.verify_user_pin(USER_PIN, false).unwrap();

        let signature = session.sign(&[0xAB; 32]).unwrap();
        // r = 01..20, s = 21..40
        assert_eq!(&signature[..4], &hex!("3044 0220"));
        assert_eq!(signature[4], 0x01);
        assert_eq!(&signature[36..38], &hex!("0220"));
        assert_eq!(session.get_signature_counter().unwrap(), 1);
    }

    #[test]
    fn test_authenticate_rsa_is_raw() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);
        session.verify_user_pin(USER_PIN, true).unwrap();
        let response = session.authenticate(&[0x01; 20]).unwrap();
        assert_eq!(response.len(), 64);
        assert_eq!(response[0], 0x81);
    }

    #[test]
    fn test_decrypt() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);
        session.verify_user_pin(USER_PIN, true).unwrap();

        assert_eq!(session.decrypt(&[0x99; 16]).unwrap().as_slice(), &[0xDD; 32]);
        let peer = PublicKeyValues::Cv25519 {
            curve: OpenPgpCurve::X25519,
            bytes: vec![0x09; 32],
        };
        session.decrypt_with_peer(&peer).unwrap();

        let frames = sent(&mut session);
        let ecdh = frames.last().unwrap();
        assert_eq!(&ecdh[..5], &hex!("002A808627"));
        assert_eq!(&ecdh[5..12], &hex!("A625 7F4922 8620"));

        let rsa = PublicKeyValues::Rsa {
            modulus: vec![1],
            exponent: vec![3],
        };
        assert!(session.decrypt_with_peer(&rsa).is_err());
    }

    #[test]
    fn test_closed_session() {
        let card = new_card([0x05, 0x04, 0x03]);
        let mut session = open(&card);
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.get_pin_status(), Err(Error::InvalidState(_))));
        session.close().unwrap();
    }

    #[test]
    fn test_feature_table() {
        assert!(!FEATURE_PIN_ATTEMPTS.is_supported_by(Version::new(4, 3, 0)));
        assert!(FEATURE_PIN_ATTEMPTS.is_supported_by(Version::new(4, 3, 1)));
        assert!(FEATURE_PIN_ATTEMPTS.is_supported_by(Version::new(5, 0, 0)));
        assert!(FEATURE_PIN_ATTEMPTS.is_supported_by(Version::new(1, 0, 7)));
        assert!(!FEATURE_PIN_ATTEMPTS.is_supported_by(Version::new(1, 0, 6)));

        assert!(FEATURE_RSA_GENERATION.is_supported_by(Version::new(4, 2, 5)));
        assert!(!FEATURE_RSA_GENERATION.is_supported_by(Version::new(4, 2, 6)));
        assert!(!FEATURE_RSA_GENERATION.is_supported_by(Version::new(4, 3, 4)));
        assert!(FEATURE_RSA_GENERATION.is_supported_by(Version::new(4, 3, 5)));

        assert!(FEATURE_RESET.is_supported_by(Version::new(1, 0, 6)));
        assert!(!FEATURE_CACHED.is_supported_by(Version::new(5, 2, 0)));
    }

    #[test]
    fn test_der_integer() {
        assert_eq!(der_integer(&[0x00, 0x00, 0x7F]), vec![0x7F]);
        assert_eq!(der_integer(&[0x00, 0x80]), vec![0x00, 0x80]);
        assert_eq!(der_integer(&[0x00, 0x00]), vec![0x00]);
    }
}
