//! SCP03 channel establishment
//!
//! INITIALIZE UPDATE exchanges challenges and proves the card knows the
//! static keys; EXTERNAL AUTHENTICATE proves the same for the host and
//! starts secure messaging. On success the executor's processor is replaced
//! by an [`ScpProcessor`].

use keyport_apdu_core::prelude::*;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::crypto::{
    Challenge, Cryptogram, DERIVE_CARD_CRYPTOGRAM, DERIVE_HOST_CRYPTOGRAM, derive_cryptogram,
};
use crate::keys::{KeyRef, StaticKeys};
use crate::processor::ScpProcessor;
use crate::state::ScpState;

/// CLA of GlobalPlatform proprietary commands
pub const CLA_GP: u8 = 0x80;
/// INITIALIZE UPDATE instruction
pub const INS_INITIALIZE_UPDATE: u8 = 0x50;
/// EXTERNAL AUTHENTICATE instruction
pub const INS_EXTERNAL_AUTHENTICATE: u8 = 0x82;
/// Security level requesting C-MAC, C-DECRYPTION, R-MAC and R-ENCRYPTION
pub const SECURITY_LEVEL_FULL: u8 = 0x33;
/// SCP identifier reported in the key information
pub const SCP03_ID: u8 = 0x03;

/// Parsed INITIALIZE UPDATE response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeUpdateResponse {
    /// Key diversification data
    pub diversification_data: [u8; 10],
    /// Key version, SCP identifier and `i` parameter
    pub key_information: [u8; 3],
    /// Card challenge
    pub card_challenge: Challenge,
    /// Card cryptogram
    pub card_cryptogram: Cryptogram,
}

impl InitializeUpdateResponse {
    /// Minimum length of the response payload
    pub const MIN_LEN: usize = 29;

    /// Parse the response payload
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_LEN {
            return Err(Error::protocol(format!(
                "INITIALIZE UPDATE response too short: {} bytes",
                data.len()
            )));
        }

        let mut response = Self {
            diversification_data: [0; 10],
            key_information: [0; 3],
            card_challenge: [0; 8],
            card_cryptogram: [0; 8],
        };
        response.diversification_data.copy_from_slice(&data[..10]);
        response.key_information.copy_from_slice(&data[10..13]);
        response.card_challenge.copy_from_slice(&data[13..21]);
        response.card_cryptogram.copy_from_slice(&data[21..29]);

        if response.key_information[1] != SCP03_ID {
            return Err(Error::unsupported(format!(
                "Card answered with SCP{:02x}, expected SCP03",
                response.key_information[1]
            )));
        }
        Ok(response)
    }
}

/// SCP03 handshake
#[derive(Debug, Clone, Copy)]
pub struct Scp03;

impl Scp03 {
    /// Authenticate to the card and install an SCP03 processor on the executor
    ///
    /// # Errors
    /// [`Error::Security`] when the card cryptogram does not verify; the
    /// executor keeps its previous processor in that case.
    pub fn open<E: Executor + ?Sized>(
        executor: &mut E,
        key_ref: KeyRef,
        static_keys: &StaticKeys,
    ) -> Result<()> {
        let mut host_challenge = [0u8; 8];
        rand::rng().fill_bytes(&mut host_challenge);
        Self::open_with_challenge(executor, key_ref, static_keys, host_challenge)
    }

    /// [`Scp03::open`] with a caller-chosen host challenge
    pub fn open_with_challenge<E: Executor + ?Sized>(
        executor: &mut E,
        key_ref: KeyRef,
        static_keys: &StaticKeys,
        host_challenge: Challenge,
    ) -> Result<()> {
        debug!(kid = key_ref.kid, kvn = key_ref.kvn, "Opening SCP03 channel");

        let command = Command::new_with_data(
            CLA_GP,
            INS_INITIALIZE_UPDATE,
            key_ref.kvn,
            0x00,
            host_challenge.to_vec(),
        );
        let payload = executor
            .send_and_receive(&command)
            .context("INITIALIZE UPDATE failed")?;
        let init = InitializeUpdateResponse::parse(&payload)?;
        debug!(
            diversification = %hex::encode(init.diversification_data),
            key_information = %hex::encode(init.key_information),
            "Received INITIALIZE UPDATE response"
        );

        let context = [&host_challenge[..], &init.card_challenge[..]].concat();
        let session_keys = static_keys.derive(&context);

        let expected = derive_cryptogram(&session_keys.smac, DERIVE_CARD_CRYPTOGRAM, &context);
        if !bool::from(expected.ct_eq(&init.card_cryptogram)) {
            warn!("Card cryptogram verification failed");
            return Err(Error::security("Wrong SCP03 key set"));
        }

        let host_cryptogram =
            derive_cryptogram(&session_keys.smac, DERIVE_HOST_CRYPTOGRAM, &context);
        let config = *executor.processor().config();
        let mut processor = ScpProcessor::new(ScpState::new(session_keys), config);

        let authenticate = Command::new_with_data(
            CLA_GP,
            INS_EXTERNAL_AUTHENTICATE,
            SECURITY_LEVEL_FULL,
            0x00,
            host_cryptogram.to_vec(),
        );
        processor
            .send_secure(&authenticate, false, executor.card_transport())?
            .into_result()
            .context("EXTERNAL AUTHENTICATE failed")?;

        executor.set_processor(Box::new(processor));
        info!(kvn = init.key_information[0], "SCP03 channel established");
        Ok(())
    }
}
