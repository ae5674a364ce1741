//! Chaining state of an SCP03 channel
//!
//! The encryption counter and MAC chaining value advance with every command.
//! Host and card must stay in lockstep, so a round only commits its
//! successor state once the card's response has been verified; a failed
//! round leaves the channel without state and every later round is refused.

use keyport_apdu_core::{Error, Result};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{
    AesKey, BLOCK_SIZE, Block, Scp03Mac, aes_cbc_decrypt, aes_cbc_encrypt, aes_cmac,
    aes_ecb_encrypt,
};
use crate::keys::SessionKeys;

/// Per-round chaining values of an SCP03 channel
///
/// Wiped when dropped, including when a failed round discards it.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChannelState {
    /// Counter used to derive the command encryption IV, starting at 1
    pub enc_counter: u32,
    /// C-MAC chaining value, all zero before the first command
    pub mac_chain: Block,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            enc_counter: 1,
            mac_chain: [0; BLOCK_SIZE],
        }
    }
}

impl ChannelState {
    fn iv(key: &AesKey, marker: u8, counter: u32) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = marker;
        block[12..].copy_from_slice(&counter.to_be_bytes());
        aes_ecb_encrypt(key, &block)
    }

    /// Encrypt command data and advance the counter
    pub fn encrypt(&mut self, keys: &SessionKeys, data: &[u8]) -> Result<Vec<u8>> {
        let iv = Self::iv(&keys.senc, 0x00, self.enc_counter);
        self.enc_counter = self
            .enc_counter
            .checked_add(1)
            .ok_or(Error::security("Encryption counter exhausted"))?;
        Ok(aes_cbc_encrypt(&keys.senc, &iv, data))
    }

    /// Compute the C-MAC of a framed command and advance the MAC chain
    pub fn mac(&mut self, keys: &SessionKeys, data: &[u8]) -> Scp03Mac {
        self.mac_chain = aes_cmac(&keys.smac, &[&self.mac_chain, data]);

        let mut tag = [0u8; 8];
        tag.copy_from_slice(&self.mac_chain[..8]);
        tag
    }

    /// Verify and strip the R-MAC of a response payload
    ///
    /// # Errors
    /// [`Error::Security`] when the payload is shorter than a MAC or the MAC
    /// does not match.
    pub fn unmac<'a>(&self, keys: &SessionKeys, data: &'a [u8], sw: u16) -> Result<&'a [u8]> {
        if data.len() < 8 {
            return Err(Error::security("Response too short to carry a MAC"));
        }
        let (payload, received) = data.split_at(data.len() - 8);
        let expected = aes_cmac(&keys.srmac, &[&self.mac_chain, payload, &sw.to_be_bytes()]);

        if bool::from(expected[..8].ct_eq(received)) {
            Ok(payload)
        } else {
            warn!("Response MAC verification failed");
            Err(Error::security("Wrong MAC"))
        }
    }

    /// Decrypt a response payload with the IV of the preceding command
    pub fn decrypt(&self, keys: &SessionKeys, data: &[u8]) -> Result<Vec<u8>> {
        let iv = Self::iv(&keys.senc, 0x80, self.enc_counter.wrapping_sub(1));
        aes_cbc_decrypt(&keys.senc, &iv, data)
    }
}

/// Session keys plus the chaining state of one SCP03 channel
#[derive(Debug)]
pub struct ScpState {
    keys: SessionKeys,
    channel: Option<ChannelState>,
}

impl ScpState {
    /// Create the state of a freshly authenticated channel
    pub fn new(keys: SessionKeys) -> Self {
        Self::with_channel(keys, ChannelState::default())
    }

    /// Create a state resuming from the given chaining values
    pub const fn with_channel(keys: SessionKeys, channel: ChannelState) -> Self {
        Self {
            keys,
            channel: Some(channel),
        }
    }

    /// Session keys of the channel
    pub const fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Current chaining values, `None` once the channel is desynchronized or closed
    pub const fn channel(&self) -> Option<&ChannelState> {
        self.channel.as_ref()
    }

    /// Whether further rounds can be run
    pub const fn is_synchronized(&self) -> bool {
        self.channel.is_some()
    }

    /// Run one round against the chaining state
    ///
    /// The state is taken out for the duration of `round` and only restored
    /// when it returns `Ok`.
    pub fn round<T, F>(&mut self, round: F) -> Result<T>
    where
        F: FnOnce(&SessionKeys, &mut ChannelState) -> Result<T>,
    {
        let mut channel = self
            .channel
            .take()
            .ok_or(Error::security("Secure channel is not synchronized"))?;

        match round(&self.keys, &mut channel) {
            Ok(value) => {
                self.channel = Some(channel);
                Ok(value)
            }
            Err(err) => {
                drop(channel);
                warn!(error = %err, "Secure channel desynchronized");
                Err(err)
            }
        }
    }

    /// Wipe keys and chaining state; safe to call more than once
    pub fn close(&mut self) {
        self.channel = None;
        self.keys.zeroize();
        debug!("Secure channel state destroyed");
    }
}
