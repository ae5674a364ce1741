//! Card side of an SCP03 channel for tests

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use keyport_apdu_core::command::{CLA_CHAINING, CLA_SECURE_MESSAGING, Command};
use keyport_apdu_core::transport::mock::MockTransport;

use crate::crypto::{
    Block, Challenge, DERIVE_CARD_CRYPTOGRAM, DERIVE_HOST_CRYPTOGRAM, aes_cbc_decrypt,
    aes_cbc_encrypt, aes_cmac, aes_ecb_encrypt, derive_cryptogram,
};
use crate::keys::{SessionKeys, StaticKeys};

pub(crate) const CARD_CHALLENGE: Challenge = [0xC0, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7];

/// Card emulation that verifies C-MACs, decrypts commands and echoes the
/// plaintext back under R-ENC and R-MAC
#[derive(Debug)]
pub(crate) struct CardSimulator {
    keys: Option<SessionKeys>,
    static_keys: Option<StaticKeys>,
    context: Vec<u8>,
    chain: Block,
    counter: u32,
    pending: Vec<u8>,
    first_response: Option<Bytes>,
    pub(crate) status: u16,
    pub(crate) corrupt_cryptogram: bool,
    pub(crate) flip_response_bit: Option<usize>,
    pub(crate) replay_first_response: bool,
}

impl CardSimulator {
    /// Card with an already established channel
    pub(crate) fn new(keys: SessionKeys) -> Self {
        let mut card = Self::with_static_keys(StaticKeys::default_keys());
        card.keys = Some(keys);
        card.static_keys = None;
        card
    }

    /// Card waiting for INITIALIZE UPDATE
    pub(crate) fn with_static_keys(static_keys: StaticKeys) -> Self {
        Self {
            keys: None,
            static_keys: Some(static_keys),
            context: Vec::new(),
            chain: [0; 16],
            counter: 1,
            pending: Vec::new(),
            first_response: None,
            status: 0x9000,
            corrupt_cryptogram: false,
            flip_response_bit: None,
            replay_first_response: false,
        }
    }

    pub(crate) fn transport(card: Arc<Mutex<Self>>) -> MockTransport {
        MockTransport::with_handler(move |frame| card.lock().unwrap().handle(frame))
    }

    fn sw(status: u16) -> Bytes {
        Bytes::copy_from_slice(&status.to_be_bytes())
    }

    fn handle(&mut self, frame: &[u8]) -> Bytes {
        let command = Command::from_bytes(frame).unwrap();
        self.pending.extend_from_slice(command.data());
        if command.class() & CLA_CHAINING != 0 {
            return Self::sw(0x9000);
        }
        let data = std::mem::take(&mut self.pending);

        if command.instruction() == 0x50 {
            return self.initialize_update(command.p1(), &data);
        }
        if command.class() & CLA_SECURE_MESSAGING == 0 {
            return Self::sw(0x6E00);
        }

        let response = self.secure(&command, &data);
        if self.replay_first_response {
            if let Some(first) = &self.first_response {
                return first.clone();
            }
        }
        if self.first_response.is_none() && response.len() > 2 {
            self.first_response = Some(response.clone());
        }
        response
    }

    fn initialize_update(&mut self, kvn: u8, host_challenge: &[u8]) -> Bytes {
        let Some(static_keys) = &self.static_keys else {
            return Self::sw(0x6985);
        };

        self.context = [host_challenge, &CARD_CHALLENGE[..]].concat();
        let keys = static_keys.derive(&self.context);
        let mut cryptogram = derive_cryptogram(&keys.smac, DERIVE_CARD_CRYPTOGRAM, &self.context);
        if self.corrupt_cryptogram {
            cryptogram[0] ^= 0x01;
        }
        self.keys = Some(keys);
        self.chain = [0; 16];
        self.counter = 1;

        let mut out = vec![0xA5; 10];
        out.extend_from_slice(&[kvn.max(1), 0x03, 0x00]);
        out.extend_from_slice(&CARD_CHALLENGE);
        out.extend_from_slice(&cryptogram);
        out.extend_from_slice(&[0x90, 0x00]);
        Bytes::from(out)
    }

    fn secure(&mut self, command: &Command, data: &[u8]) -> Bytes {
        let Some(keys) = &self.keys else {
            return Self::sw(0x6985);
        };
        if data.len() < 8 {
            return Self::sw(0x6700);
        }
        let (body, mac) = data.split_at(data.len() - 8);

        let mut input = vec![
            command.class() & !CLA_CHAINING,
            command.instruction(),
            command.p1(),
            command.p2(),
        ];
        if data.len() <= 0xFF {
            input.push(data.len() as u8);
        } else {
            input.push(0x00);
            input.extend_from_slice(&(data.len() as u16).to_be_bytes());
        }
        input.extend_from_slice(body);

        self.chain = aes_cmac(&keys.smac, &[&self.chain, &input]);
        if &self.chain[..8] != mac {
            return Self::sw(0x6982);
        }

        if command.instruction() == 0x82 {
            let expected = derive_cryptogram(&keys.smac, DERIVE_HOST_CRYPTOGRAM, &self.context);
            return Self::sw(if body == expected { 0x9000 } else { 0x6300 });
        }

        let mut iv = [0u8; 16];
        iv[12..].copy_from_slice(&self.counter.to_be_bytes());
        let iv = aes_ecb_encrypt(&keys.senc, &iv);
        self.counter += 1;
        let plain = match aes_cbc_decrypt(&keys.senc, &iv, body) {
            Ok(plain) => plain,
            Err(_) => return Self::sw(0x6988),
        };

        if self.status != 0x9000 || plain.is_empty() {
            return Self::sw(self.status);
        }

        let mut iv = [0u8; 16];
        iv[0] = 0x80;
        iv[12..].copy_from_slice(&(self.counter - 1).to_be_bytes());
        let iv = aes_ecb_encrypt(&keys.senc, &iv);
        let mut out = aes_cbc_encrypt(&keys.senc, &iv, &plain);
        let rmac = aes_cmac(&keys.srmac, &[&self.chain, &out, &self.status.to_be_bytes()]);
        out.extend_from_slice(&rmac[..8]);

        if let Some(bit) = self.flip_response_bit {
            out[bit / 8] ^= 1 << (bit % 8);
        }
        out.extend_from_slice(&self.status.to_be_bytes());
        Bytes::from(out)
    }
}
