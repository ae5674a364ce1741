//! Card side of the OpenPGP application for tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use keyport_apdu_core::Bytes;
use keyport_apdu_core::command::{CLA_CHAINING, Command};
use keyport_apdu_core::transport::mock::MockTransport;

use crate::key_ref::{KeyRef, data_object};
use crate::session::OPENPGP_AID;
use crate::tlv::write_tlv;

pub(crate) const USER_PIN: &str = "123456";
pub(crate) const ADMIN_PIN: &str = "12345678";
pub(crate) const SERIAL_AID: [u8; 16] = [
    0xD2, 0x76, 0x00, 0x01, 0x24, 0x01, 0x03, 0x04, 0x00, 0x06, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00,
];
const RSA_2048: [u8; 6] = [0x01, 0x08, 0x00, 0x00, 0x11, 0x00];
const ALL_ATTEMPTS: u8 = 3;

/// OpenPGP applet emulation with PIN checks, data objects and key slots
#[derive(Debug)]
pub(crate) struct OpenPgpCard {
    pub(crate) version: [u8; 3],
    pub(crate) active: bool,
    pub(crate) objects: BTreeMap<u16, Vec<u8>>,
    pub(crate) extended_capabilities: [u8; 10],
    /// Raw GET DATA FA response; `None` answers 6A88
    pub(crate) algorithm_information: Option<Vec<u8>>,
    /// Answer 6A86 for UIF objects
    pub(crate) uif_unsupported: bool,
    pub(crate) attempts: [u8; 3],
    pub(crate) imported: Vec<Vec<u8>>,
    pub(crate) public_keys: BTreeMap<KeyRef, Vec<u8>>,
    pub(crate) signature_counter: u32,
    terminated: bool,
    user_verified: bool,
    admin_verified: bool,
    chain: Vec<u8>,
}

impl OpenPgpCard {
    /// Active card running `version` (BCD encoded)
    pub(crate) fn new(version: [u8; 3]) -> Self {
        let mut objects = BTreeMap::new();
        for key_ref in [KeyRef::Sig, KeyRef::Dec, KeyRef::Aut] {
            objects.insert(key_ref.algorithm_attributes(), RSA_2048.to_vec());
        }
        Self {
            version,
            active: true,
            objects,
            extended_capabilities: [0x7D, 0x00, 0x00, 0x20, 0x08, 0x00, 0x00, 0xFF, 0x00, 0x00],
            algorithm_information: None,
            uif_unsupported: false,
            attempts: [ALL_ATTEMPTS; 3],
            imported: Vec::new(),
            public_keys: BTreeMap::new(),
            signature_counter: 0,
            terminated: false,
            user_verified: false,
            admin_verified: false,
            chain: Vec::new(),
        }
    }

    pub(crate) fn transport(card: Arc<Mutex<Self>>) -> MockTransport {
        MockTransport::with_handler(move |frame| card.lock().unwrap().handle(frame))
    }

    fn sw(status: u16) -> Bytes {
        Bytes::copy_from_slice(&status.to_be_bytes())
    }

    fn ok(mut data: Vec<u8>) -> Bytes {
        data.extend_from_slice(&[0x90, 0x00]);
        Bytes::from(data)
    }

    fn handle(&mut self, frame: &[u8]) -> Bytes {
        let command = Command::from_bytes(frame).unwrap();
        if command.class() & CLA_CHAINING != 0 {
            self.chain.extend_from_slice(command.data());
            return Self::sw(0x9000);
        }
        let mut data = std::mem::take(&mut self.chain);
        data.extend_from_slice(command.data());

        if command.instruction() == 0xA4 {
            return match (data == OPENPGP_AID, self.active) {
                (true, true) => Self::sw(0x9000),
                (true, false) => Self::sw(0x6285),
                (false, _) => Self::sw(0x6A82),
            };
        }
        if command.instruction() == 0x44 {
            self.activate();
            return Self::sw(0x9000);
        }
        if !self.active || self.terminated {
            return Self::sw(0x6985);
        }

        let p1p2 = u16::from_be_bytes([command.p1(), command.p2()]);
        match command.instruction() {
            0xF1 => Self::ok(self.version.to_vec()),
            0xCA => self.get_data(p1p2),
            0xDA => self.put_data(p1p2, data),
            0x20 => self.verify(command.p2(), &data),
            0xF2 => self.admin(|card| {
                card.attempts.copy_from_slice(&data[..3]);
                Self::sw(0x9000)
            }),
            0xE6 => {
                if self.attempts[0] != 0 || self.attempts[2] != 0 {
                    return Self::sw(0x6985);
                }
                self.terminated = true;
                Self::sw(0x9000)
            }
            0x47 => self.generate(command.p1(), &data),
            0xDB => self.admin(|card| {
                card.imported.push(data);
                Self::sw(0x9000)
            }),
            0x84 => {
                let len = command.expected_length().unwrap_or(0) as usize;
                Self::ok(vec![0xC3; len])
            }
            0x2A => match p1p2 {
                0x9E9A if self.user_verified => {
                    self.signature_counter += 1;
                    Self::ok((1..=64).collect())
                }
                0x8086 if self.user_verified => Self::ok(vec![0xDD; 32]),
                _ => Self::sw(0x6982),
            },
            0x88 if self.user_verified => Self::ok((0x81..=0xC0).collect()),
            0x88 => Self::sw(0x6982),
            _ => Self::sw(0x6D00),
        }
    }

    fn activate(&mut self) {
        if self.terminated {
            *self = Self::new(self.version);
        }
        self.active = true;
    }

    fn admin(&mut self, f: impl FnOnce(&mut Self) -> Bytes) -> Bytes {
        if self.admin_verified {
            f(self)
        } else {
            Self::sw(0x6982)
        }
    }

    fn application_related_data(&self) -> Vec<u8> {
        let mut discretionary = Vec::new();
        write_tlv(
            &mut discretionary,
            data_object::EXTENDED_CAPABILITIES,
            &self.extended_capabilities,
        );
        for key_ref in KeyRef::ALL {
            if let Some(value) = self.objects.get(&key_ref.algorithm_attributes()) {
                write_tlv(&mut discretionary, key_ref.algorithm_attributes(), value);
            }
        }
        write_tlv(&mut discretionary, data_object::PW_STATUS_BYTES, &self.pw_status());

        let mut body = Vec::new();
        write_tlv(&mut body, data_object::AID, &SERIAL_AID);
        write_tlv(&mut body, 0x73, &discretionary);
        let mut out = Vec::new();
        write_tlv(&mut out, data_object::APPLICATION_RELATED_DATA, &body);
        out
    }

    fn pw_status(&self) -> Vec<u8> {
        let policy = self.objects.get(&data_object::PW_STATUS_BYTES).map_or(0x01, |p| p[0]);
        vec![
            policy,
            0x7F,
            0x7F,
            0x7F,
            self.attempts[0],
            self.attempts[1],
            self.attempts[2],
        ]
    }

    fn get_data(&self, do_id: u16) -> Bytes {
        match do_id {
            data_object::APPLICATION_RELATED_DATA => Self::ok(self.application_related_data()),
            data_object::PW_STATUS_BYTES => Self::ok(self.pw_status()),
            data_object::ALGORITHM_INFORMATION => match &self.algorithm_information {
                Some(data) => Self::ok(data.clone()),
                None => Self::sw(0x6A88),
            },
            data_object::SECURITY_SUPPORT_TEMPLATE => {
                let mut out = Vec::new();
                write_tlv(
                    &mut out,
                    data_object::SECURITY_SUPPORT_TEMPLATE,
                    &[&[0x93, 0x03][..], &self.signature_counter.to_be_bytes()[1..]].concat(),
                );
                Self::ok(out)
            }
            0xD6..=0xD9 if self.uif_unsupported => Self::sw(0x6A86),
            0xD6..=0xD9 => Self::ok(
                self.objects
                    .get(&do_id)
                    .cloned()
                    .unwrap_or_else(|| vec![0x00, 0x20]),
            ),
            _ => match self.objects.get(&do_id) {
                Some(value) => Self::ok(value.clone()),
                None => Self::sw(0x6A88),
            },
        }
    }

    fn put_data(&mut self, do_id: u16, data: Vec<u8>) -> Bytes {
        self.admin(|card| {
            card.objects.insert(do_id, data);
            Self::sw(0x9000)
        })
    }

    fn verify(&mut self, pw: u8, pin: &[u8]) -> Bytes {
        let (index, expected) = match pw {
            0x81 | 0x82 => (0, USER_PIN),
            0x83 => (2, ADMIN_PIN),
            _ => return Self::sw(0x6A86),
        };
        if self.attempts[index] == 0 {
            return Self::sw(0x6983);
        }
        if pin == expected.as_bytes() {
            self.attempts[index] = ALL_ATTEMPTS;
            if index == 0 {
                self.user_verified = true;
            } else {
                self.admin_verified = true;
            }
            Self::sw(0x9000)
        } else {
            self.attempts[index] -= 1;
            Self::sw(0x63C0 | u16::from(self.attempts[index]))
        }
    }

    fn generate(&mut self, p1: u8, crt: &[u8]) -> Bytes {
        let Some(key_ref) = KeyRef::ALL.into_iter().find(|key_ref| key_ref.crt() == crt) else {
            return Self::sw(0x6A80);
        };
        if p1 == 0x81 {
            return match self.public_keys.get(&key_ref) {
                Some(key) => Self::ok(key.clone()),
                None => Self::sw(0x6A88),
            };
        }
        if !self.admin_verified {
            return Self::sw(0x6982);
        }

        let attributes = self
            .objects
            .get(&key_ref.algorithm_attributes())
            .cloned()
            .unwrap_or_else(|| RSA_2048.to_vec());
        let mut children = Vec::new();
        if attributes[0] == 0x01 {
            let n_len = usize::from(u16::from_be_bytes([attributes[1], attributes[2]]));
            write_tlv(&mut children, 0x81, &vec![0xA5; n_len / 8]);
            write_tlv(&mut children, 0x82, &[0x01, 0x00, 0x01]);
        } else if attributes[0] == 0x16 || attributes.ends_with(&[0x97, 0x55, 0x01, 0x05, 0x01]) {
            write_tlv(&mut children, 0x86, &[0x55; 32]);
        } else {
            let mut point = vec![0x04];
            point.extend_from_slice(&[0x66; 64]);
            write_tlv(&mut children, 0x86, &point);
        }
        let mut key = Vec::new();
        write_tlv(&mut key, crate::keys::TAG_PUBLIC_KEY, &children);
        self.public_keys.insert(key_ref, key.clone());
        Self::ok(key)
    }
}
