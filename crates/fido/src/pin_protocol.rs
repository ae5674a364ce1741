//! PIN/UV auth protocols one and two
//!
//! Both protocols agree on a shared secret through ECDH on P-256 with a fresh
//! platform key per operation. They differ in how the secret is turned into
//! keys and in the shape of ciphertexts and MACs:
//!
//! | | v1 | v2 |
//! |---|---|---|
//! | KDF | SHA-256(Z) for both keys | HKDF-SHA-256, separate HMAC and AES keys |
//! | Encryption | AES-256-CBC, zero IV | AES-256-CBC, random IV prepended |
//! | MAC | HMAC-SHA-256, first 16 bytes | HMAC-SHA-256, all 32 bytes |

use std::fmt;

use aes::Aes256;
use cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding,
    generic_array::GenericArray,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdh::EphemeralSecret;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::cose::CoseKey;
use crate::{Error, Result};

const BLOCK_SIZE: usize = 16;
const HKDF_SALT: [u8; 32] = [0; 32];
const HKDF_INFO_HMAC: &[u8] = b"CTAP2 HMAC key";
const HKDF_INFO_AES: &[u8] = b"CTAP2 AES key";

/// Keys derived from one key agreement
///
/// Not `Clone`: the keys exist once and are wiped when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    enc_key: [u8; 32],
    auth_key: [u8; 32],
}

impl SharedSecret {
    /// AES-256 key
    pub const fn enc_key(&self) -> &[u8; 32] {
        &self.enc_key
    }

    /// HMAC key
    pub const fn auth_key(&self) -> &[u8; 32] {
        &self.auth_key
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("enc_key", &"<redacted>")
            .field("auth_key", &"<redacted>")
            .finish()
    }
}

/// PIN/UV auth protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinUvAuthProtocol {
    /// Protocol one, CTAP 2.0
    V1,
    /// Protocol two, CTAP 2.1
    #[default]
    V2,
}

impl PinUvAuthProtocol {
    /// Protocol number sent in `pinUvAuthProtocol`
    pub const fn version(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Protocol with the given number
    pub const fn from_version(version: u8) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    /// Preferred protocol among those an authenticator lists, in the order it lists them
    pub fn select(supported: &[u8]) -> Option<Self> {
        supported.iter().find_map(|version| Self::from_version(*version))
    }

    /// Run ECDH against the authenticator key with a fresh platform key
    ///
    /// Returns the platform public key to send back and the derived secret.
    pub fn encapsulate(&self, peer: &CoseKey) -> Result<(CoseKey, SharedSecret)> {
        let peer = peer.to_public_key()?;
        let ephemeral = EphemeralSecret::random(&mut rand_v8::rngs::OsRng);
        let platform = CoseKey::from_public_key(&ephemeral.public_key());

        let shared = ephemeral.diffie_hellman(&peer);
        let secret = self.kdf(shared.raw_secret_bytes())?;
        trace!(protocol = self.version(), "Key agreement complete");
        Ok((platform, secret))
    }

    /// Derive the shared secret from the ECDH x-coordinate `z`
    pub fn kdf(&self, z: &[u8]) -> Result<SharedSecret> {
        match self {
            Self::V1 => {
                let mut secret = SharedSecret {
                    enc_key: Sha256::digest(z).into(),
                    auth_key: [0; 32],
                };
                secret.auth_key = secret.enc_key;
                Ok(secret)
            }
            Self::V2 => {
                let hkdf = Hkdf::<Sha256>::new(Some(&HKDF_SALT), z);
                let mut secret = SharedSecret {
                    enc_key: [0; 32],
                    auth_key: [0; 32],
                };
                hkdf.expand(HKDF_INFO_HMAC, &mut secret.auth_key)
                    .map_err(|_| Error::Crypto("HKDF expansion failed"))?;
                hkdf.expand(HKDF_INFO_AES, &mut secret.enc_key)
                    .map_err(|_| Error::Crypto("HKDF expansion failed"))?;
                Ok(secret)
            }
        }
    }

    /// Encrypt block-aligned plaintext
    ///
    /// # Errors
    /// [`Error::Crypto`] when `data` is not a multiple of 16 bytes; neither
    /// protocol pads.
    pub fn encrypt(&self, secret: &SharedSecret, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(Error::Crypto("Plaintext is not block aligned"));
        }

        match self {
            Self::V1 => Ok(aes256_cbc_encrypt(&secret.enc_key, &[0; BLOCK_SIZE], data)),
            Self::V2 => {
                let mut iv = [0u8; BLOCK_SIZE];
                rand::rng().fill_bytes(&mut iv);

                let mut out = Vec::with_capacity(BLOCK_SIZE + data.len());
                out.extend_from_slice(&iv);
                out.extend_from_slice(&aes256_cbc_encrypt(&secret.enc_key, &iv, data));
                Ok(out)
            }
        }
    }

    /// Decrypt ciphertext produced by the authenticator
    pub fn decrypt(&self, secret: &SharedSecret, data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let (iv, ciphertext) = match self {
            Self::V1 => ([0u8; BLOCK_SIZE], data),
            Self::V2 => {
                if data.len() < BLOCK_SIZE {
                    return Err(Error::Crypto("Ciphertext shorter than the IV"));
                }
                let (iv, rest) = data.split_at(BLOCK_SIZE);
                let mut block = [0u8; BLOCK_SIZE];
                block.copy_from_slice(iv);
                (block, rest)
            }
        };

        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::Crypto("Ciphertext is not block aligned"));
        }
        cbc::Decryptor::<Aes256>::new(
            GenericArray::from_slice(&secret.enc_key),
            GenericArray::from_slice(&iv),
        )
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| Error::Crypto("Decryption failed"))
    }

    /// HMAC-SHA-256 of `message`, truncated to 16 bytes for protocol one
    ///
    /// `key` is the auth key of a [`SharedSecret`] or a PIN token.
    pub fn authenticate(&self, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|_| Error::Crypto("Invalid HMAC key"))?;
        mac.update(message);
        let tag = mac.finalize().into_bytes();

        Ok(match self {
            Self::V1 => tag[..16].to_vec(),
            Self::V2 => tag.to_vec(),
        })
    }
}

fn aes256_cbc_encrypt(key: &[u8; 32], iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Vec<u8> {
    cbc::Encryptor::<Aes256>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_vec_mut::<NoPadding>(data)
}
