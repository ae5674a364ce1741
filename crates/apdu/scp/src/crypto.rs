//! Cryptographic primitives for the SCP03 protocol
//!
//! AES-128 in ECB (single block, for IV derivation) and CBC mode with
//! ISO/IEC 7816-4 padding, AES-CMAC, and the GlobalPlatform key derivation
//! function (NIST SP 800-108 counter mode with CMAC as PRF).

use aes::Aes128;
use cipher::{
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, block_padding::Iso7816,
    generic_array::GenericArray,
};
use cmac::{Cmac, Mac};
use keyport_apdu_core::{Error, Result};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-128 key
pub type AesKey = [u8; 16];
/// Single AES block
pub type Block = [u8; BLOCK_SIZE];
/// Challenge exchanged during INITIALIZE UPDATE
pub type Challenge = [u8; 8];
/// Card or host cryptogram
pub type Cryptogram = [u8; 8];
/// Truncated C-MAC / R-MAC
pub type Scp03Mac = [u8; 8];

/// Derivation constant of the card cryptogram
pub const DERIVE_CARD_CRYPTOGRAM: u8 = 0x00;
/// Derivation constant of the host cryptogram
pub const DERIVE_HOST_CRYPTOGRAM: u8 = 0x01;
/// Derivation constant of S-ENC
pub const DERIVE_S_ENC: u8 = 0x04;
/// Derivation constant of S-MAC
pub const DERIVE_S_MAC: u8 = 0x06;
/// Derivation constant of S-RMAC
pub const DERIVE_S_RMAC: u8 = 0x07;

/// Encrypt a single block with AES-128 in ECB mode
pub fn aes_ecb_encrypt(key: &AesKey, block: &Block) -> Block {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buffer = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buffer);

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&buffer);
    out
}

/// Encrypt `data` with AES-128-CBC after ISO/IEC 7816-4 padding
///
/// Padding is always applied, so the output is at least one block long.
pub fn aes_cbc_encrypt(key: &AesKey, iv: &Block, data: &[u8]) -> Vec<u8> {
    cbc::Encryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_vec_mut::<Iso7816>(data)
}

/// Decrypt AES-128-CBC ciphertext and strip ISO/IEC 7816-4 padding
///
/// # Errors
/// [`Error::Security`] on a length that is not a whole number of blocks or
/// on malformed padding.
pub fn aes_cbc_decrypt(key: &AesKey, iv: &Block, data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::security("Ciphertext is not a whole number of blocks"));
    }
    cbc::Decryptor::<Aes128>::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_vec_mut::<Iso7816>(data)
        .map_err(|_| Error::security("Invalid padding in decrypted data"))
}

/// Compute AES-CMAC over the concatenation of `parts`
pub fn aes_cmac(key: &AesKey, parts: &[&[u8]]) -> Block {
    let mut mac = <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }

    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// GlobalPlatform SCP03 key derivation
///
/// Derivation data is `00*11 || constant || 00 || L || 01 || context` with
/// `L` the output length in bits; at most one block of output is produced.
pub fn derive(key: &AesKey, constant: u8, context: &[u8], bits: u16) -> Vec<u8> {
    let mut label = [0u8; 12];
    label[11] = constant;
    let length = bits.to_be_bytes();

    let block = aes_cmac(key, &[&label, &[0x00], &length, &[0x01], context]);
    let len = (bits as usize / 8).min(BLOCK_SIZE);
    block[..len].to_vec()
}

/// Derive a 128-bit session key
pub fn derive_key(key: &AesKey, constant: u8, context: &[u8]) -> AesKey {
    let mut out = [0u8; 16];
    out.copy_from_slice(&derive(key, constant, context, 128));
    out
}

/// Derive a 64-bit card or host cryptogram
pub fn derive_cryptogram(key: &AesKey, constant: u8, context: &[u8]) -> Cryptogram {
    let mut out = [0u8; 8];
    out.copy_from_slice(&derive(key, constant, context, 64));
    out
}
