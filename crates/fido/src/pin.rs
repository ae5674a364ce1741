//! PIN encoding rules

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Minimum PIN length in Unicode code points
pub const MIN_PIN_LEN: usize = 4;
/// Maximum PIN length in UTF-8 bytes
pub const MAX_PIN_LEN: usize = 63;
/// Length the PIN is zero-padded to before encryption
pub const PIN_BUFFER_LEN: usize = 64;
/// Length of the truncated PIN hash
pub const PIN_HASH_LEN: usize = 16;

/// Check PIN length limits
///
/// # Errors
/// [`Error::InvalidPin`] for fewer than four characters or more than 63 bytes.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.chars().count() < MIN_PIN_LEN {
        return Err(Error::InvalidPin("PIN must be at least 4 characters"));
    }
    if pin.len() > MAX_PIN_LEN {
        return Err(Error::InvalidPin("PIN must be at most 63 bytes"));
    }
    Ok(())
}

/// UTF-8 PIN, optionally zero-padded to [`PIN_BUFFER_LEN`]
pub fn prepare_pin(pin: &str, pad: bool) -> Result<Zeroizing<Vec<u8>>> {
    validate_pin(pin)?;

    let mut buffer = Zeroizing::new(Vec::with_capacity(PIN_BUFFER_LEN));
    buffer.extend_from_slice(pin.as_bytes());
    if pad {
        buffer.resize(PIN_BUFFER_LEN, 0);
    }
    Ok(buffer)
}

/// First 16 bytes of SHA-256 over the PIN
pub fn pin_hash(pin: &str) -> Result<Zeroizing<[u8; PIN_HASH_LEN]>> {
    let prepared = prepare_pin(pin, false)?;
    let digest: Zeroizing<[u8; 32]> =
        Zeroizing::new(Sha256::digest(prepared.as_slice()).into());

    let mut hash = Zeroizing::new([0u8; PIN_HASH_LEN]);
    hash.copy_from_slice(&digest[..PIN_HASH_LEN]);
    Ok(hash)
}
