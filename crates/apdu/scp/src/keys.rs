//! Static and session keys for SCP03

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{AesKey, DERIVE_S_ENC, DERIVE_S_MAC, DERIVE_S_RMAC, derive_key};

/// Key identifier of SCP03 key sets
pub const KID_SCP03: u8 = 0x01;

/// Reference to a key set on the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRef {
    /// Key identifier
    pub kid: u8,
    /// Key version number
    pub kvn: u8,
}

impl KeyRef {
    /// Create a new key reference
    pub const fn new(kid: u8, kvn: u8) -> Self {
        Self { kid, kvn }
    }

    /// SCP03 key set with the given version number
    pub const fn scp03(kvn: u8) -> Self {
        Self::new(KID_SCP03, kvn)
    }
}

impl Default for KeyRef {
    /// Key version 0 selects the first available key set
    fn default() -> Self {
        Self::scp03(0x00)
    }
}

/// Long-lived key set shared between host and card
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StaticKeys {
    enc: AesKey,
    mac: AesKey,
    dek: Option<AesKey>,
}

impl StaticKeys {
    /// Publicly known key value of unpersonalized YubiKeys
    pub const DEFAULT_KEY: AesKey = [
        0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e,
        0x4f,
    ];

    /// Create a new key set
    pub const fn new(enc: AesKey, mac: AesKey, dek: Option<AesKey>) -> Self {
        Self { enc, mac, dek }
    }

    /// The factory default key set
    pub const fn default_keys() -> Self {
        Self::new(Self::DEFAULT_KEY, Self::DEFAULT_KEY, Some(Self::DEFAULT_KEY))
    }

    /// Derive the session keys for one channel from host and card challenges
    pub fn derive(&self, context: &[u8]) -> SessionKeys {
        SessionKeys::new(
            derive_key(&self.enc, DERIVE_S_ENC, context),
            derive_key(&self.mac, DERIVE_S_MAC, context),
            derive_key(&self.mac, DERIVE_S_RMAC, context),
            self.dek,
        )
    }
}

impl fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeys")
            .field("enc", &"<redacted>")
            .field("mac", &"<redacted>")
            .field("dek", &self.dek.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Keys of one established secure channel
///
/// Not `Clone`: the keys live in exactly one channel and are wiped when it
/// is dropped or closed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub(crate) senc: AesKey,
    pub(crate) smac: AesKey,
    pub(crate) srmac: AesKey,
    dek: Option<AesKey>,
}

impl SessionKeys {
    /// Create a new set of session keys
    pub const fn new(senc: AesKey, smac: AesKey, srmac: AesKey, dek: Option<AesKey>) -> Self {
        Self {
            senc,
            smac,
            srmac,
            dek,
        }
    }

    /// Data encryption key, used to wrap keys sent to the card
    pub const fn dek(&self) -> Option<&AesKey> {
        self.dek.as_ref()
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("senc", &"<redacted>")
            .field("smac", &"<redacted>")
            .field("srmac", &"<redacted>")
            .field("dek", &self.dek.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_keys() {
        let keys = StaticKeys::default_keys();
        let output = format!("{keys:?}");
        assert!(!output.contains("64"));
        assert!(output.contains("<redacted>"));

        let session = keys.derive(&[0u8; 16]);
        let output = format!("{session:?}");
        assert!(output.contains("<redacted>"));
        assert!(session.dek().is_some());
    }

    #[test]
    fn test_session_keys_differ() {
        let session = StaticKeys::default_keys().derive(&[0x5A; 16]);
        assert_ne!(session.senc, session.smac);
        assert_ne!(session.smac, session.srmac);
    }

    #[test]
    fn test_zeroize() {
        let mut session = SessionKeys::new([1; 16], [2; 16], [3; 16], Some([4; 16]));
        session.zeroize();
        assert_eq!(session.senc, [0; 16]);
        assert_eq!(session.srmac, [0; 16]);
        assert!(session.dek().is_none());
    }
}
