//! Elliptic curves supported by the OpenPGP application

use derive_more::Display;

/// Curve identified by its object identifier in algorithm attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum OpenPgpCurve {
    /// NIST P-256
    Secp256r1,
    /// SEC secp256k1
    Secp256k1,
    /// NIST P-384
    Secp384r1,
    /// NIST P-521
    Secp521r1,
    /// Brainpool P-256
    BrainpoolP256r1,
    /// Brainpool P-384
    BrainpoolP384r1,
    /// Brainpool P-512
    BrainpoolP512r1,
    /// Curve25519 for key agreement
    X25519,
    /// Curve25519 for EdDSA signatures
    Ed25519,
}

impl OpenPgpCurve {
    /// Every supported curve
    pub const ALL: [Self; 9] = [
        Self::Secp256r1,
        Self::Secp256k1,
        Self::Secp384r1,
        Self::Secp521r1,
        Self::BrainpoolP256r1,
        Self::BrainpoolP384r1,
        Self::BrainpoolP512r1,
        Self::X25519,
        Self::Ed25519,
    ];

    /// DER content bytes of the curve OID
    pub const fn oid(self) -> &'static [u8] {
        match self {
            Self::Secp256r1 => &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07],
            Self::Secp256k1 => &[0x2B, 0x81, 0x04, 0x00, 0x0A],
            Self::Secp384r1 => &[0x2B, 0x81, 0x04, 0x00, 0x22],
            Self::Secp521r1 => &[0x2B, 0x81, 0x04, 0x00, 0x23],
            Self::BrainpoolP256r1 => &[0x2B, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x07],
            Self::BrainpoolP384r1 => &[0x2B, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x0B],
            Self::BrainpoolP512r1 => &[0x2B, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x0D],
            Self::X25519 => &[0x2B, 0x06, 0x01, 0x04, 0x01, 0x97, 0x55, 0x01, 0x05, 0x01],
            Self::Ed25519 => &[0x2B, 0x06, 0x01, 0x04, 0x01, 0xDA, 0x47, 0x0F, 0x01],
        }
    }

    /// Curve with the given OID
    pub fn from_oid(oid: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|curve| curve.oid() == oid)
    }

    /// Whether public keys are raw 32-byte Curve25519 values rather than
    /// SEC1 points
    pub const fn is_cv25519(self) -> bool {
        matches!(self, Self::X25519 | Self::Ed25519)
    }
}
