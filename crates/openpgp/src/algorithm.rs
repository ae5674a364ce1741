//! Algorithm attributes (DOs C1, C2, C3 and DA) and algorithm information

use std::collections::BTreeMap;

use derive_more::Display;
use keyport_apdu_core::Version;
use tracing::warn;

use crate::curve::OpenPgpCurve;
use crate::key_ref::KeyRef;
use crate::{Error, Result};

/// Algorithm id of RSA
pub const ALGORITHM_RSA: u8 = 0x01;
/// Algorithm id of ECDH
pub const ALGORITHM_ECDH: u8 = 0x12;
/// Algorithm id of ECDSA
pub const ALGORITHM_ECDSA: u8 = 0x13;
/// Algorithm id of EdDSA
pub const ALGORITHM_EDDSA: u8 = 0x16;

/// Public exponent length used for generated and imported RSA keys
pub const RSA_E_LEN: u16 = 17;

/// Supported algorithm attributes per key slot
pub type AlgorithmInformation = BTreeMap<KeyRef, Vec<AlgorithmAttributes>>;

/// Private key import format for RSA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[repr(u8)]
pub enum RsaImportFormat {
    /// e, p and q
    Standard = 0,
    /// e, p, q and n
    StandardWithModulus = 1,
    /// CRT form
    Crt = 2,
    /// CRT form with n
    CrtWithModulus = 3,
}

impl TryFrom<u8> for RsaImportFormat {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Standard),
            1 => Ok(Self::StandardWithModulus),
            2 => Ok(Self::Crt),
            3 => Ok(Self::CrtWithModulus),
            _ => Err(Error::InvalidData("Unknown RSA import format")),
        }
    }
}

/// Private key import format for elliptic curve keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EcImportFormat {
    /// Private scalar only
    Standard,
    /// Private scalar and public key
    StandardWithPublicKey,
}

/// Algorithm attributes of a key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AlgorithmAttributes {
    /// RSA key
    #[display("RSA{n_len} ({import_format})")]
    Rsa {
        /// Modulus length in bits
        n_len: u16,
        /// Public exponent length in bits
        e_len: u16,
        /// Private key import format
        import_format: RsaImportFormat,
    },
    /// Elliptic curve key
    #[display("EC 0x{algorithm_id:02X} {curve} ({import_format})")]
    Ec {
        /// ECDH, ECDSA or EdDSA
        algorithm_id: u8,
        /// Curve of the key
        curve: OpenPgpCurve,
        /// Private key import format
        import_format: EcImportFormat,
    },
}

impl AlgorithmAttributes {
    /// RSA attributes with the default exponent length
    pub const fn rsa(n_len: u16, import_format: RsaImportFormat) -> Self {
        Self::Rsa {
            n_len,
            e_len: RSA_E_LEN,
            import_format,
        }
    }

    /// EC attributes for `curve` in `key_ref`
    ///
    /// Ed25519 always signs with EdDSA; other curves use ECDH in the
    /// decryption slot and ECDSA elsewhere.
    pub const fn ec(key_ref: KeyRef, curve: OpenPgpCurve) -> Self {
        let algorithm_id = match (curve, key_ref) {
            (OpenPgpCurve::Ed25519, _) => ALGORITHM_EDDSA,
            (_, KeyRef::Dec) => ALGORITHM_ECDH,
            _ => ALGORITHM_ECDSA,
        };
        Self::Ec {
            algorithm_id,
            curve,
            import_format: EcImportFormat::Standard,
        }
    }

    /// Algorithm id byte
    pub const fn algorithm_id(&self) -> u8 {
        match self {
            Self::Rsa { .. } => ALGORITHM_RSA,
            Self::Ec { algorithm_id, .. } => *algorithm_id,
        }
    }

    /// Parse the content of an algorithm attributes data object
    pub fn parse(data: &[u8]) -> Result<Self> {
        match data {
            [ALGORITHM_RSA, n1, n2, e1, e2, format, ..] => Ok(Self::Rsa {
                n_len: u16::from_be_bytes([*n1, *n2]),
                e_len: u16::from_be_bytes([*e1, *e2]),
                import_format: RsaImportFormat::try_from(*format)?,
            }),
            [ALGORITHM_RSA, ..] => Err(Error::InvalidData("Truncated RSA attributes")),
            [algorithm_id @ (ALGORITHM_ECDH | ALGORITHM_ECDSA | ALGORITHM_EDDSA), rest @ ..] => {
                let (oid, import_format) = match rest {
                    [oid @ .., 0xFF] => (oid, EcImportFormat::StandardWithPublicKey),
                    oid => (oid, EcImportFormat::Standard),
                };
                let curve = OpenPgpCurve::from_oid(oid)
                    .ok_or(Error::InvalidData("Unknown curve OID"))?;
                Ok(Self::Ec {
                    algorithm_id: *algorithm_id,
                    curve,
                    import_format,
                })
            }
            _ => Err(Error::InvalidData("Unknown algorithm id")),
        }
    }

    /// Encoded data object content
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::Rsa {
                n_len,
                e_len,
                import_format,
            } => {
                let mut out = vec![ALGORITHM_RSA];
                out.extend_from_slice(&n_len.to_be_bytes());
                out.extend_from_slice(&e_len.to_be_bytes());
                out.push(import_format as u8);
                out
            }
            Self::Ec {
                algorithm_id,
                curve,
                import_format,
            } => {
                let mut out = vec![algorithm_id];
                out.extend_from_slice(curve.oid());
                if import_format == EcImportFormat::StandardWithPublicKey {
                    out.push(0xFF);
                }
                out
            }
        }
    }
}

/// Fixed RSA attribute list of firmware that predates algorithm information
pub fn legacy_algorithm_information(version: Version) -> AlgorithmInformation {
    let (import_format, sizes): (_, &[u16]) = if version.is_less_than(4, 0, 0) {
        (RsaImportFormat::CrtWithModulus, &[2048])
    } else if version.major == 4 && version.minor == 4 {
        (RsaImportFormat::Standard, &[2048])
    } else {
        (RsaImportFormat::Standard, &[2048, 3072, 4096])
    };
    let attributes: Vec<_> = sizes
        .iter()
        .map(|n_len| AlgorithmAttributes::rsa(*n_len, import_format))
        .collect();

    [KeyRef::Sig, KeyRef::Dec, KeyRef::Aut]
        .into_iter()
        .map(|key_ref| (key_ref, attributes.clone()))
        .collect()
}

/// Decode the entries of the algorithm information object
///
/// Entries for unknown slots or curves are skipped.
pub fn parse_algorithm_information(tlvs: &[iso7816_tlv::ber::Tlv]) -> AlgorithmInformation {
    let mut info = AlgorithmInformation::new();
    for tlv in tlvs {
        let do_id = crate::tlv::tag_number(tlv.tag());
        let Some(key_ref) = KeyRef::from_algorithm_attributes(do_id) else {
            warn!(do_id, "Skipping algorithm information for unknown slot");
            continue;
        };
        let parsed = crate::tlv::get_primitive_value(do_id, tlv)
            .and_then(|data| AlgorithmAttributes::parse(&data));
        match parsed {
            Ok(attributes) => info.entry(key_ref).or_default().push(attributes),
            Err(err) => warn!(%key_ref, %err, "Skipping unparseable algorithm attributes"),
        }
    }
    info
}

/// Fix the Curve25519 entries reported by firmware below 5.6.1
///
/// X25519 is listed with EdDSA instead of ECDH, and Ed25519 is offered
/// for the decryption and attestation slots.
pub fn correct_curve25519(info: &mut AlgorithmInformation) {
    let invalid_x25519 = AlgorithmAttributes::Ec {
        algorithm_id: ALGORITHM_EDDSA,
        curve: OpenPgpCurve::X25519,
        import_format: EcImportFormat::Standard,
    };
    let x25519 = AlgorithmAttributes::Ec {
        algorithm_id: ALGORITHM_ECDH,
        curve: OpenPgpCurve::X25519,
        import_format: EcImportFormat::Standard,
    };
    let ed25519 = AlgorithmAttributes::Ec {
        algorithm_id: ALGORITHM_EDDSA,
        curve: OpenPgpCurve::Ed25519,
        import_format: EcImportFormat::Standard,
    };

    for values in info.values_mut() {
        values.retain(|attributes| *attributes != invalid_x25519);
    }

    let dec = info.entry(KeyRef::Dec).or_default();
    if !dec.contains(&x25519) {
        dec.push(x25519);
    }
    dec.retain(|attributes| *attributes != ed25519);

    if let Some(att) = info.get_mut(&KeyRef::Att) {
        att.retain(|attributes| *attributes != ed25519);
    }
}
