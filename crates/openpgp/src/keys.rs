//! Public key values read from the card and private key import templates

use std::collections::BTreeMap;
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::algorithm::{AlgorithmAttributes, RsaImportFormat};
use crate::curve::OpenPgpCurve;
use crate::key_ref::KeyRef;
use crate::tlv::write_tlv;
use crate::{Error, Result};

/// Public key data object
pub const TAG_PUBLIC_KEY: u16 = 0x7F49;
/// Extended header list carrying a private key
pub const TAG_EXTENDED_HEADER_LIST: u16 = 0x4D;
/// Cardholder private key template
pub const TAG_PRIVATE_KEY_TEMPLATE: u16 = 0x7F48;
/// Concatenated private key values
pub const TAG_PRIVATE_KEY_DATA: u16 = 0x5F48;

const TAG_RSA_MODULUS: u16 = 0x81;
const TAG_RSA_EXPONENT: u16 = 0x82;
const TAG_EC_PUBLIC_KEY: u16 = 0x86;

/// Public key returned by GENERATE ASYMMETRIC KEY PAIR
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyValues {
    /// RSA public key
    Rsa {
        /// Big-endian modulus
        modulus: Vec<u8>,
        /// Big-endian public exponent
        exponent: Vec<u8>,
    },
    /// Weierstrass curve public key
    Ec {
        /// Curve of the key
        curve: OpenPgpCurve,
        /// SEC1 encoded point
        encoded_point: Vec<u8>,
    },
    /// X25519 or Ed25519 public key
    Cv25519 {
        /// Curve of the key
        curve: OpenPgpCurve,
        /// Raw 32-byte public key
        bytes: Vec<u8>,
    },
}

impl PublicKeyValues {
    /// Decode the children of a `7F49` object
    ///
    /// `curve` selects the EC forms; `None` means RSA.
    pub fn from_public_key_data(
        data: &BTreeMap<u16, Vec<u8>>,
        curve: Option<OpenPgpCurve>,
    ) -> Result<Self> {
        match curve {
            Some(curve) => {
                let encoded = data
                    .get(&TAG_EC_PUBLIC_KEY)
                    .ok_or(Error::InvalidData("Missing EC public key"))?
                    .clone();
                if curve.is_cv25519() {
                    Ok(Self::Cv25519 {
                        curve,
                        bytes: encoded,
                    })
                } else {
                    Ok(Self::Ec {
                        curve,
                        encoded_point: encoded,
                    })
                }
            }
            None => Ok(Self::Rsa {
                modulus: data
                    .get(&TAG_RSA_MODULUS)
                    .ok_or(Error::InvalidData("Missing RSA modulus"))?
                    .clone(),
                exponent: data
                    .get(&TAG_RSA_EXPONENT)
                    .ok_or(Error::InvalidData("Missing RSA exponent"))?
                    .clone(),
            }),
        }
    }

    /// Public key bytes used as the peer key in ECDH
    pub fn agreement_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Ec { encoded_point, .. } => Some(encoded_point),
            Self::Cv25519 { bytes, .. } => Some(bytes),
            Self::Rsa { .. } => None,
        }
    }
}

/// RSA private key components, all big-endian
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RsaPrivateKey {
    /// Modulus n
    pub modulus: Vec<u8>,
    /// Public exponent e
    pub public_exponent: Vec<u8>,
    /// Prime p
    pub prime_p: Vec<u8>,
    /// Prime q
    pub prime_q: Vec<u8>,
    /// d mod (p - 1)
    pub prime_exponent_p: Option<Vec<u8>>,
    /// d mod (q - 1)
    pub prime_exponent_q: Option<Vec<u8>>,
    /// q^-1 mod p
    pub crt_coefficient: Option<Vec<u8>>,
}

impl RsaPrivateKey {
    /// Modulus length in bits
    pub fn bit_length(&self) -> usize {
        strip_leading_zeros(&self.modulus).len() * 8
    }
}

impl fmt::Debug for RsaPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPrivateKey")
            .field("bits", &self.bit_length())
            .finish_non_exhaustive()
    }
}

/// Elliptic curve private key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EcPrivateKey {
    /// Curve of the key
    #[zeroize(skip)]
    pub curve: OpenPgpCurve,
    /// Big-endian private scalar, or the raw Curve25519 secret
    pub secret: Vec<u8>,
}

impl fmt::Debug for EcPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcPrivateKey")
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

/// Private key to import into a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivateKeyValues {
    /// RSA key
    Rsa(RsaPrivateKey),
    /// Elliptic curve key
    Ec(EcPrivateKey),
}

impl PrivateKeyValues {
    /// Algorithm attributes the slot needs before this key can be imported
    pub fn attributes(&self, key_ref: KeyRef, use_crt: bool) -> Result<AlgorithmAttributes> {
        match self {
            Self::Rsa(key) => {
                let n_len = u16::try_from(key.bit_length())
                    .map_err(|_| Error::InvalidData("RSA modulus too long"))?;
                let import_format = if use_crt {
                    RsaImportFormat::CrtWithModulus
                } else {
                    RsaImportFormat::Standard
                };
                Ok(AlgorithmAttributes::rsa(n_len, import_format))
            }
            Self::Ec(key) => Ok(AlgorithmAttributes::ec(key_ref, key.curve)),
        }
    }
}

/// Private key import template (`4D` extended header list)
///
/// Encodes as `4D { crt || 7F48 { headers } || 5F48 { values } }` where
/// the headers are the tag/length pairs of the key components and the
/// values are the components concatenated in the same order.
pub struct PrivateKeyTemplate {
    crt: &'static [u8],
    entries: Vec<(u8, Zeroizing<Vec<u8>>)>,
}

impl PrivateKeyTemplate {
    /// Template for `key` in `key_ref`
    ///
    /// RSA primes are padded to half the modulus length. `use_crt` selects
    /// the CRT form, which also carries dP, dQ, qInv and n.
    pub fn new(key_ref: KeyRef, key: &PrivateKeyValues, use_crt: bool) -> Result<Self> {
        let entries = match key {
            PrivateKeyValues::Rsa(rsa) => {
                let half = rsa.bit_length() / 16;
                let mut entries = vec![
                    (0x91, Zeroizing::new(rsa.public_exponent.clone())),
                    (0x92, to_length(&rsa.prime_p, half)?),
                    (0x93, to_length(&rsa.prime_q, half)?),
                ];
                if use_crt {
                    let (Some(dp), Some(dq), Some(qinv)) = (
                        &rsa.prime_exponent_p,
                        &rsa.prime_exponent_q,
                        &rsa.crt_coefficient,
                    ) else {
                        return Err(Error::InvalidData("CRT components missing"));
                    };
                    entries.push((0x94, to_length(qinv, half)?));
                    entries.push((0x95, to_length(dp, half)?));
                    entries.push((0x96, to_length(dq, half)?));
                    entries.push((0x97, to_length(&rsa.modulus, half * 2)?));
                }
                entries
            }
            PrivateKeyValues::Ec(ec) => vec![(0x92, Zeroizing::new(ec.secret.clone()))],
        };
        Ok(Self {
            crt: key_ref.crt(),
            entries,
        })
    }

    /// Attach the public key (`99`) to an EC template
    pub fn with_public_key(mut self, public_key: &[u8]) -> Self {
        self.entries.push((0x99, Zeroizing::new(public_key.to_vec())));
        self
    }

    /// Tags of the key components, in order
    pub fn tags(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter().map(|(tag, _)| *tag)
    }

    /// Encoded template, ready for PUT DATA (odd)
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut headers = Vec::new();
        let mut values = Zeroizing::new(Vec::new());
        for (tag, value) in &self.entries {
            headers.push(*tag);
            headers.extend(crate::tlv::encode_length(value.len()));
            values.extend_from_slice(value);
        }

        let mut body = Zeroizing::new(self.crt.to_vec());
        write_tlv(&mut body, TAG_PRIVATE_KEY_TEMPLATE, &headers);
        write_tlv(&mut body, TAG_PRIVATE_KEY_DATA, &values);

        let mut out = Zeroizing::new(Vec::new());
        write_tlv(&mut out, TAG_EXTENDED_HEADER_LIST, &body);
        out
    }
}

impl fmt::Debug for PrivateKeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyTemplate")
            .field("crt", &hex::encode(self.crt))
            .field("tags", &self.tags().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn strip_leading_zeros(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|b| *b != 0).unwrap_or(value.len());
    &value[start..]
}

/// Left-pad a big-endian integer with zeros to exactly `len` bytes
fn to_length(value: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let value = strip_leading_zeros(value);
    if value.len() > len {
        return Err(Error::InvalidData("Key component longer than expected"));
    }
    let mut out = Zeroizing::new(vec![0u8; len - value.len()]);
    out.extend_from_slice(value);
    Ok(out)
}
