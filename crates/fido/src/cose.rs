//! COSE_Key encoding of P-256 key agreement keys

use ciborium::Value;
use p256::PublicKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::cbor::{self, key};
use crate::{Error, Result};

/// COSE key type EC2
pub const KTY_EC2: i64 = 2;
/// COSE algorithm ECDH-ES+HKDF-256, as used by CTAP2 key agreement
pub const ALG_ECDH_ES_HKDF_256: i64 = -25;
/// COSE curve P-256
pub const CRV_P256: i64 = 1;

/// P-256 public key in COSE_Key form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    /// X coordinate
    pub x: [u8; 32],
    /// Y coordinate
    pub y: [u8; 32],
}

impl CoseKey {
    /// Encode a public key
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let point = public_key.to_encoded_point(false);
        let mut key = Self {
            x: [0; 32],
            y: [0; 32],
        };
        // uncompressed encoding is 04 || x || y
        let bytes = point.as_bytes();
        key.x.copy_from_slice(&bytes[1..33]);
        key.y.copy_from_slice(&bytes[33..65]);
        key
    }

    /// Decode into a public key, validating that the point is on the curve
    pub fn to_public_key(&self) -> Result<PublicKey> {
        let mut sec1 = [0u8; 65];
        sec1[0] = 0x04;
        sec1[1..33].copy_from_slice(&self.x);
        sec1[33..].copy_from_slice(&self.y);
        PublicKey::from_sec1_bytes(&sec1).map_err(|_| Error::Crypto("Invalid P-256 public key"))
    }

    /// CBOR map `{1: 2, 3: -25, -1: 1, -2: x, -3: y}`
    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            (key(1), key(KTY_EC2)),
            (key(3), key(ALG_ECDH_ES_HKDF_256)),
            (key(-1), key(CRV_P256)),
            (key(-2), Value::Bytes(self.x.to_vec())),
            (key(-3), Value::Bytes(self.y.to_vec())),
        ])
    }

    /// Parse a COSE_Key map
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = cbor::as_map(value)?;

        if cbor::get(map, 1).and_then(cbor::as_i64) != Some(KTY_EC2) {
            return Err(Error::InvalidResponse("COSE key is not EC2"));
        }
        if cbor::get(map, -1).and_then(cbor::as_i64) != Some(CRV_P256) {
            return Err(Error::InvalidResponse("COSE key is not on P-256"));
        }

        let coordinate = |label: i64| -> Result<[u8; 32]> {
            let bytes = cbor::get(map, label)
                .and_then(cbor::as_bytes)
                .ok_or(Error::InvalidResponse("COSE key coordinate missing"))?;
            bytes
                .try_into()
                .map_err(|_| Error::InvalidResponse("COSE key coordinate must be 32 bytes"))
        };

        Ok(Self {
            x: coordinate(-2)?,
            y: coordinate(-3)?,
        })
    }
}
