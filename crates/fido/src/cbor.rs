//! CBOR helpers over [`ciborium::Value`]
//!
//! CTAP2 maps use small integer keys; requests are built with keys in
//! ascending canonical order.

use ciborium::Value;

use crate::{Error, Result};

/// Serialize a value to bytes
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| Error::Cbor(e.to_string()))?;
    Ok(out)
}

/// Parse bytes into a value
pub fn decode(data: &[u8]) -> Result<Value> {
    ciborium::de::from_reader(data).map_err(|e| Error::Cbor(e.to_string()))
}

/// Integer key
pub fn key(k: i64) -> Value {
    Value::Integer(k.into())
}

/// Entries of a map value
pub fn as_map(value: &Value) -> Result<&[(Value, Value)]> {
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(Error::InvalidResponse("Expected a CBOR map")),
    }
}

/// Look up an integer key in a map
pub fn get(map: &[(Value, Value)], k: i64) -> Option<&Value> {
    map.iter()
        .find(|(key, _)| matches!(key, Value::Integer(i) if i128::from(*i) == i128::from(k)))
        .map(|(_, value)| value)
}

/// Integer value that fits in a `u8`
pub fn as_u8(value: &Value) -> Option<u8> {
    match value {
        Value::Integer(i) => u8::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}

/// Integer value as `i64`
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}

/// Byte string value
pub fn as_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Bytes(bytes) => Some(bytes),
        _ => None,
    }
}
