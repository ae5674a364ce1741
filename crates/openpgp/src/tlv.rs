//! BER-TLV helpers for OpenPGP data objects
//!
//! Parsing goes through [`iso7816_tlv::ber`]. Encoding of the private key
//! template is done by hand: the `7F48` object carries bare tag/length
//! headers, which is not a valid typed BER value.

use std::collections::BTreeMap;

use iso7816_tlv::ber::{Tag, Tlv, Value};

use crate::{Error, Result};

/// Numeric form of a tag (`0x7F49`, `0xC4`, ...)
pub(crate) fn tag_number(tag: &Tag) -> u16 {
    tag.to_bytes()
        .iter()
        .fold(0u16, |acc, byte| (acc << 8) | u16::from(*byte))
}

/// Build a [`Tag`] from its numeric form
pub(crate) fn tag(number: u16) -> Result<Tag> {
    Ok(Tag::try_from(number)?)
}

/// BER length field for `len`
pub(crate) fn encode_length(len: usize) -> Vec<u8> {
    match len {
        0..=0x7F => vec![len as u8],
        0x80..=0xFF => vec![0x81, len as u8],
        _ => vec![0x82, (len >> 8) as u8, len as u8],
    }
}

/// Append `tag || length || value` to `out`
pub(crate) fn write_tlv(out: &mut Vec<u8>, tag: u16, value: &[u8]) {
    if tag > 0xFF {
        out.extend_from_slice(&tag.to_be_bytes());
    } else {
        out.push(tag as u8);
    }
    out.extend(encode_length(value.len()));
    out.extend_from_slice(value);
}

/// Split a single-byte-tag TLV header off `data`, returning the declared
/// length and the bytes following the header
pub(crate) fn split_header(data: &[u8]) -> Result<(usize, &[u8])> {
    match data {
        [_, len @ 0..=0x7F, rest @ ..] => Ok((usize::from(*len), rest)),
        [_, 0x81, len, rest @ ..] => Ok((usize::from(*len), rest)),
        [_, 0x82, hi, lo, rest @ ..] => Ok((usize::from(u16::from_be_bytes([*hi, *lo])), rest)),
        _ => Err(Error::InvalidData("Truncated TLV header")),
    }
}

/// Parse consecutive TLVs until the input is exhausted
pub(crate) fn parse_all(mut data: &[u8]) -> Result<Vec<Tlv>> {
    let mut tlvs = Vec::new();
    while !data.is_empty() {
        let (tlv, rest) = Tlv::parse(data);
        tlvs.push(tlv?);
        data = rest;
    }
    Ok(tlvs)
}

/// Parse consecutive TLVs, stopping silently at the first malformed one
pub(crate) fn parse_lenient(mut data: &[u8]) -> Vec<Tlv> {
    let mut tlvs = Vec::new();
    while !data.is_empty() {
        match Tlv::parse(data) {
            (Ok(tlv), rest) => {
                tlvs.push(tlv);
                data = rest;
            }
            (Err(_), _) => break,
        }
    }
    tlvs
}

/// Unwrap the value of an outer TLV, checking its tag
pub(crate) fn unpack(expected: u16, data: &[u8]) -> Result<Value> {
    let tlv = Tlv::from_bytes(data)?;
    if tag_number(tlv.tag()) != expected {
        return Err(Error::InvalidData("Unexpected outer tag"));
    }
    Ok(tlv.value().clone())
}

/// Primitive children of a TLV list keyed by tag
pub(crate) fn primitive_map(tlvs: &[Tlv]) -> BTreeMap<u16, Vec<u8>> {
    tlvs.iter()
        .filter_map(|tlv| match tlv.value() {
            Value::Primitive(data) => Some((tag_number(tlv.tag()), data.clone())),
            Value::Constructed(_) => None,
        })
        .collect()
}

/// Every primitive object in a TLV tree, depth first, keyed by tag
///
/// The first occurrence of a tag wins.
pub(crate) fn flatten(tlv: &Tlv, out: &mut BTreeMap<u16, Vec<u8>>) {
    match tlv.value() {
        Value::Primitive(data) => {
            out.entry(tag_number(tlv.tag())).or_insert_with(|| data.clone());
        }
        Value::Constructed(children) => {
            for child in children {
                flatten(child, out);
            }
        }
    }
}

/// Primitive value of `tlv` when it carries `tag`
pub(crate) fn get_primitive_value(tag: u16, tlv: &Tlv) -> Result<Vec<u8>> {
    match tlv.value() {
        Value::Primitive(data) if tag_number(tlv.tag()) == tag => Ok(data.clone()),
        _ => Err(Error::InvalidData("Expected primitive TLV")),
    }
}
