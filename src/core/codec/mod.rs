//! Order-preserving key encoding.
//!
//! A key is encoded attribute by attribute into a fixed-width byte sequence
//! such that `memcmp` on two encodings yields the same total order as
//! comparing the decoded keys attribute-wise (numeric order for short/int,
//! byte-lexicographic order for varchar). Query bounds with wildcard slots
//! encode to the minimum or maximum of the attribute domain depending on
//! which side of the range they describe.
//!
//! Encoding per attribute type:
//! - short: 4 bytes, big-endian with the sign bit flipped
//! - int: 8 bytes, same scheme
//! - varchar: a 513-byte slot, value bytes followed by zero padding; the
//!   first padding byte doubles as the terminator, so a shorter string
//!   compares below every longer string it prefixes
//!
//! The codec is total over well-formed input: encoding a key that matches
//! the type vector cannot fail, and decoding an encoding produced here
//! reproduces the original key exactly.

use crate::core::common::types::{Attribute, AttributeType, Key, KeyPattern, MAX_VARCHAR_LENGTH};

/// Width in bytes of an encoded varchar slot (value plus terminator).
pub const VARCHAR_SLOT_LENGTH: usize = MAX_VARCHAR_LENGTH + 1;

const SHORT_SIGN_BIT: u32 = 1 << 31;
const INT_SIGN_BIT: u64 = 1 << 63;

/// Width in bytes of one encoded attribute of the given type.
pub fn encoded_attribute_size(attribute_type: AttributeType) -> usize {
    match attribute_type {
        AttributeType::Short => 4,
        AttributeType::Int => 8,
        AttributeType::Varchar => VARCHAR_SLOT_LENGTH,
    }
}

/// Total width in bytes of a key encoded under the given type vector.
pub fn encoded_key_size(attribute_types: &[AttributeType]) -> usize {
    attribute_types.iter().copied().map(encoded_attribute_size).sum()
}

/// Encodes a total key. The key must match the type vector; compatibility is
/// checked at the operation boundary before this is called.
pub fn encode_key(key: &Key, attribute_types: &[AttributeType]) -> Vec<u8> {
    debug_assert_eq!(key.attribute_count(), attribute_types.len());
    let mut out = Vec::with_capacity(encoded_key_size(attribute_types));
    for attribute in key.attributes() {
        encode_attribute(attribute, &mut out);
    }
    out
}

/// Encodes a pattern as an inclusive lower bound: wildcard slots become the
/// minimum of their attribute domain.
pub fn encode_lower_bound(pattern: &KeyPattern, attribute_types: &[AttributeType]) -> Vec<u8> {
    encode_bound(pattern, attribute_types, false)
}

/// Encodes a pattern as an inclusive upper bound: wildcard slots become the
/// maximum of their attribute domain.
pub fn encode_upper_bound(pattern: &KeyPattern, attribute_types: &[AttributeType]) -> Vec<u8> {
    encode_bound(pattern, attribute_types, true)
}

fn encode_bound(pattern: &KeyPattern, attribute_types: &[AttributeType], max: bool) -> Vec<u8> {
    debug_assert_eq!(pattern.attribute_count(), attribute_types.len());
    let mut out = Vec::with_capacity(encoded_key_size(attribute_types));
    for (slot, &attribute_type) in pattern.attributes().iter().zip(attribute_types) {
        match slot {
            Some(attribute) => encode_attribute(attribute, &mut out),
            None if max => encode_maximum(attribute_type, &mut out),
            None => encode_minimum(attribute_type, &mut out),
        }
    }
    out
}

fn encode_attribute(attribute: &Attribute, out: &mut Vec<u8>) {
    match attribute {
        Attribute::Short(value) => {
            out.extend_from_slice(&((*value as u32) ^ SHORT_SIGN_BIT).to_be_bytes());
        }
        Attribute::Int(value) => {
            out.extend_from_slice(&((*value as u64) ^ INT_SIGN_BIT).to_be_bytes());
        }
        Attribute::Varchar(bytes) => {
            debug_assert!(bytes.len() <= MAX_VARCHAR_LENGTH);
            out.extend_from_slice(bytes);
            out.resize(out.len() + (VARCHAR_SLOT_LENGTH - bytes.len()), 0);
        }
    }
}

fn encode_minimum(attribute_type: AttributeType, out: &mut Vec<u8>) {
    // Numeric minima are all-zero after the sign flip; the empty varchar is
    // already the least string.
    out.resize(out.len() + encoded_attribute_size(attribute_type), 0);
}

fn encode_maximum(attribute_type: AttributeType, out: &mut Vec<u8>) {
    match attribute_type {
        AttributeType::Short => out.extend_from_slice(&u32::MAX.to_be_bytes()),
        AttributeType::Int => out.extend_from_slice(&u64::MAX.to_be_bytes()),
        AttributeType::Varchar => {
            // 0x7F-filled to full length, with the terminator keeping the
            // slot well-formed.
            out.resize(out.len() + MAX_VARCHAR_LENGTH, 0x7F);
            out.push(0);
        }
    }
}

/// Decodes an encoding produced by [`encode_key`] back into the key.
pub fn decode_key(bytes: &[u8], attribute_types: &[AttributeType]) -> Key {
    debug_assert_eq!(bytes.len(), encoded_key_size(attribute_types));
    let mut attributes = Vec::with_capacity(attribute_types.len());
    let mut offset = 0;
    for &attribute_type in attribute_types {
        let size = encoded_attribute_size(attribute_type);
        let slot = &bytes[offset..offset + size];
        attributes.push(decode_attribute(slot, attribute_type));
        offset += size;
    }
    Key::new(attributes)
}

fn decode_attribute(slot: &[u8], attribute_type: AttributeType) -> Attribute {
    match attribute_type {
        AttributeType::Short => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(slot);
            Attribute::Short((u32::from_be_bytes(raw) ^ SHORT_SIGN_BIT) as i32)
        }
        AttributeType::Int => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(slot);
            Attribute::Int((u64::from_be_bytes(raw) ^ INT_SIGN_BIT) as i64)
        }
        AttributeType::Varchar => {
            let length = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
            Attribute::Varchar(slot[..length].to_vec())
        }
    }
}
