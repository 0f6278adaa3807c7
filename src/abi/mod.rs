//! ABI Encoding Module
//!
//! Deterministic Solidity ABI encoding (`abi.encode` layout) for the settlement
//! structs and contract calls. Types are described by [`AbiType`] descriptors and
//! runtime values by [`AbiValue`]; every value is checked against its declared type
//! before a single byte is written.
//!
//! Layout rules:
//! - every static value occupies one 32-byte word, numbers big-endian and left-padded
//! - addresses are left-padded to 32 bytes
//! - `bytes`/`string` are a length word followed by the data, right-padded to a word
//! - dynamic members are referenced from the head by a byte offset into the tail

pub mod schema;

use ethereum_types::{Address, U256};

use crate::crypto::keccak256;
use crate::error::{SettlerError, SettlerResult};

pub use schema::{Function, Schema};

/// Size of one ABI word in bytes
pub const WORD: usize = 32;

// ============================================================================
// TYPE AND VALUE MODEL
// ============================================================================

/// A named component of a tuple type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: AbiType,
}

impl Param {
    pub fn new(name: &str, kind: AbiType) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Declared ABI type of a field or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Address,
    /// Unsigned integer with the given bit width (8..=256, multiple of 8)
    Uint(usize),
    Bool,
    /// `bytesN` with N in 1..=32
    FixedBytes(usize),
    Bytes,
    String,
    /// Dynamic-length array `T[]`
    Array(Box<AbiType>),
    Tuple(Vec<Param>),
}

/// Runtime value to be encoded against an [`AbiType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Bool(bool),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiType {
    /// Builds a tuple type from `(name, type)` pairs.
    pub fn tuple(components: Vec<(&str, AbiType)>) -> Self {
        AbiType::Tuple(
            components
                .into_iter()
                .map(|(name, kind)| Param::new(name, kind))
                .collect(),
        )
    }

    /// Builds the dynamic array type `inner[]`.
    pub fn array(inner: AbiType) -> Self {
        AbiType::Array(Box::new(inner))
    }

    /// Canonical type string as used in function and event signatures.
    pub fn canonical(&self) -> String {
        match self {
            AbiType::Address => "address".to_string(),
            AbiType::Uint(bits) => format!("uint{}", bits),
            AbiType::Bool => "bool".to_string(),
            AbiType::FixedBytes(size) => format!("bytes{}", size),
            AbiType::Bytes => "bytes".to_string(),
            AbiType::String => "string".to_string(),
            AbiType::Array(inner) => format!("{}[]", inner.canonical()),
            AbiType::Tuple(components) => format!(
                "({})",
                components
                    .iter()
                    .map(|c| c.kind.canonical())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    /// Whether the encoding of this type lives in the tail (referenced by offset).
    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiType::Bytes | AbiType::String | AbiType::Array(_) => true,
            AbiType::Tuple(components) => components.iter().any(|c| c.kind.is_dynamic()),
            _ => false,
        }
    }

    /// Number of head bytes this type occupies inside an enclosing sequence.
    fn head_size(&self) -> usize {
        match self {
            AbiType::Tuple(components) if !self.is_dynamic() => {
                components.iter().map(|c| c.kind.head_size()).sum()
            }
            _ => WORD,
        }
    }
}

impl AbiValue {
    pub fn uint(value: u64) -> Self {
        AbiValue::Uint(U256::from(value))
    }

    /// Short name of the value's runtime kind, used in mismatch errors.
    pub fn kind_name(&self) -> String {
        match self {
            AbiValue::Address(_) => "address".to_string(),
            AbiValue::Uint(_) => "uint".to_string(),
            AbiValue::Bool(_) => "bool".to_string(),
            AbiValue::FixedBytes(b) => format!("bytes{}", b.len()),
            AbiValue::Bytes(_) => "bytes".to_string(),
            AbiValue::String(_) => "string".to_string(),
            AbiValue::Array(items) => format!("array of {}", items.len()),
            AbiValue::Tuple(items) => format!("tuple of {}", items.len()),
        }
    }
}

// ============================================================================
// ENCODING
// ============================================================================

/// Encodes a parameter list exactly as Solidity's `abi.encode(...)` would.
///
/// # Arguments
///
/// * `types` - Declared parameter types
/// * `values` - Runtime values, one per declared type
///
/// # Returns
///
/// * `Ok(Vec<u8>)` - Encoded bytes (a multiple of 32 bytes)
/// * `Err(SettlerError::SchemaMismatch)` - A value does not match its type, or arity differs
/// * `Err(SettlerError::ValueOutOfRange)` - A number exceeds its declared width
pub fn encode_params(types: &[AbiType], values: &[AbiValue]) -> SettlerResult<Vec<u8>> {
    let items: Vec<(String, &AbiType)> = types
        .iter()
        .enumerate()
        .map(|(i, t)| (format!("${}", i), t))
        .collect();
    encode_sequence(&items, values, "params")
}

/// Encodes a sequence of typed values (tuple components, array elements or params).
fn encode_sequence(
    items: &[(String, &AbiType)],
    values: &[AbiValue],
    path: &str,
) -> SettlerResult<Vec<u8>> {
    if items.len() != values.len() {
        return Err(SettlerError::SchemaMismatch {
            path: path.to_string(),
            expected: format!("{} values", items.len()),
            found: format!("{} values", values.len()),
        });
    }

    let head_size: usize = items.iter().map(|(_, t)| t.head_size()).sum();
    let mut head = Vec::with_capacity(head_size);
    let mut tail = Vec::new();

    for ((name, kind), value) in items.iter().zip(values) {
        let field_path = if name.starts_with('[') {
            format!("{}{}", path, name)
        } else {
            format!("{}.{}", path, name)
        };
        let encoded = encode_value(kind, value, &field_path)?;
        if kind.is_dynamic() {
            head.extend_from_slice(&uint_word(U256::from(head_size + tail.len())));
            tail.extend(encoded);
        } else {
            head.extend(encoded);
        }
    }

    head.extend(tail);
    Ok(head)
}

/// Encodes one value in place (head encoding for static types, tail encoding for dynamic ones).
fn encode_value(kind: &AbiType, value: &AbiValue, path: &str) -> SettlerResult<Vec<u8>> {
    match (kind, value) {
        (AbiType::Address, AbiValue::Address(address)) => {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(address.as_bytes());
            Ok(word.to_vec())
        }
        (AbiType::Uint(bits), AbiValue::Uint(number)) => {
            if number.bits() > *bits {
                return Err(SettlerError::ValueOutOfRange {
                    path: path.to_string(),
                    bits: *bits,
                });
            }
            Ok(uint_word(*number).to_vec())
        }
        (AbiType::Bool, AbiValue::Bool(flag)) => Ok(uint_word(U256::from(*flag as u8)).to_vec()),
        (AbiType::FixedBytes(size), AbiValue::FixedBytes(data)) if data.len() == *size => {
            let mut word = [0u8; WORD];
            word[..data.len()].copy_from_slice(data);
            Ok(word.to_vec())
        }
        (AbiType::Bytes, AbiValue::Bytes(data)) => Ok(encode_dynamic_bytes(data)),
        (AbiType::String, AbiValue::String(text)) => Ok(encode_dynamic_bytes(text.as_bytes())),
        (AbiType::Array(inner), AbiValue::Array(elements)) => {
            let items: Vec<(String, &AbiType)> = (0..elements.len())
                .map(|i| (format!("[{}]", i), inner.as_ref()))
                .collect();
            let mut out = uint_word(U256::from(elements.len())).to_vec();
            out.extend(encode_sequence(&items, elements, path)?);
            Ok(out)
        }
        (AbiType::Tuple(components), AbiValue::Tuple(fields)) => {
            let items: Vec<(String, &AbiType)> = components
                .iter()
                .map(|c| (c.name.clone(), &c.kind))
                .collect();
            encode_sequence(&items, fields, path)
        }
        (kind, value) => Err(SettlerError::SchemaMismatch {
            path: path.to_string(),
            expected: kind.canonical(),
            found: value.kind_name(),
        }),
    }
}

fn encode_dynamic_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = uint_word(U256::from(data.len())).to_vec();
    out.extend_from_slice(data);
    let padding = (WORD - data.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

/// A 256-bit number as one big-endian word.
pub fn uint_word(value: U256) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    value.to_big_endian(&mut word);
    word
}

// ============================================================================
// SELECTORS, TOPICS AND WORD DECODING
// ============================================================================

/// First four bytes of keccak256 of a canonical function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic hash (topics[0]) of a canonical event signature.
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// Reads an address from a left-padded 32-byte word.
pub fn decode_address(word: &[u8]) -> Option<Address> {
    if word.len() != WORD {
        return None;
    }
    Some(Address::from_slice(&word[12..]))
}
