//! RLP Encoding
//!
//! Recursive-length-prefix encoding for typed EVM transactions and EIP-7702
//! authorization tuples. Only encoding is needed: the client never parses RLP.

use ethereum_types::{Address, U256};

/// A single RLP item: either a byte string or a list of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    Bytes(Vec<u8>),
    List(Vec<RlpItem>),
}

impl RlpItem {
    /// Integer item (big-endian, no leading zeros; zero is the empty string).
    pub fn uint(value: u64) -> Self {
        RlpItem::Bytes(trim_leading_zeros(&value.to_be_bytes()))
    }

    /// 256-bit integer item.
    pub fn u256(value: U256) -> Self {
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        RlpItem::Bytes(trim_leading_zeros(&buf))
    }

    /// Big-endian integer given as raw bytes (signature `r`/`s`).
    pub fn uint_bytes(bytes: &[u8]) -> Self {
        RlpItem::Bytes(trim_leading_zeros(bytes))
    }

    /// 20-byte address item.
    pub fn address(address: &Address) -> Self {
        RlpItem::Bytes(address.as_bytes().to_vec())
    }

    pub fn bytes(data: &[u8]) -> Self {
        RlpItem::Bytes(data.to_vec())
    }

    /// Encodes this item.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RlpItem::Bytes(data) => encode_bytes(data),
            RlpItem::List(items) => {
                let payload: Vec<u8> = items.iter().flat_map(|item| item.encode()).collect();
                let mut out = encode_length(payload.len(), 0xc0);
                out.extend(payload);
                out
            }
        }
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

fn encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        // Single byte below 0x80: encoded as itself
        return vec![data[0]];
    }
    let mut out = encode_length(data.len(), 0x80);
    out.extend_from_slice(data);
    out
}

/// Length prefix for a payload; `offset` is 0x80 for strings and 0xc0 for lists.
fn encode_length(len: usize, offset: u8) -> Vec<u8> {
    if len <= 55 {
        vec![offset + len as u8]
    } else {
        let len_bytes = trim_leading_zeros(&(len as u64).to_be_bytes());
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend(len_bytes);
        out
    }
}
