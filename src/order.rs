//! Cross-Chain Order Model
//!
//! The user's intent (`CallByUser`) and the values derived from it: the origin
//! data submitted to the destination settler, the message the user signs, and
//! the content-addressed order id.

use ethereum_types::{Address, H256, U256};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::abi::{AbiValue, Schema};
use crate::crypto::keccak256;
use crate::error::{SettlerError, SettlerResult};

/// Value to move: an ERC-20 token, or the native asset when `token` is the zero address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub token: Address,
    pub amount: U256,
}

impl Asset {
    /// Zero amount of the native asset.
    pub fn none() -> Self {
        Self {
            token: Address::zero(),
            amount: U256::zero(),
        }
    }

    pub fn to_abi_value(&self) -> AbiValue {
        AbiValue::Tuple(vec![
            AbiValue::Address(self.token),
            AbiValue::Uint(self.amount),
        ])
    }
}

/// One invocation performed on the user's behalf at the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub target: Address,
    #[serde(with = "hex_bytes")]
    pub call_data: Vec<u8>,
    pub value: U256,
}

impl Call {
    pub fn to_abi_value(&self) -> AbiValue {
        AbiValue::Tuple(vec![
            AbiValue::Address(self.target),
            AbiValue::Bytes(self.call_data.clone()),
            AbiValue::Uint(self.value),
        ])
    }
}

/// `Call[]` as an ABI value.
pub fn calls_to_abi_value(calls: &[Call]) -> AbiValue {
    AbiValue::Array(calls.iter().map(Call::to_abi_value).collect())
}

/// Content-addressed order identifier: keccak256 of the encoded origin data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub H256);

impl OrderId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_fixed_bytes()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// The user's cross-chain intent.
///
/// `signature` covers `abi.encode(calls, nonce)` only, so it can be computed first
/// and inserted afterwards. Any change to any field changes the order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallByUser {
    pub user: Address,
    pub nonce: U256,
    pub asset: Asset,
    pub chain_id: u64,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub calls: Vec<Call>,
}

impl CallByUser {
    /// Creates an unsigned intent (empty signature).
    pub fn new(user: Address, nonce: U256, chain_id: u64, calls: Vec<Call>) -> Self {
        Self {
            user,
            nonce,
            asset: Asset::none(),
            chain_id,
            signature: Vec::new(),
            calls,
        }
    }

    /// Returns this intent with `signature` inserted.
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    fn ensure_calls(&self) -> SettlerResult<()> {
        if self.calls.is_empty() {
            return Err(SettlerError::SchemaMismatch {
                path: "calls".to_string(),
                expected: "at least one call".to_string(),
                found: "empty array".to_string(),
            });
        }
        Ok(())
    }

    /// The full struct as a single tuple value.
    pub fn to_abi_value(&self) -> AbiValue {
        AbiValue::Tuple(vec![
            AbiValue::Address(self.user),
            AbiValue::Uint(self.nonce),
            self.asset.to_abi_value(),
            AbiValue::uint(self.chain_id),
            AbiValue::Bytes(self.signature.clone()),
            calls_to_abi_value(&self.calls),
        ])
    }

    /// `abi.encode(CallByUser)`: the origin data passed to `fill`.
    pub fn encode_origin_data(&self) -> SettlerResult<Vec<u8>> {
        self.ensure_calls()?;
        Schema::OriginData.encode(&[self.to_abi_value()])
    }

    /// `abi.encode(Call[] calls, uint256 nonce)`: the message covered by `signature`.
    pub fn signing_message(&self) -> SettlerResult<Vec<u8>> {
        self.ensure_calls()?;
        Schema::CallsWithNonce.encode(&[calls_to_abi_value(&self.calls), AbiValue::Uint(self.nonce)])
    }

    /// keccak256 of [`signing_message`](Self::signing_message).
    pub fn signing_hash(&self) -> SettlerResult<[u8; 32]> {
        Ok(keccak256(&self.signing_message()?))
    }

    /// keccak256 of the origin data.
    pub fn order_id(&self) -> SettlerResult<OrderId> {
        Ok(OrderId(H256(keccak256(&self.encode_origin_data()?))))
    }
}

/// A uniformly random 256-bit nonce.
pub fn random_nonce() -> U256 {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    U256::from_big_endian(&bytes)
}

/// Serde adapter for `0x`-prefixed hex byte strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let clean = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(clean).map_err(serde::de::Error::custom)
    }
}
