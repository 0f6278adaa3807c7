//! Schema Registry
//!
//! The single definition of every on-chain data shape the client encodes:
//! the settlement structs (`Asset`, `Call`, `CallByUser`), the two message
//! schemas built from them, and the settlement contract entry points.

use super::{encode_params, function_selector, AbiType, AbiValue, Param};
use crate::error::SettlerResult;

/// `struct Asset { address token; uint256 amount; }`
pub fn asset() -> AbiType {
    AbiType::tuple(vec![
        ("token", AbiType::Address),
        ("amount", AbiType::Uint(256)),
    ])
}

/// `struct Call { address target; bytes callData; uint256 value; }`
pub fn call() -> AbiType {
    AbiType::tuple(vec![
        ("target", AbiType::Address),
        ("callData", AbiType::Bytes),
        ("value", AbiType::Uint(256)),
    ])
}

/// `Call[]`
pub fn calls() -> AbiType {
    AbiType::array(call())
}

/// `struct CallByUser { address user; uint256 nonce; Asset asset; uint64 chainId; bytes signature; Call[] calls; }`
pub fn call_by_user() -> AbiType {
    AbiType::tuple(vec![
        ("user", AbiType::Address),
        ("nonce", AbiType::Uint(256)),
        ("asset", asset()),
        ("chainId", AbiType::Uint(64)),
        ("signature", AbiType::Bytes),
        ("calls", calls()),
    ])
}

/// Message schemas. Each variant encodes its own parameter list and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// `abi.encode(CallByUser)`: the order's origin data, signature included
    OriginData,
    /// `abi.encode(Call[] calls, uint256 nonce)`: the message the user signs
    CallsWithNonce,
}

impl Schema {
    /// Declared parameter types of this schema.
    pub fn params(&self) -> Vec<AbiType> {
        match self {
            Schema::OriginData => vec![call_by_user()],
            Schema::CallsWithNonce => vec![calls(), AbiType::Uint(256)],
        }
    }

    /// Encodes `values` against this schema only.
    pub fn encode(&self, values: &[AbiValue]) -> SettlerResult<Vec<u8>> {
        encode_params(&self.params(), values)
    }
}

// ============================================================================
// CONTRACT ENTRY POINTS
// ============================================================================

/// A contract function: name plus named inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: &'static str,
    pub inputs: Vec<Param>,
}

impl Function {
    /// Canonical signature, e.g. `fill(bytes32,bytes)`.
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.inputs.iter().map(|p| p.kind.canonical()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        function_selector(&self.signature())
    }

    /// Calldata: selector followed by the ABI-encoded arguments.
    pub fn encode_call(&self, args: &[AbiValue]) -> SettlerResult<Vec<u8>> {
        let types: Vec<AbiType> = self.inputs.iter().map(|p| p.kind.clone()).collect();
        let mut data = self.selector().to_vec();
        data.extend(encode_params(&types, args)?);
        Ok(data)
    }
}

/// `SimpleOriginSettler.open(uint64 destinationChainId, Call[] calls, address destinationSettler)`
pub fn open_function() -> Function {
    Function {
        name: "open",
        inputs: vec![
            Param::new("destinationChainId", AbiType::Uint(64)),
            Param::new("calls", calls()),
            Param::new("destinationSettler", AbiType::Address),
        ],
    }
}

/// `DestinationSettler.fill(bytes32 orderId, bytes originData)`
pub fn fill_function() -> Function {
    Function {
        name: "fill",
        inputs: vec![
            Param::new("orderId", AbiType::FixedBytes(32)),
            Param::new("originData", AbiType::Bytes),
        ],
    }
}

/// `SimpleOriginSettler.repayFiller(uint256 logIndex, bytes proof)`
pub fn repay_filler_function() -> Function {
    Function {
        name: "repayFiller",
        inputs: vec![
            Param::new("logIndex", AbiType::Uint(256)),
            Param::new("proof", AbiType::Bytes),
        ],
    }
}
