//! Error Types
//!
//! Typed failures raised by the settlement client. Binaries wrap these in
//! `anyhow::Error` with context; callers that need to branch on a specific
//! failure use `downcast_ref::<SettlerError>()`.

use ethereum_types::Address;
use thiserror::Error;

/// Errors raised while building, signing, submitting or proving a cross-chain order.
#[derive(Debug, Error)]
pub enum SettlerError {
    /// A required key, address or endpoint is absent from config and environment
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// A value's runtime type does not match its declared ABI type
    #[error("ABI schema mismatch at '{path}': expected {expected}, found {found}")]
    SchemaMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// A numeric value exceeds the bit width of its declared ABI type
    #[error("Value out of range at '{path}': does not fit in uint{bits}")]
    ValueOutOfRange { path: String, bits: usize },

    /// A signature recovered to an address other than the expected signer
    #[error("Signature mismatch: expected signer {expected:?}, recovered {recovered:?}")]
    SignatureMismatch {
        expected: Address,
        recovered: Option<Address>,
    },

    /// Transport or node failure on a JSON-RPC call
    #[error("RPC error calling {method}: {message}")]
    Rpc { method: String, message: String },

    /// The proof service reported an error for the job
    #[error("Proof generation failed for jobId {job_id}")]
    ProofGenerationFailed { job_id: String },

    /// The proof job never resolved within the attempt budget
    #[error("Proof polling timed out for jobId {job_id} after {attempts} attempts")]
    ProofPollingTimedOut { job_id: String, attempts: u32 },

    /// The expected event log is absent from a receipt
    #[error("Event {event} not found in logs emitted by {address:?}")]
    EventNotFound { event: String, address: Address },

    /// The transaction was not mined before the receipt-wait timeout elapsed
    #[error("Timed out after {waited_ms}ms waiting for receipt of {tx_hash}")]
    ReceiptTimeout { tx_hash: String, waited_ms: u64 },

    /// The receipt wait was cancelled before the transaction was mined
    #[error("Cancelled while waiting for receipt of {tx_hash}")]
    Cancelled { tx_hash: String },

    /// The transaction was mined but reverted
    #[error("Transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: String },

    /// A private key could not be parsed
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// The signing primitive failed
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Convenience alias for results carrying a [`SettlerError`].
pub type SettlerResult<T> = std::result::Result<T, SettlerError>;

impl SettlerError {
    /// Builds an RPC error from a method name and any displayable cause.
    pub fn rpc(method: &str, message: impl std::fmt::Display) -> Self {
        SettlerError::Rpc {
            method: method.to_string(),
            message: message.to_string(),
        }
    }
}
