//! Intent settlement client
//!
//! Encodes and signs cross-chain intents, submits opens and fills to EVM chains,
//! and proves fills through a receipt proof service so fillers can claim rewards.

pub mod abi;
pub mod artifacts;
pub mod config;
pub mod crypto;
pub mod error;
pub mod evm_client;
pub mod order;
pub mod proof;
pub mod rlp;
pub mod settlement;

// Re-export public types for convenience
pub use artifacts::ContractArtifact;
pub use config::{Config, Deployments};
pub use crypto::{
    recover_intent_signer, verify_intent_signature, Authorization, AuthorizationExecutor,
    SignedAuthorization, UserSigner,
};
pub use error::{SettlerError, SettlerResult};
pub use evm_client::{
    find_log_index, EvmClient, EvmLog, LogFilter, ReceiptWaitConfig, TransactionReceipt,
    TransactionRequest,
};
pub use order::{Asset, Call, CallByUser, OrderId};
pub use proof::{ProofApiClient, ProofPoller, ProofRequest, ProofStatus, ProofTransport, ReceiptProof};
pub use settlement::{
    CrossChainFill, DelegatedFill, DelegationContracts, Settlement, SimpleContracts,
};
