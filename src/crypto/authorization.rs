//! EIP-7702 Authorizations
//!
//! A user signs `(chain_id, contract_address, nonce)` so that a transaction sent by
//! a relayer runs the contract's code in the user's account. The nonce binds the
//! authorization to the user's current transaction count, so it is usable once.

use ethereum_types::Address;

use super::{keccak256, recover_prehash_signer, UserSigner};
use crate::error::SettlerResult;
use crate::rlp::RlpItem;

/// Domain prefix of the authorization signing payload
pub const AUTHORIZATION_MAGIC: u8 = 0x05;

/// Who sends the transaction that carries the authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationExecutor {
    /// Another account (the relayer) sends it: the user's nonce is unchanged when
    /// the authorization is processed.
    Relayer,
    /// The user sends it: the sender's nonce is bumped before authorizations are
    /// processed, so the authorization must carry count + 1.
    SelfExecuting,
}

impl AuthorizationExecutor {
    /// Authorization nonce for an account whose current transaction count is `count`.
    pub fn nonce_for(&self, count: u64) -> u64 {
        match self {
            AuthorizationExecutor::Relayer => count,
            AuthorizationExecutor::SelfExecuting => count + 1,
        }
    }
}

/// Unsigned authorization tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorization {
    pub chain_id: u64,
    /// Contract whose code is delegated to
    pub address: Address,
    pub nonce: u64,
}

impl Authorization {
    /// keccak256(0x05 || rlp([chain_id, address, nonce]))
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut payload = vec![AUTHORIZATION_MAGIC];
        payload.extend(
            RlpItem::List(vec![
                RlpItem::uint(self.chain_id),
                RlpItem::address(&self.address),
                RlpItem::uint(self.nonce),
            ])
            .encode(),
        );
        keccak256(&payload)
    }

    /// Signs the authorization with the delegating account's key.
    pub fn sign(self, signer: &UserSigner) -> SettlerResult<SignedAuthorization> {
        let signature = signer.sign_prehash(&self.signing_hash())?;
        Ok(SignedAuthorization {
            authorization: self,
            y_parity: signature.recovery_id,
            r: signature.r,
            s: signature.s,
        })
    }
}

/// Authorization plus the signer's `y_parity, r, s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedAuthorization {
    pub authorization: Authorization,
    pub y_parity: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl SignedAuthorization {
    /// Entry of a type-0x04 transaction's authorization list:
    /// `[chain_id, address, nonce, y_parity, r, s]`.
    pub fn rlp_item(&self) -> RlpItem {
        RlpItem::List(vec![
            RlpItem::uint(self.authorization.chain_id),
            RlpItem::address(&self.authorization.address),
            RlpItem::uint(self.authorization.nonce),
            RlpItem::uint(self.y_parity as u64),
            RlpItem::uint_bytes(&self.r),
            RlpItem::uint_bytes(&self.s),
        ])
    }

    /// Address that signed this authorization.
    pub fn recover_authority(&self) -> SettlerResult<Address> {
        recover_prehash_signer(
            &self.authorization.signing_hash(),
            &self.r,
            &self.s,
            self.y_parity,
        )
    }
}
