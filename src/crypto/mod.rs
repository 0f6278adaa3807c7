//! Cryptographic Operations Module
//!
//! secp256k1 key handling for the user, relayer and deployer accounts: address
//! derivation, prehash signing, and the 65-byte intent signature verified by the
//! destination settler.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: Private keys are loaded from the environment and must never be logged.

pub mod authorization;

use ethereum_types::Address;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::error::{SettlerError, SettlerResult};
use crate::order::CallByUser;

pub use authorization::{Authorization, AuthorizationExecutor, SignedAuthorization};

/// Offset added to the recovery id to form the trailing `v` byte of an intent
/// signature. The destination settler recovers with `ecrecover`, which expects 27/28.
pub const INTENT_SIGNATURE_V_OFFSET: u8 = 27;

/// Length of an `r || s || v` signature
pub const SIGNATURE_LENGTH: usize = 65;

/// keccak256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// ECDSA signature split into its components, recovery id in {0, 1}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl RecoverableSignature {
    /// `r || s || (recovery_id + 27)`, the layout the settlement contracts recover from.
    pub fn to_intent_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recovery_id + INTENT_SIGNATURE_V_OFFSET;
        out
    }
}

/// A secp256k1 account able to sign intents, authorizations and transactions.
pub struct UserSigner {
    signing_key: SigningKey,
}

impl UserSigner {
    /// Creates a signer from a hex private key (with or without `0x`).
    ///
    /// # Returns
    ///
    /// * `Ok(UserSigner)` - Key parsed
    /// * `Err(SettlerError::InvalidKey)` - Not 32 bytes of hex, or not a valid scalar
    pub fn from_hex(private_key: &str) -> SettlerResult<Self> {
        let trimmed = private_key.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(hex_part)
            .map_err(|e| SettlerError::InvalidKey(format!("not hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(SettlerError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| SettlerError::InvalidKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// Ethereum address of this key.
    pub fn address(&self) -> Address {
        address_from_verifying_key(self.signing_key.verifying_key())
    }

    /// Signs a 32-byte digest without any message prefix.
    pub fn sign_prehash(&self, hash: &[u8; 32]) -> SettlerResult<RecoverableSignature> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| SettlerError::Signing(e.to_string()))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);

        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }

    /// Signs an intent over keccak256(abi.encode(calls, nonce)).
    ///
    /// The existing `signature` field of the order is ignored: it is not part of
    /// the signed message.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<u8>)` - 65-byte `r || s || v` with `v = recovery_id + 27`
    /// * `Err(SettlerError)` - The order could not be encoded or signed
    pub fn sign_intent(&self, order: &CallByUser) -> SettlerResult<Vec<u8>> {
        let hash = order.signing_hash()?;
        let signature = self.sign_prehash(&hash)?;
        Ok(signature.to_intent_bytes().to_vec())
    }
}

/// keccak256(uncompressed_public_key[1..])[12..32]
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recovers the signer of a prehash from its components.
pub fn recover_prehash_signer(
    hash: &[u8; 32],
    r: &[u8; 32],
    s: &[u8; 32],
    recovery_id: u8,
) -> SettlerResult<Address> {
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(r);
    rs[32..].copy_from_slice(s);
    let signature = Signature::from_slice(&rs)
        .map_err(|e| SettlerError::Signing(format!("malformed signature: {}", e)))?;
    let recovery_id = RecoveryId::from_byte(recovery_id)
        .ok_or_else(|| SettlerError::Signing(format!("invalid recovery id {}", recovery_id)))?;
    let key = VerifyingKey::recover_from_prehash(hash, &signature, recovery_id)
        .map_err(|e| SettlerError::Signing(format!("recovery failed: {}", e)))?;
    Ok(address_from_verifying_key(&key))
}

/// Recovers the signer of a 65-byte intent signature (`v` offset by 27).
pub fn recover_intent_signer(hash: &[u8; 32], signature: &[u8]) -> SettlerResult<Address> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(SettlerError::Signing(format!(
            "expected {} signature bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }
    let v = signature[64];
    let recovery_id = v.checked_sub(INTENT_SIGNATURE_V_OFFSET).ok_or_else(|| {
        SettlerError::Signing(format!(
            "v byte {} is below the {} offset",
            v, INTENT_SIGNATURE_V_OFFSET
        ))
    })?;

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&signature[..32]);
    s.copy_from_slice(&signature[32..64]);
    recover_prehash_signer(hash, &r, &s, recovery_id)
}

/// Checks that an order's signature recovers to its `user`.
///
/// # Returns
///
/// * `Ok(())` - The signature was produced by `order.user`
/// * `Err(SettlerError::SignatureMismatch)` - It recovers elsewhere or not at all
pub fn verify_intent_signature(order: &CallByUser) -> SettlerResult<()> {
    let hash = order.signing_hash()?;
    let recovered = recover_intent_signer(&hash, &order.signature).ok();
    if recovered != Some(order.user) {
        return Err(SettlerError::SignatureMismatch {
            expected: order.user,
            recovered,
        });
    }
    Ok(())
}
