//! Unit tests for intent signatures and EIP-7702 authorizations

use ethereum_types::U256;
use intent_settler::crypto::{
    recover_intent_signer, verify_intent_signature, Authorization, AuthorizationExecutor,
    UserSigner, INTENT_SIGNATURE_V_OFFSET,
};
use intent_settler::{Call, CallByUser, SettlerError};

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{
    addr, DESTINATION_CHAIN_ID, DUMMY_SENDER_CHECK_ADDR, DUMMY_XACCOUNT_ADDR, TEST_RELAYER_ADDR,
    TEST_RELAYER_KEY, TEST_USER_ADDR, TEST_USER_KEY,
};

fn check_intent(user: &UserSigner) -> CallByUser {
    CallByUser::new(
        user.address(),
        U256::from(20),
        7_078_815_900,
        vec![Call {
            target: addr(DUMMY_SENDER_CHECK_ADDR),
            call_data: vec![0x91, 0x98, 0x40, 0xad],
            value: U256::zero(),
        }],
    )
}

// ============================================================================
// KEYS
// ============================================================================

/// What is tested: address derivation for known private keys
/// Why: A wrong derivation makes every signature verify against the wrong account
#[test]
fn test_address_from_private_key() {
    let user = UserSigner::from_hex(TEST_USER_KEY).unwrap();
    let relayer = UserSigner::from_hex(TEST_RELAYER_KEY.trim_start_matches("0x")).unwrap();

    assert_eq!(user.address(), addr(TEST_USER_ADDR));
    assert_eq!(relayer.address(), addr(TEST_RELAYER_ADDR));
}

/// What is tested: malformed keys are rejected
/// Why: Key absence or corruption is fatal, never silently defaulted
#[test]
fn test_invalid_private_keys() {
    assert!(matches!(UserSigner::from_hex("0x1234"), Err(SettlerError::InvalidKey(_))));
    assert!(matches!(UserSigner::from_hex("not hex"), Err(SettlerError::InvalidKey(_))));
    // Zero is not a valid scalar
    assert!(matches!(
        UserSigner::from_hex(&"00".repeat(32)),
        Err(SettlerError::InvalidKey(_))
    ));
}

// ============================================================================
// INTENT SIGNATURES
// ============================================================================

/// What is tested: an intent signature recovers to the signer with v = recovery + 27
/// Why: The destination settler recovers with ecrecover, which expects 27/28
#[test]
fn test_intent_signature_round_trip() {
    let user = UserSigner::from_hex(TEST_USER_KEY).unwrap();
    let unsigned = check_intent(&user);
    let signature = user.sign_intent(&unsigned).unwrap();

    assert_eq!(signature.len(), 65);
    assert!(signature[64] == 27 || signature[64] == 28);

    let hash = unsigned.signing_hash().unwrap();
    assert_eq!(recover_intent_signer(&hash, &signature).unwrap(), user.address());

    let signed = unsigned.with_signature(signature);
    assert!(verify_intent_signature(&signed).is_ok());
}

/// What is tested: flipping the recovery byte recovers a different address
/// Why: Catches off-by-one errors in the +27 convention
#[test]
fn test_flipped_recovery_byte_recovers_other_address() {
    let user = UserSigner::from_hex(TEST_USER_KEY).unwrap();
    let unsigned = check_intent(&user);
    let mut signature = user.sign_intent(&unsigned).unwrap();
    signature[64] = if signature[64] == 27 { 28 } else { 27 };

    let hash = unsigned.signing_hash().unwrap();
    assert_ne!(recover_intent_signer(&hash, &signature).ok(), Some(user.address()));

    let err = verify_intent_signature(&unsigned.with_signature(signature)).unwrap_err();
    match err {
        SettlerError::SignatureMismatch { expected, recovered } => {
            assert_eq!(expected, user.address());
            assert_ne!(recovered, Some(user.address()));
        }
        other => panic!("expected SignatureMismatch, got {:?}", other),
    }
}

/// What is tested: a raw recovery id (no offset) is rejected
/// Why: Signatures must carry the offset the verifier expects
#[test]
fn test_unoffset_recovery_byte_rejected() {
    let user = UserSigner::from_hex(TEST_USER_KEY).unwrap();
    let unsigned = check_intent(&user);
    let mut signature = user.sign_intent(&unsigned).unwrap();
    signature[64] -= INTENT_SIGNATURE_V_OFFSET;

    let hash = unsigned.signing_hash().unwrap();
    assert!(recover_intent_signer(&hash, &signature).is_err());
}

/// What is tested: a signature by another key fails verification
/// Why: The settler must reject intents not signed by their user
#[test]
fn test_signature_by_other_key_rejected() {
    let user = UserSigner::from_hex(TEST_USER_KEY).unwrap();
    let relayer = UserSigner::from_hex(TEST_RELAYER_KEY).unwrap();
    let unsigned = check_intent(&user);
    let signature = relayer.sign_intent(&unsigned).unwrap();

    let err = verify_intent_signature(&unsigned.with_signature(signature)).unwrap_err();
    match err {
        SettlerError::SignatureMismatch { recovered, .. } => {
            assert_eq!(recovered, Some(relayer.address()))
        }
        other => panic!("expected SignatureMismatch, got {:?}", other),
    }
}

/// What is tested: a truncated signature is rejected
/// Why: Only 65-byte r || s || v signatures are meaningful
#[test]
fn test_truncated_signature_rejected() {
    let user = UserSigner::from_hex(TEST_USER_KEY).unwrap();
    let unsigned = check_intent(&user);
    let signature = user.sign_intent(&unsigned).unwrap();

    let err = verify_intent_signature(&unsigned.with_signature(signature[..64].to_vec())).unwrap_err();
    assert!(matches!(err, SettlerError::SignatureMismatch { recovered: None, .. }));
}

// ============================================================================
// AUTHORIZATIONS
// ============================================================================

/// What is tested: a signed authorization recovers to the delegating account
/// Why: The chain ignores authorizations whose authority does not match
#[test]
fn test_authorization_round_trip() {
    let user = UserSigner::from_hex(TEST_USER_KEY).unwrap();
    let authorization = Authorization {
        chain_id: DESTINATION_CHAIN_ID,
        address: addr(DUMMY_XACCOUNT_ADDR),
        nonce: 7,
    };
    let signed = authorization.sign(&user).unwrap();

    assert!(signed.y_parity <= 1);
    assert_eq!(signed.recover_authority().unwrap(), user.address());
}

/// What is tested: the authorization hash binds chain, contract and nonce
/// Why: An authorization must not be replayable elsewhere
#[test]
fn test_authorization_hash_binds_fields() {
    let base = Authorization {
        chain_id: DESTINATION_CHAIN_ID,
        address: addr(DUMMY_XACCOUNT_ADDR),
        nonce: 7,
    };
    let other_chain = Authorization { chain_id: 1, ..base };
    let other_contract = Authorization {
        address: addr(DUMMY_SENDER_CHECK_ADDR),
        ..base
    };
    let other_nonce = Authorization { nonce: 8, ..base };

    assert_ne!(base.signing_hash(), other_chain.signing_hash());
    assert_ne!(base.signing_hash(), other_contract.signing_hash());
    assert_ne!(base.signing_hash(), other_nonce.signing_hash());
}

/// What is tested: nonce selection for relayed and self-sent authorizations
/// Why: A self-sent transaction bumps the nonce before authorizations are applied
#[test]
fn test_authorization_nonce_for_executor() {
    assert_eq!(AuthorizationExecutor::Relayer.nonce_for(5), 5);
    assert_eq!(AuthorizationExecutor::SelfExecuting.nonce_for(5), 6);
}

/// What is tested: the authorization list entry is an RLP list of six items
/// Why: Type-0x04 transactions carry [chain_id, address, nonce, y_parity, r, s]
#[test]
fn test_authorization_rlp_item() {
    let user = UserSigner::from_hex(TEST_USER_KEY).unwrap();
    let signed = Authorization {
        chain_id: 1,
        address: addr(DUMMY_XACCOUNT_ADDR),
        nonce: 0,
    }
    .sign(&user)
    .unwrap();

    match signed.rlp_item() {
        intent_settler::rlp::RlpItem::List(items) => assert_eq!(items.len(), 6),
        other => panic!("expected a list, got {:?}", other),
    }
}
