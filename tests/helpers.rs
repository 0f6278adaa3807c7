//! Shared test helpers for intent-settler integration tests
//!
//! Constants for accounts, contracts and chains, plus JSON-RPC mock builders.

#![allow(dead_code)]

use ethereum_types::{Address, H256};
use intent_settler::crypto::{keccak256, recover_prehash_signer};
use serde_json::{json, Value};
use std::str::FromStr;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- ACCOUNTS --------------------------------

/// Private key 1; its address is a well-known test vector
pub const TEST_USER_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";
pub const TEST_USER_ADDR: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";

/// Private key 2
pub const TEST_RELAYER_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000002";
pub const TEST_RELAYER_ADDR: &str = "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf";

/// Placeholder intent owner of the end-to-end encoding vector
pub const DUMMY_USER_ADDR: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

// ------------------------------- CONTRACTS --------------------------------

pub const DUMMY_HELLO_WORLD_ADDR: &str = "0x1111111111111111111111111111111111111111";
pub const DUMMY_ORIGIN_SETTLER_ADDR: &str = "0x2222222222222222222222222222222222222222";
pub const DUMMY_DESTINATION_SETTLER_ADDR: &str = "0x3333333333333333333333333333333333333333";
pub const DUMMY_SENDER_CHECK_ADDR: &str = "0x4444444444444444444444444444444444444444";
pub const DUMMY_XACCOUNT_ADDR: &str = "0x5555555555555555555555555555555555555555";
pub const DUMMY_OTHER_CONTRACT_ADDR: &str = "0x6666666666666666666666666666666666666666";
pub const DUMMY_DEPLOYED_ADDR: &str = "0x7777777777777777777777777777777777777777";

// --------------------------------- CHAINS ---------------------------------

pub const ORIGIN_CHAIN_ID: u64 = 84532;
pub const DESTINATION_CHAIN_ID: u64 = 11155420;

// ------------------------------ TRANSACTIONS ------------------------------

pub const DUMMY_TX_HASH: &str = "0x00000000000000000000000000000000000000000000000000000000000000a1";
pub const DUMMY_OPEN_TX_HASH: &str = "0x00000000000000000000000000000000000000000000000000000000000000a2";
pub const DUMMY_FILL_TX_HASH: &str = "0x00000000000000000000000000000000000000000000000000000000000000a3";
pub const DUMMY_BLOCK_HASH: &str = "0x00000000000000000000000000000000000000000000000000000000000000b1";

/// Arbitrary stand-in for an event topic
pub const DUMMY_EVENT_TOPIC: &str = "0x00000000000000000000000000000000000000000000000000000000000000c1";

/// `0xdeadbeef` in base64
pub const DUMMY_PROOF_BASE64: &str = "3q2+7w==";

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

pub fn addr(value: &str) -> Address {
    Address::from_str(value.trim_start_matches("0x")).unwrap()
}

pub fn h256(value: &str) -> H256 {
    H256::from_str(value.trim_start_matches("0x")).unwrap()
}

/// An address left-padded to a 32-byte topic.
pub fn address_topic(address: Address) -> H256 {
    H256::from(address)
}

/// Successful JSON-RPC response carrying `result`.
pub fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": 1
    }))
}

/// Mounts a response for every request calling `rpc_method`.
pub async fn mount_rpc(server: &MockServer, rpc_method: &str, result: Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(rpc_result(result))
        .mount(server)
        .await;
}

/// Mounts the reads every transaction submission performs.
pub async fn mount_tx_defaults(server: &MockServer, tx_count: u64) {
    mount_rpc(server, "eth_getTransactionCount", json!(format!("0x{:x}", tx_count))).await;
    mount_rpc(server, "eth_gasPrice", json!("0x3b9aca00")).await;
    mount_rpc(server, "eth_maxPriorityFeePerGas", json!("0x5f5e100")).await;
}

/// A log entry as returned by a node.
pub fn log_json(address: &str, topics: &[H256], data: &str) -> Value {
    json!({
        "address": address,
        "topics": topics,
        "data": data,
        "blockNumber": "0x10",
        "transactionHash": DUMMY_FILL_TX_HASH,
        "logIndex": "0x0"
    })
}

/// A mined receipt.
pub fn receipt_json(tx_hash: &str, status: &str, logs: Vec<Value>) -> Value {
    json!({
        "transactionHash": tx_hash,
        "blockNumber": "0x10",
        "blockHash": DUMMY_BLOCK_HASH,
        "transactionIndex": "0x3",
        "contractAddress": null,
        "status": status,
        "logs": logs
    })
}

pub fn block_json() -> Value {
    json!({
        "hash": DUMMY_BLOCK_HASH,
        "number": "0x10",
        "timestamp": "0x6553f100"
    })
}

/// Raw transactions submitted to `server`, decoded from hex.
pub async fn sent_raw_transactions(server: &MockServer) -> Vec<Vec<u8>> {
    let requests = server.received_requests().await.unwrap_or_default();
    requests
        .iter()
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .filter(|body| body["method"] == "eth_sendRawTransaction")
        .map(|body| {
            let raw = body["params"][0].as_str().unwrap().trim_start_matches("0x").to_string();
            hex::decode(raw).unwrap()
        })
        .collect()
}

/// Number of requests calling `rpc_method` received by `server`.
pub async fn count_calls(server: &MockServer, rpc_method: &str) -> usize {
    let requests = server.received_requests().await.unwrap_or_default();
    requests
        .iter()
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .filter(|body| body["method"] == rpc_method)
        .count()
}

/// Reads one RLP string item at `pos`, returning its payload and the next position.
fn rlp_item(raw: &[u8], pos: usize) -> (Vec<u8>, usize) {
    let prefix = raw[pos];
    match prefix {
        0x00..=0x7f => (vec![prefix], pos + 1),
        0x80..=0xb7 => {
            let len = (prefix - 0x80) as usize;
            (raw[pos + 1..pos + 1 + len].to_vec(), pos + 1 + len)
        }
        _ => panic!("unexpected RLP prefix 0x{:02x} at {}", prefix, pos),
    }
}

/// Chain ID and nonce of a typed (EIP-2718) signed transaction.
pub fn typed_tx_chain_and_nonce(raw: &[u8]) -> (u64, u64) {
    let list_prefix = raw[1];
    let mut pos = if list_prefix >= 0xf8 {
        2 + (list_prefix - 0xf7) as usize
    } else {
        2
    };
    let (chain_id, next) = rlp_item(raw, pos);
    pos = next;
    let (nonce, _) = rlp_item(raw, pos);
    let to_u64 = |bytes: &[u8]| bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    (to_u64(&chain_id), to_u64(&nonce))
}

/// Header of the RLP item at `pos`: (is_list, payload start, payload length).
fn rlp_header(raw: &[u8], pos: usize) -> (bool, usize, usize) {
    let prefix = raw[pos];
    let be_len = |start: usize, n: usize| {
        raw[start..start + n]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize)
    };
    match prefix {
        0x00..=0x7f => (false, pos, 1),
        0x80..=0xb7 => (false, pos + 1, (prefix - 0x80) as usize),
        0xb8..=0xbf => {
            let n = (prefix - 0xb7) as usize;
            (false, pos + 1 + n, be_len(pos + 1, n))
        }
        0xc0..=0xf7 => (true, pos + 1, (prefix - 0xc0) as usize),
        _ => {
            let n = (prefix - 0xf7) as usize;
            (true, pos + 1 + n, be_len(pos + 1, n))
        }
    }
}

/// One top-level field of a signed typed transaction.
pub struct RlpField {
    /// Full encoding, header included
    pub encoded: Vec<u8>,
    /// String payload (list payloads are left encoded)
    pub payload: Vec<u8>,
}

/// Splits a signed typed (EIP-2718) transaction into its top-level RLP fields.
pub fn typed_tx_fields(raw: &[u8]) -> Vec<RlpField> {
    let (is_list, start, len) = rlp_header(raw, 1);
    assert!(is_list, "transaction body is not an RLP list");
    let end = start + len;
    assert_eq!(end, raw.len(), "trailing bytes after transaction body");

    let mut fields = Vec::new();
    let mut pos = start;
    while pos < end {
        let (_, payload_start, payload_len) = rlp_header(raw, pos);
        let item_end = payload_start + payload_len;
        fields.push(RlpField {
            encoded: raw[pos..item_end].to_vec(),
            payload: raw[payload_start..item_end].to_vec(),
        });
        pos = item_end;
    }
    fields
}

/// Payload hashed for the signature: `type || rlp(fields without [y_parity, r, s])`.
pub fn typed_tx_signing_payload(raw: &[u8], fields: &[RlpField]) -> Vec<u8> {
    let unsigned = &fields[..fields.len() - 3];
    let body: Vec<u8> = unsigned.iter().flat_map(|f| f.encoded.clone()).collect();

    let mut payload = vec![raw[0]];
    if body.len() < 56 {
        payload.push(0xc0 + body.len() as u8);
    } else {
        let len_bytes: Vec<u8> = (body.len() as u64)
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        payload.push(0xf7 + len_bytes.len() as u8);
        payload.extend(len_bytes);
    }
    payload.extend(body);
    payload
}

/// Left-pads a big-endian integer to 32 bytes.
pub fn pad32(bytes: &[u8]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(bytes);
    word
}

/// Recovers the sender of a signed typed transaction from its own fields.
pub fn recover_typed_tx_sender(raw: &[u8], expected_fields: usize) -> Address {
    let fields = typed_tx_fields(raw);
    assert_eq!(fields.len(), expected_fields);

    let payload = typed_tx_signing_payload(raw, &fields);
    let n = fields.len();
    let y_parity = fields[n - 3].payload.first().copied().unwrap_or(0);
    recover_prehash_signer(
        &keccak256(&payload),
        &pad32(&fields[n - 2].payload),
        &pad32(&fields[n - 1].payload),
        y_parity,
    )
    .unwrap()
}
