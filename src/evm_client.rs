//! EVM Chain Client
//!
//! JSON-RPC client for one EVM chain: reads, locally signed EIP-1559 and
//! EIP-7702 transactions, concurrent contract deployment with pre-assigned
//! nonces, bounded and cancellable receipt waits, and event log lookup.

use ethereum_types::{Address, H256, U256, U64};
use futures::future::try_join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::crypto::{keccak256, AuthorizationExecutor, Authorization, SignedAuthorization, UserSigner};
use crate::error::{SettlerError, SettlerResult};
use crate::order::hex_bytes;
use crate::rlp::RlpItem;

/// Per-request timeout for JSON-RPC calls
const RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Gas limit used when neither the request nor the chain config sets one
pub const DEFAULT_GAS_LIMIT: u64 = 3_000_000;

/// Blocks behind the head searched by `get_recent_logs`
pub const DEFAULT_LOG_LOOKBACK_BLOCKS: u64 = 10_000;

/// Widest block range requested in one `eth_getLogs` call
pub const DEFAULT_LOG_BLOCK_RANGE: u64 = 1_000;

/// EIP-2718 type byte of dynamic-fee transactions
const EIP1559_TX_TYPE: u8 = 0x02;

/// EIP-2718 type byte of set-code (EIP-7702) transactions
const EIP7702_TX_TYPE: u8 = 0x04;

// ============================================================================
// JSON-RPC WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// EVM event log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: Address,
    /// topics[0] is the event signature hash, the rest are indexed arguments
    pub topics: Vec<H256>,
    /// Non-indexed arguments
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    /// Block-wide log index assigned by the node
    #[serde(default)]
    pub log_index: Option<U64>,
}

/// Mined transaction receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    pub block_number: U64,
    pub block_hash: H256,
    pub transaction_index: U64,
    /// Set for contract creations
    #[serde(default)]
    pub contract_address: Option<Address>,
    /// 1 for success, 0 for revert
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub logs: Vec<EvmLog>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s.as_u64() == 1).unwrap_or(true)
    }

    /// Address of the contract created by this transaction.
    pub fn deployed_address(&self) -> SettlerResult<Address> {
        self.contract_address.ok_or_else(|| {
            SettlerError::rpc(
                "eth_getTransactionReceipt",
                format!("receipt of {:?} has no contractAddress", self.transaction_hash),
            )
        })
    }
}

/// Block header fields used by the settlement flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: H256,
    pub number: U64,
    pub timestamp: U256,
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// A transaction to sign and submit.
///
/// `to = None` creates a contract from `data`. A non-empty `authorization_list`
/// makes it a type-0x04 transaction, which cannot create contracts.
#[derive(Debug, Clone, Default)]
pub struct TransactionRequest {
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    /// Fetched from the node when not set
    pub nonce: Option<u64>,
    /// Chain default when not set
    pub gas_limit: Option<u64>,
    pub authorization_list: Vec<SignedAuthorization>,
}

impl TransactionRequest {
    /// Contract call.
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to: Some(to),
            data,
            ..Default::default()
        }
    }

    /// Contract creation.
    pub fn deploy(bytecode: Vec<u8>) -> Self {
        Self {
            data: bytecode,
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_authorization(mut self, authorization: SignedAuthorization) -> Self {
        self.authorization_list.push(authorization);
        self
    }
}

/// Fully resolved transaction fields, ready to sign
#[derive(Debug, Clone)]
struct UnsignedTransaction {
    chain_id: u64,
    nonce: u64,
    max_priority_fee_per_gas: U256,
    max_fee_per_gas: U256,
    gas_limit: u64,
    to: Option<Address>,
    value: U256,
    data: Vec<u8>,
    authorization_list: Vec<SignedAuthorization>,
}

impl UnsignedTransaction {
    fn tx_type(&self) -> u8 {
        if self.authorization_list.is_empty() {
            EIP1559_TX_TYPE
        } else {
            EIP7702_TX_TYPE
        }
    }

    /// RLP fields shared by the signing payload and the signed envelope.
    fn fields(&self) -> SettlerResult<Vec<RlpItem>> {
        let to = match (self.to, self.authorization_list.is_empty()) {
            (Some(to), _) => RlpItem::address(&to),
            (None, true) => RlpItem::bytes(&[]),
            (None, false) => {
                return Err(SettlerError::SchemaMismatch {
                    path: "transaction.to".to_string(),
                    expected: "address".to_string(),
                    found: "contract creation with an authorization list".to_string(),
                })
            }
        };

        let mut fields = vec![
            RlpItem::uint(self.chain_id),
            RlpItem::uint(self.nonce),
            RlpItem::u256(self.max_priority_fee_per_gas),
            RlpItem::u256(self.max_fee_per_gas),
            RlpItem::uint(self.gas_limit),
            to,
            RlpItem::u256(self.value),
            RlpItem::bytes(&self.data),
            // access list
            RlpItem::List(vec![]),
        ];
        if !self.authorization_list.is_empty() {
            fields.push(RlpItem::List(
                self.authorization_list.iter().map(|a| a.rlp_item()).collect(),
            ));
        }
        Ok(fields)
    }

    /// Signs and returns the raw `type || rlp(fields || [y_parity, r, s])` envelope.
    fn sign(&self, signer: &UserSigner) -> SettlerResult<Vec<u8>> {
        let tx_type = self.tx_type();
        let mut fields = self.fields()?;

        let mut payload = vec![tx_type];
        payload.extend(RlpItem::List(fields.clone()).encode());
        let signature = signer.sign_prehash(&keccak256(&payload))?;

        fields.push(RlpItem::uint(signature.recovery_id as u64));
        fields.push(RlpItem::uint_bytes(&signature.r));
        fields.push(RlpItem::uint_bytes(&signature.s));

        let mut raw = vec![tx_type];
        raw.extend(RlpItem::List(fields).encode());
        Ok(raw)
    }
}

// ============================================================================
// RECEIPT WAIT
// ============================================================================

/// Receipt polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptWaitConfig {
    pub interval: Duration,
    /// `None` waits until mined or cancelled
    pub timeout: Option<Duration>,
}

impl Default for ReceiptWaitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            timeout: Some(Duration::from_secs(120)),
        }
    }
}

// ============================================================================
// LOG EXTRACTION
// ============================================================================

/// Matches one event emitted by one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// Event name, for error reporting
    pub event: String,
    pub address: Address,
    pub topic0: H256,
    /// Expected values of topics[1..], `None` matches anything
    pub indexed: Vec<Option<H256>>,
}

impl LogFilter {
    pub fn new(event: &str, address: Address, topic0: H256) -> Self {
        Self {
            event: event.to_string(),
            address,
            topic0,
            indexed: Vec::new(),
        }
    }

    /// Requires indexed argument `position` (0-based, i.e. topics[position + 1]) to equal `value`.
    pub fn with_indexed(mut self, position: usize, value: H256) -> Self {
        if self.indexed.len() <= position {
            self.indexed.resize(position + 1, None);
        }
        self.indexed[position] = Some(value);
        self
    }

    pub fn matches(&self, log: &EvmLog) -> bool {
        if log.address != self.address || log.topics.first() != Some(&self.topic0) {
            return false;
        }
        self.indexed.iter().enumerate().all(|(i, expected)| match expected {
            Some(value) => log.topics.get(i + 1) == Some(value),
            None => true,
        })
    }
}

/// Zero-based position of the first log in `receipt` matching `filter`.
///
/// # Returns
///
/// * `Ok(usize)` - Index into `receipt.logs`
/// * `Err(SettlerError::EventNotFound)` - No log matches
pub fn find_log_index(receipt: &TransactionReceipt, filter: &LogFilter) -> SettlerResult<usize> {
    receipt
        .logs
        .iter()
        .position(|log| filter.matches(log))
        .ok_or_else(|| SettlerError::EventNotFound {
            event: filter.event.clone(),
            address: filter.address,
        })
}

// ============================================================================
// CLIENT
// ============================================================================

/// Client for one EVM chain
#[derive(Debug, Clone)]
pub struct EvmClient {
    client: Client,
    rpc_url: String,
    chain_id: u64,
    gas_limit: u64,
    log_lookback_blocks: u64,
    log_block_range: u64,
}

impl EvmClient {
    /// Creates a client for the chain at `rpc_url`.
    ///
    /// # Arguments
    ///
    /// * `rpc_url` - JSON-RPC endpoint
    /// * `chain_id` - Chain id transactions and authorizations are signed for
    /// * `gas_limit` - Gas limit for transactions that do not set their own
    pub fn new(rpc_url: &str, chain_id: u64, gas_limit: u64) -> SettlerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .map_err(|e| SettlerError::rpc("client", e))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            chain_id,
            gas_limit,
            log_lookback_blocks: DEFAULT_LOG_LOOKBACK_BLOCKS,
            log_block_range: DEFAULT_LOG_BLOCK_RANGE,
        })
    }

    /// Sets how far back `get_recent_logs` searches and how many blocks one
    /// `eth_getLogs` request may span. A range of 0 is treated as 1.
    pub fn with_log_window(mut self, lookback_blocks: u64, block_range: u64) -> Self {
        self.log_lookback_blocks = lookback_blocks;
        self.log_block_range = block_range.max(1);
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Sends one JSON-RPC request and deserializes its `result`.
    ///
    /// A `null` result deserializes into `T` as-is, so `Option<T>` results work.
    async fn json_rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> SettlerResult<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: 1,
        };

        let rpc_future = async {
            let resp = self
                .client
                .post(&self.rpc_url)
                .json(&request)
                .send()
                .await
                .map_err(|e| SettlerError::rpc(method, format!("request to {} failed: {}", self.rpc_url, e)))?;
            resp.json::<JsonRpcResponse>()
                .await
                .map_err(|e| SettlerError::rpc(method, format!("malformed response: {}", e)))
        };

        let response = tokio::time::timeout(RPC_TIMEOUT, rpc_future)
            .await
            .map_err(|_| {
                SettlerError::rpc(
                    method,
                    format!("timed out after {}s waiting for {}", RPC_TIMEOUT.as_secs(), self.rpc_url),
                )
            })??;

        if let Some(error) = response.error {
            return Err(SettlerError::rpc(
                method,
                format!("{} (code: {})", error.message, error.code),
            ));
        }

        serde_json::from_value(response.result.unwrap_or(serde_json::Value::Null))
            .map_err(|e| SettlerError::rpc(method, format!("unexpected result: {}", e)))
    }

    /// `eth_chainId` as reported by the node.
    pub async fn get_chain_id(&self) -> SettlerResult<u64> {
        let id: U64 = self.json_rpc("eth_chainId", vec![]).await?;
        Ok(id.as_u64())
    }

    pub async fn get_block_number(&self) -> SettlerResult<u64> {
        let number: U64 = self.json_rpc("eth_blockNumber", vec![]).await?;
        Ok(number.as_u64())
    }

    /// Transaction count of `address` at `block_tag` (`latest`, `pending`, ...).
    pub async fn get_transaction_count(&self, address: Address, block_tag: &str) -> SettlerResult<u64> {
        let count: U64 = self
            .json_rpc(
                "eth_getTransactionCount",
                vec![serde_json::json!(address), serde_json::json!(block_tag)],
            )
            .await?;
        Ok(count.as_u64())
    }

    pub async fn gas_price(&self) -> SettlerResult<U256> {
        self.json_rpc("eth_gasPrice", vec![]).await
    }

    pub async fn max_priority_fee_per_gas(&self) -> SettlerResult<U256> {
        self.json_rpc("eth_maxPriorityFeePerGas", vec![]).await
    }

    pub async fn get_block_by_hash(&self, hash: H256) -> SettlerResult<Block> {
        let block: Option<Block> = self
            .json_rpc(
                "eth_getBlockByHash",
                vec![serde_json::json!(hash), serde_json::json!(false)],
            )
            .await?;
        block.ok_or_else(|| SettlerError::rpc("eth_getBlockByHash", format!("block {:?} not found", hash)))
    }

    /// Receipt of `tx_hash`, `None` while the transaction is not mined.
    pub async fn get_transaction_receipt(&self, tx_hash: H256) -> SettlerResult<Option<TransactionReceipt>> {
        self.json_rpc("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await
    }

    /// Logs emitted by `address` whose leading topics equal `topics`, in blocks
    /// `from_block..=to_block`.
    pub async fn get_logs(
        &self,
        address: Address,
        topics: &[H256],
        from_block: u64,
        to_block: u64,
    ) -> SettlerResult<Vec<EvmLog>> {
        let filter = serde_json::json!({
            "address": address,
            "topics": topics,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });
        self.json_rpc("eth_getLogs", vec![filter]).await
    }

    /// Logs matching `address` and `topics` within the configured lookback from
    /// the current head, oldest first.
    ///
    /// The window is requested in slices of at most `log_block_range` blocks.
    pub async fn get_recent_logs(&self, address: Address, topics: &[H256]) -> SettlerResult<Vec<EvmLog>> {
        let head = self.get_block_number().await?;
        let mut from = head.saturating_sub(self.log_lookback_blocks);
        let mut logs = Vec::new();

        loop {
            let to = from.saturating_add(self.log_block_range - 1).min(head);
            debug!("eth_getLogs {:?} blocks {}..={}", address, from, to);
            logs.extend(self.get_logs(address, topics, from, to).await?);
            if to >= head {
                break;
            }
            from = to + 1;
        }
        Ok(logs)
    }

    /// Resolves nonce, fees and gas, signs locally and broadcasts.
    ///
    /// # Returns
    ///
    /// * `Ok(H256)` - Hash of the submitted transaction
    /// * `Err(SettlerError)` - A read, signing or `eth_sendRawTransaction` failed
    pub async fn send_transaction(
        &self,
        signer: &UserSigner,
        request: TransactionRequest,
    ) -> SettlerResult<H256> {
        let from = signer.address();
        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => self.get_transaction_count(from, "pending").await?,
        };

        let gas_price = self.gas_price().await?;
        let max_fee_per_gas = gas_price.saturating_mul(U256::from(2));
        let max_priority_fee_per_gas = self.max_priority_fee_per_gas().await?.min(max_fee_per_gas);

        let tx = UnsignedTransaction {
            chain_id: self.chain_id,
            nonce,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit: request.gas_limit.unwrap_or(self.gas_limit),
            to: request.to,
            value: request.value,
            data: request.data,
            authorization_list: request.authorization_list,
        };
        let raw = tx.sign(signer)?;
        let local_hash = H256(keccak256(&raw));

        debug!(
            "Submitting type 0x{:02x} transaction from {:?} (nonce {}) on chain {}",
            tx.tx_type(),
            from,
            nonce,
            self.chain_id
        );

        let tx_hash: H256 = self
            .json_rpc(
                "eth_sendRawTransaction",
                vec![serde_json::json!(format!("0x{}", hex::encode(&raw)))],
            )
            .await?;
        if tx_hash != local_hash {
            debug!("Node returned hash {:?}, computed {:?}", tx_hash, local_hash);
        }

        info!("Transaction {:?} submitted on chain {}", tx_hash, self.chain_id);
        Ok(tx_hash)
    }

    /// Submits a transaction and waits for its receipt.
    pub async fn send_and_wait(
        &self,
        signer: &UserSigner,
        request: TransactionRequest,
        wait: &ReceiptWaitConfig,
        cancel: Option<watch::Receiver<bool>>,
    ) -> SettlerResult<TransactionReceipt> {
        let tx_hash = self.send_transaction(signer, request).await?;
        self.wait_for_receipt(tx_hash, wait, cancel).await
    }

    /// Deploys several contracts from one account.
    ///
    /// Nonces are assigned up front from the account's pending transaction count,
    /// so the creations are submitted and awaited concurrently.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<Address>)` - Deployed addresses, in the order of `bytecodes`
    /// * `Err(SettlerError)` - Any submission or receipt wait failed
    pub async fn deploy_contracts(
        &self,
        signer: &UserSigner,
        bytecodes: Vec<Vec<u8>>,
        wait: &ReceiptWaitConfig,
        cancel: Option<watch::Receiver<bool>>,
    ) -> SettlerResult<Vec<Address>> {
        let base_nonce = self.get_transaction_count(signer.address(), "pending").await?;

        let deployments = bytecodes.into_iter().enumerate().map(|(i, bytecode)| {
            let request = TransactionRequest::deploy(bytecode).with_nonce(base_nonce + i as u64);
            let cancel = cancel.clone();
            async move {
                let receipt = self.send_and_wait(signer, request, wait, cancel).await?;
                receipt.deployed_address()
            }
        });

        try_join_all(deployments).await
    }

    /// Polls for the receipt of `tx_hash`.
    ///
    /// # Arguments
    ///
    /// * `tx_hash` - Submitted transaction
    /// * `config` - Poll interval and optional timeout
    /// * `cancel` - Stops the wait once it holds `true`
    ///
    /// # Returns
    ///
    /// * `Ok(TransactionReceipt)` - Mined with status 1
    /// * `Err(SettlerError::TransactionReverted)` - Mined with status 0
    /// * `Err(SettlerError::ReceiptTimeout)` - Not mined within `config.timeout`
    /// * `Err(SettlerError::Cancelled)` - Cancellation was signalled first
    pub async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        config: &ReceiptWaitConfig,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> SettlerResult<TransactionReceipt> {
        let started = tokio::time::Instant::now();
        let hash_str = format!("{:?}", tx_hash);

        loop {
            if cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false) {
                return Err(SettlerError::Cancelled { tx_hash: hash_str });
            }

            if let Some(receipt) = self.get_transaction_receipt(tx_hash).await? {
                if !receipt.succeeded() {
                    return Err(SettlerError::TransactionReverted { tx_hash: hash_str });
                }
                debug!(
                    "Transaction {} mined in block {}",
                    hash_str,
                    receipt.block_number.as_u64()
                );
                return Ok(receipt);
            }

            if let Some(timeout) = config.timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(SettlerError::ReceiptTimeout {
                        tx_hash: hash_str,
                        waited_ms: waited.as_millis() as u64,
                    });
                }
            }

            let mut sender_dropped = false;
            match cancel.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep(config.interval) => {}
                        changed = rx.changed() => sender_dropped = changed.is_err(),
                    }
                }
                None => tokio::time::sleep(config.interval).await,
            }
            // Nobody can cancel any more
            if sender_dropped {
                cancel = None;
            }
        }
    }

    /// Signs an EIP-7702 authorization delegating `signer`'s account to `contract`.
    ///
    /// The nonce comes from the account's pending transaction count, adjusted
    /// for who sends the carrying transaction.
    pub async fn sign_authorization(
        &self,
        signer: &UserSigner,
        contract: Address,
        executor: AuthorizationExecutor,
    ) -> SettlerResult<SignedAuthorization> {
        let count = self.get_transaction_count(signer.address(), "pending").await?;
        let authorization = Authorization {
            chain_id: self.chain_id,
            address: contract,
            nonce: executor.nonce_for(count),
        };
        debug!(
            "Signing authorization for {:?} -> {:?} (nonce {})",
            signer.address(),
            contract,
            authorization.nonce
        );
        authorization.sign(signer)
    }
}
