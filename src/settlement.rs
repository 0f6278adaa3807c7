//! Settlement Orchestration
//!
//! Linear pipelines over two chains: contract deployment, the proof-backed
//! open/fill/repay flow, and the EIP-7702 delegated fill. Each step's output is
//! the input of the next; the first failure aborts the run and nothing is retried.

use anyhow::{Context, Result};
use ethereum_types::{Address, H256, U256};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::abi::schema::{fill_function, open_function, repay_filler_function};
use crate::abi::{decode_address, AbiValue, WORD};
use crate::artifacts::ContractArtifact;
use crate::config::Deployments;
use crate::crypto::{verify_intent_signature, AuthorizationExecutor, SignedAuthorization, UserSigner};
use crate::error::{SettlerError, SettlerResult};
use crate::evm_client::{
    find_log_index, EvmClient, EvmLog, LogFilter, ReceiptWaitConfig, TransactionReceipt,
    TransactionRequest,
};
use crate::order::{calls_to_abi_value, Call, CallByUser, OrderId};
use crate::proof::{ProofPoller, ProofRequest, ProofTransport, ReceiptProof};

pub const ORIGIN_SETTLER: &str = "SimpleOriginSettler";
pub const DESTINATION_SETTLER: &str = "SimpleDestinationSettler";
pub const HELLO_WORLD: &str = "HelloWorld";
pub const SENDER_CHECK: &str = "SenderCheck";
/// Destination settler that executes calls through the user's delegated account
pub const DELEGATION_SETTLER: &str = "DestinationSettler";
pub const XACCOUNT: &str = "XAccount";

pub const ORDER_EXECUTED_EVENT: &str = "OrderExecuted";
/// Emitted by the origin settler when an order is opened, order id first indexed
pub const ORDER_OPENED_EVENT: &str = "Open";
pub const CHECK_EVENT: &str = "check";

/// `HelloWorld.hello()`
pub const HELLO_SELECTOR: [u8; 4] = [0x19, 0xff, 0x1d, 0x21];
/// `SenderCheck.check()`
pub const CHECK_SELECTOR: [u8; 4] = [0x91, 0x98, 0x40, 0xad];

// ============================================================================
// CALL BUILDERS
// ============================================================================

/// Calldata of `open(uint64 destinationChainId, Call[] calls, address destinationSettler)`.
pub fn open_calldata(
    destination_chain_id: u64,
    calls: &[Call],
    destination_settler: Address,
) -> SettlerResult<Vec<u8>> {
    open_function().encode_call(&[
        AbiValue::uint(destination_chain_id),
        calls_to_abi_value(calls),
        AbiValue::Address(destination_settler),
    ])
}

/// Calldata of `fill(bytes32 orderId, bytes originData)`.
pub fn fill_calldata(order_id: &OrderId, origin_data: &[u8]) -> SettlerResult<Vec<u8>> {
    fill_function().encode_call(&[
        AbiValue::FixedBytes(order_id.as_bytes().to_vec()),
        AbiValue::Bytes(origin_data.to_vec()),
    ])
}

/// Calldata of `repayFiller(uint256 logIndex, bytes proof)`.
pub fn repay_filler_calldata(log_index: u64, proof: &[u8]) -> SettlerResult<Vec<u8>> {
    repay_filler_function().encode_call(&[AbiValue::uint(log_index), AbiValue::Bytes(proof.to_vec())])
}

/// The single call of the proof-backed flow: `HelloWorld.hello()`.
pub fn hello_call(hello_world: Address) -> Call {
    Call {
        target: hello_world,
        call_data: HELLO_SELECTOR.to_vec(),
        value: U256::zero(),
    }
}

/// The single call of the delegated flow: `SenderCheck.check()`.
pub fn check_call(sender_check: Address) -> Call {
    Call {
        target: sender_check,
        call_data: CHECK_SELECTOR.to_vec(),
        value: U256::zero(),
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Contracts of the proof-backed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleContracts {
    /// On the origin chain
    pub origin_settler: Address,
    /// On the destination chain
    pub destination_settler: Address,
    /// On the destination chain
    pub hello_world: Address,
}

impl SimpleContracts {
    pub fn record(&self, deployments: &mut Deployments, origin_chain_id: u64, destination_chain_id: u64) {
        deployments.record(origin_chain_id, ORIGIN_SETTLER, self.origin_settler);
        deployments.record(destination_chain_id, DESTINATION_SETTLER, self.destination_settler);
        deployments.record(destination_chain_id, HELLO_WORLD, self.hello_world);
    }
}

/// Contracts of the delegated flow, all on the destination chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationContracts {
    pub sender_check: Address,
    pub destination_settler: Address,
    pub xaccount: Address,
}

impl DelegationContracts {
    pub fn record(&self, deployments: &mut Deployments, chain_id: u64) {
        deployments.record(chain_id, SENDER_CHECK, self.sender_check);
        deployments.record(chain_id, DELEGATION_SETTLER, self.destination_settler);
        deployments.record(chain_id, XACCOUNT, self.xaccount);
    }
}

/// Everything a proof-backed fill produced.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub order_id: OrderId,
    pub origin_data: Vec<u8>,
    /// Transaction that opened the order, in this run or an earlier one;
    /// `None` when an earlier fill was reused
    pub open_tx: Option<H256>,
    pub fill_tx: H256,
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub proof: ReceiptProof,
    pub repay_tx: H256,
}

/// Everything a delegated fill produced.
#[derive(Debug, Clone)]
pub struct DelegatedFillOutcome {
    pub order: CallByUser,
    pub order_id: OrderId,
    pub authorization: SignedAuthorization,
    pub fill_tx: H256,
    /// `sender` of every `check` event, all equal to the user
    pub checked_senders: Vec<Address>,
}

/// Inputs of the proof-backed flow.
pub struct CrossChainFill<'a> {
    /// Intent owner; opens the order and pays the reward
    pub user: &'a UserSigner,
    /// Fills on the destination chain and claims the reward
    pub filler: &'a UserSigner,
    pub contracts: SimpleContracts,
    /// topics[0] of `OrderExecuted`
    pub order_executed_topic: H256,
    /// topics[0] of the origin settler's `Open` event. When `None`, earlier opens
    /// are not detected and a re-run after a failed fill opens the order again.
    pub order_opened_topic: Option<H256>,
    pub nonce: U256,
    pub reward: U256,
}

/// Inputs of the delegated flow.
pub struct DelegatedFill<'a> {
    pub user: &'a UserSigner,
    pub relayer: &'a UserSigner,
    pub contracts: DelegationContracts,
    /// topics[0] of `check`
    pub check_topic: H256,
    /// `chainId` written into the intent
    pub intent_chain_id: u64,
    pub nonce: U256,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Clients for both chains plus the receipt-wait policy shared by every step.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// Where orders are opened and fillers repaid
    pub origin: EvmClient,
    /// Where orders are filled
    pub destination: EvmClient,
    pub wait: ReceiptWaitConfig,
    /// Stops any pending receipt wait once it holds `true`
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Settlement {
    pub fn new(origin: EvmClient, destination: EvmClient, wait: ReceiptWaitConfig) -> Self {
        Self {
            origin,
            destination,
            wait,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    async fn submit(
        &self,
        client: &EvmClient,
        signer: &UserSigner,
        request: TransactionRequest,
    ) -> SettlerResult<TransactionReceipt> {
        client
            .send_and_wait(signer, request, &self.wait, self.cancel.clone())
            .await
    }

    /// Deploys the origin settler on the origin chain, and the destination settler
    /// plus `HelloWorld` on the destination chain. Both chains proceed concurrently.
    pub async fn deploy_simple_settlers(
        &self,
        deployer: &UserSigner,
        origin_settler: &ContractArtifact,
        destination_settler: &ContractArtifact,
        hello_world: &ContractArtifact,
    ) -> Result<SimpleContracts> {
        info!("Deployer address: {:?}", deployer.address());

        let destination = self.destination.deploy_contracts(
            deployer,
            vec![destination_settler.bytecode.clone(), hello_world.bytecode.clone()],
            &self.wait,
            self.cancel.clone(),
        );
        let origin = self.origin.deploy_contracts(
            deployer,
            vec![origin_settler.bytecode.clone()],
            &self.wait,
            self.cancel.clone(),
        );

        let (destination, origin) = futures::try_join!(destination, origin)
            .context("Failed to deploy settlement contracts")?;

        let contracts = SimpleContracts {
            origin_settler: origin[0],
            destination_settler: destination[0],
            hello_world: destination[1],
        };

        info!(
            "{} (chain {}): {:?}",
            ORIGIN_SETTLER,
            self.origin.chain_id(),
            contracts.origin_settler
        );
        info!(
            "{} (chain {}): {:?}",
            DESTINATION_SETTLER,
            self.destination.chain_id(),
            contracts.destination_settler
        );
        info!(
            "{} (chain {}): {:?}",
            HELLO_WORLD,
            self.destination.chain_id(),
            contracts.hello_world
        );
        Ok(contracts)
    }

    /// Deploys `SenderCheck`, the delegation settler and `XAccount` on the
    /// destination chain with sequential nonces.
    pub async fn deploy_delegation_contracts(
        &self,
        deployer: &UserSigner,
        sender_check: &ContractArtifact,
        destination_settler: &ContractArtifact,
        xaccount: &ContractArtifact,
    ) -> Result<DelegationContracts> {
        let addresses = self
            .destination
            .deploy_contracts(
                deployer,
                vec![
                    sender_check.bytecode.clone(),
                    destination_settler.bytecode.clone(),
                    xaccount.bytecode.clone(),
                ],
                &self.wait,
                self.cancel.clone(),
            )
            .await
            .context("Failed to deploy delegation contracts")?;

        let contracts = DelegationContracts {
            sender_check: addresses[0],
            destination_settler: addresses[1],
            xaccount: addresses[2],
        };
        info!("{}: {:?}", SENDER_CHECK, contracts.sender_check);
        info!("{}: {:?}", DELEGATION_SETTLER, contracts.destination_settler);
        info!("{}: {:?}", XACCOUNT, contracts.xaccount);
        Ok(contracts)
    }

    /// Receipt of an earlier fill of `order_id`, if the destination settler already
    /// emitted `OrderExecuted` for it within the lookback window.
    async fn find_existing_fill(
        &self,
        destination_settler: Address,
        order_executed_topic: H256,
        order_id: &OrderId,
    ) -> Result<Option<TransactionReceipt>> {
        let logs = self
            .destination
            .get_recent_logs(destination_settler, &[order_executed_topic, order_id.0])
            .await
            .context("Failed to look up earlier fills")?;

        let Some(tx_hash) = logs.iter().find_map(|log| log.transaction_hash) else {
            return Ok(None);
        };
        let receipt = self
            .destination
            .wait_for_receipt(tx_hash, &self.wait, self.cancel.clone())
            .await
            .context("Failed to fetch earlier fill receipt")?;
        Ok(Some(receipt))
    }

    /// Transaction of an earlier open of `order_id` on the origin chain.
    async fn find_existing_open(
        &self,
        origin_settler: Address,
        order_opened_topic: H256,
        order_id: &OrderId,
    ) -> Result<Option<H256>> {
        let logs = self
            .origin
            .get_recent_logs(origin_settler, &[order_opened_topic, order_id.0])
            .await
            .context("Failed to look up earlier opens")?;
        Ok(logs.iter().find_map(|log| log.transaction_hash))
    }

    /// Opens an order on the origin chain, fills it on the destination chain,
    /// proves the fill and claims the reward.
    ///
    /// An order whose `OrderExecuted` event is already on the destination chain
    /// is neither reopened nor refilled: the earlier fill is proven instead. An
    /// order whose `Open` event is already on the origin chain is filled without
    /// reopening, when `order_opened_topic` is known.
    pub async fn run_cross_chain_fill<T: ProofTransport + ?Sized>(
        &self,
        params: &CrossChainFill<'_>,
        transport: &T,
        poller: &ProofPoller,
    ) -> Result<FillOutcome> {
        let contracts = params.contracts;

        // 1. Build the intent and derive its id
        let order = CallByUser::new(
            params.user.address(),
            params.nonce,
            self.destination.chain_id(),
            vec![hello_call(contracts.hello_world)],
        );
        let origin_data = order.encode_origin_data()?;
        let order_id = order.order_id()?;
        info!("Order {} (origin data 0x{})", order_id, hex::encode(&origin_data));

        // 2. Open and fill, skipping what an earlier run already did
        let (open_tx, fill_receipt) = match self
            .find_existing_fill(contracts.destination_settler, params.order_executed_topic, &order_id)
            .await?
        {
            Some(receipt) => {
                warn!(
                    "Order {} already filled in {:?}, reusing that fill",
                    order_id, receipt.transaction_hash
                );
                (None, receipt)
            }
            None => {
                let earlier_open = match params.order_opened_topic {
                    Some(topic) => {
                        self.find_existing_open(contracts.origin_settler, topic, &order_id)
                            .await?
                    }
                    None => None,
                };

                let open_tx = match earlier_open {
                    Some(tx_hash) => {
                        warn!("Order {} already opened in {:?}, not reopening", order_id, tx_hash);
                        tx_hash
                    }
                    None => {
                        info!("Opening order on chain {}", self.origin.chain_id());
                        let open = TransactionRequest::call(
                            contracts.origin_settler,
                            open_calldata(self.destination.chain_id(), &order.calls, contracts.destination_settler)?,
                        )
                        .with_value(params.reward);
                        let open_receipt = self
                            .submit(&self.origin, params.user, open)
                            .await
                            .context("open failed")?;
                        info!("Order opened in {:?}", open_receipt.transaction_hash);
                        open_receipt.transaction_hash
                    }
                };

                info!("Filling order on chain {}", self.destination.chain_id());
                let fill = TransactionRequest::call(
                    contracts.destination_settler,
                    fill_calldata(&order_id, &origin_data)?,
                );
                let fill_receipt = self
                    .submit(&self.destination, params.filler, fill)
                    .await
                    .context("fill failed")?;
                (Some(open_tx), fill_receipt)
            }
        };

        // 3. Locate the fill in its block
        let filter = LogFilter::new(
            ORDER_EXECUTED_EVENT,
            contracts.destination_settler,
            params.order_executed_topic,
        )
        .with_indexed(0, order_id.0);
        let log_index = find_log_index(&fill_receipt, &filter)? as u64;
        let block = self
            .destination
            .get_block_by_hash(fill_receipt.block_hash)
            .await
            .context("Failed to fetch fill block")?;
        let tx_index = fill_receipt.transaction_index.as_u64();

        info!("Fill transaction details:");
        info!("- Transaction: {:?}", fill_receipt.transaction_hash);
        info!("- Block number: {}", block.number.as_u64());
        info!("- Transaction index: {}", tx_index);
        info!("- Log index: {}", log_index);

        // 4. Prove the fill from the destination chain to the origin chain
        let request = ProofRequest {
            src_chain_id: self.destination.chain_id(),
            dst_chain_id: self.origin.chain_id(),
            block_number: block.number.as_u64(),
            tx_index,
        };
        let proof = poller
            .request_and_wait(transport, &request)
            .await
            .context("Failed to obtain receipt proof")?;
        info!("Proof received: {}", proof.proof_hex());

        // 5. Claim the reward
        let repay = TransactionRequest::call(
            contracts.origin_settler,
            repay_filler_calldata(log_index, &proof.proof)?,
        );
        let repay_receipt = self
            .submit(&self.origin, params.filler, repay)
            .await
            .context("repayFiller failed")?;
        info!("Filler repaid in {:?}", repay_receipt.transaction_hash);

        Ok(FillOutcome {
            order_id,
            origin_data,
            open_tx,
            fill_tx: fill_receipt.transaction_hash,
            block_number: block.number.as_u64(),
            tx_index,
            log_index,
            proof,
            repay_tx: repay_receipt.transaction_hash,
        })
    }

    /// Fills a signed intent through the user's account: the relayer's transaction
    /// carries the user's authorization delegating to `XAccount`, and every `check`
    /// event in the receipt must report the user as `sender`.
    pub async fn run_delegated_fill(&self, params: &DelegatedFill<'_>) -> Result<DelegatedFillOutcome> {
        let contracts = params.contracts;
        let user = params.user.address();

        // 1. Delegate the user's account to XAccount for the relayer's transaction
        let authorization = self
            .destination
            .sign_authorization(params.user, contracts.xaccount, AuthorizationExecutor::Relayer)
            .await
            .context("Failed to sign authorization")?;

        // 2. Sign the intent and insert the signature
        let unsigned = CallByUser::new(
            user,
            params.nonce,
            params.intent_chain_id,
            vec![check_call(contracts.sender_check)],
        );
        let signature = params.user.sign_intent(&unsigned)?;
        let order = unsigned.with_signature(signature);
        verify_intent_signature(&order)?;
        info!("Intent signature 0x{}", hex::encode(&order.signature));

        let origin_data = order.encode_origin_data()?;
        let order_id = order.order_id()?;
        info!("Order {}", order_id);

        // 3. Relayer submits the fill carrying the authorization
        let fill = TransactionRequest::call(
            contracts.destination_settler,
            fill_calldata(&order_id, &origin_data)?,
        )
        .with_authorization(authorization);
        let receipt = self
            .submit(&self.destination, params.relayer, fill)
            .await
            .context("delegated fill failed")?;
        info!("Fill mined in {:?}", receipt.transaction_hash);

        // 4. The call must have run as the user
        let checked_senders = check_senders(&receipt, contracts.sender_check, params.check_topic, user)?;

        Ok(DelegatedFillOutcome {
            order,
            order_id,
            authorization,
            fill_tx: receipt.transaction_hash,
            checked_senders,
        })
    }
}

/// `sender` argument of a `check` event, indexed or not.
pub fn check_event_sender(log: &EvmLog) -> Option<Address> {
    match log.topics.get(1) {
        Some(topic) => decode_address(topic.as_bytes()),
        None => log.data.get(..WORD).and_then(decode_address),
    }
}

/// Verifies that every `check` event emitted by `sender_check` names `user`.
///
/// # Returns
///
/// * `Ok(Vec<Address>)` - Senders of all `check` events
/// * `Err(SettlerError::EventNotFound)` - No `check` event in the receipt
/// * `Err(SettlerError::SignatureMismatch)` - A `check` ran as someone else
pub fn check_senders(
    receipt: &TransactionReceipt,
    sender_check: Address,
    check_topic: H256,
    user: Address,
) -> SettlerResult<Vec<Address>> {
    let filter = LogFilter::new(CHECK_EVENT, sender_check, check_topic);
    let mut senders = Vec::new();

    for log in receipt.logs.iter().filter(|log| filter.matches(log)) {
        let sender = check_event_sender(log);
        info!("check event: sender {:?}", sender);
        if sender != Some(user) {
            return Err(SettlerError::SignatureMismatch {
                expected: user,
                recovered: sender,
            });
        }
        senders.push(user);
    }

    if senders.is_empty() {
        return Err(SettlerError::EventNotFound {
            event: CHECK_EVENT.to_string(),
            address: sender_check,
        });
    }
    Ok(senders)
}
