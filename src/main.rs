//! Intent Settler CLI
//!
//! Deploys the settlement contracts and runs the cross-chain fill flows.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin intent-settler -- --config config/settler.toml deploy-simple
//! cargo run --bin intent-settler -- fill
//! cargo run --bin intent-settler -- delegated-fill
//! cargo run --bin intent-settler -- order-id --user 0x... --nonce 20 --chain-id 11155420 --target 0x... --call-data 0x19ff1d21
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! SETTLER_CONFIG_PATH=config/settler.toml cargo run --bin intent-settler -- fill
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethereum_types::{Address, U256};
use intent_settler::{
    config::{resolve_address, Config},
    order::random_nonce,
    settlement::{
        CrossChainFill, DelegatedFill, DelegationContracts, Settlement, SimpleContracts,
        CHECK_EVENT, DELEGATION_SETTLER, DESTINATION_SETTLER, HELLO_WORLD, ORDER_EXECUTED_EVENT,
        ORDER_OPENED_EVENT, ORIGIN_SETTLER, SENDER_CHECK, XACCOUNT,
    },
    Call, CallByUser, ContractArtifact, ProofApiClient,
};
use std::str::FromStr;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "intent-settler")]
#[command(about = "Cross-chain intent settlement: deploy settlers, fill orders, prove fills")]
struct Args {
    /// Path to configuration file (default: config/settler.toml or SETTLER_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the origin settler, destination settler and HelloWorld
    DeploySimple,
    /// Deploy SenderCheck, DestinationSettler and XAccount on the destination chain
    DeployDelegation,
    /// Open an order, fill it, prove the fill and claim the reward
    Fill {
        /// Intent nonce (decimal), random when omitted
        #[arg(long)]
        nonce: Option<String>,
    },
    /// Fill a signed intent through the user's delegated account
    DelegatedFill {
        /// Intent nonce (decimal), random when omitted
        #[arg(long)]
        nonce: Option<String>,
    },
    /// Print the origin data and order id of a single-call intent (offline)
    OrderId {
        #[arg(long, value_name = "0x...")]
        user: String,
        /// Decimal
        #[arg(long)]
        nonce: String,
        #[arg(long)]
        chain_id: u64,
        #[arg(long, value_name = "0x...")]
        target: String,
        #[arg(long, value_name = "0x...")]
        call_data: String,
        /// Wei, decimal
        #[arg(long, default_value = "0")]
        value: String,
        #[arg(long, value_name = "0x...", default_value = "0x")]
        signature: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // .env is optional
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    if let Command::OrderId {
        user,
        nonce,
        chain_id,
        target,
        call_data,
        value,
        signature,
    } = &args.command
    {
        return print_order_id(user, nonce, *chain_id, target, call_data, value, signature);
    }

    let config = Config::load_from_path(args.config.as_deref())?;
    info!("Configuration loaded successfully");
    info!(
        "Origin chain: {} (chain ID: {})",
        config.origin_chain.name, config.origin_chain.chain_id
    );
    info!(
        "Destination chain: {} (chain ID: {})",
        config.destination_chain.name, config.destination_chain.chain_id
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling");
            let _ = cancel_tx.send(true);
        }
    });

    let settlement = Settlement::new(
        config.origin_chain.client()?,
        config.destination_chain.client()?,
        config.receipts.wait_config(),
    )
    .with_cancellation(cancel_rx);

    match args.command {
        Command::DeploySimple => deploy_simple(&config, &settlement).await,
        Command::DeployDelegation => deploy_delegation(&config, &settlement).await,
        Command::Fill { nonce } => fill(&config, &settlement, nonce.as_deref()).await,
        Command::DelegatedFill { nonce } => delegated_fill(&config, &settlement, nonce.as_deref()).await,
        Command::OrderId { .. } => Ok(()),
    }
}

fn parse_address(value: &str, what: &str) -> Result<Address> {
    Address::from_str(value.trim_start_matches("0x"))
        .map_err(|e| anyhow::anyhow!("Invalid {} address '{}': {}", what, value, e))
}

fn parse_hex(value: &str, what: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x")).with_context(|| format!("Invalid {} hex", what))
}

fn parse_u256(value: &str, what: &str) -> Result<U256> {
    U256::from_dec_str(value).map_err(|e| anyhow::anyhow!("Invalid {} '{}': {:?}", what, value, e))
}

fn nonce_or_random(nonce: Option<&str>) -> Result<U256> {
    match nonce {
        Some(n) => parse_u256(n, "nonce"),
        None => Ok(random_nonce()),
    }
}

fn print_order_id(
    user: &str,
    nonce: &str,
    chain_id: u64,
    target: &str,
    call_data: &str,
    value: &str,
    signature: &str,
) -> Result<()> {
    let call = Call {
        target: parse_address(target, "target")?,
        call_data: parse_hex(call_data, "call data")?,
        value: parse_u256(value, "value")?,
    };
    let order = CallByUser::new(
        parse_address(user, "user")?,
        parse_u256(nonce, "nonce")?,
        chain_id,
        vec![call],
    )
    .with_signature(parse_hex(signature, "signature")?);

    println!("originData: 0x{}", hex::encode(order.encode_origin_data()?));
    println!("orderId:    {}", order.order_id()?);
    Ok(())
}

async fn deploy_simple(config: &Config, settlement: &Settlement) -> Result<()> {
    let dir = &config.paths.artifacts_dir;
    let origin_settler = ContractArtifact::load(dir, ORIGIN_SETTLER)?;
    let destination_settler = ContractArtifact::load(dir, DESTINATION_SETTLER)?;
    let hello_world = ContractArtifact::load(dir, HELLO_WORLD)?;
    let deployer = config.keys.deployer()?;

    let contracts = settlement
        .deploy_simple_settlers(&deployer, &origin_settler, &destination_settler, &hello_world)
        .await?;

    let mut deployments = config.load_deployments()?;
    contracts.record(
        &mut deployments,
        config.origin_chain.chain_id,
        config.destination_chain.chain_id,
    );
    deployments.save(&config.paths.deployments_path)?;
    info!("Deployments written to {}", config.paths.deployments_path.display());
    Ok(())
}

async fn deploy_delegation(config: &Config, settlement: &Settlement) -> Result<()> {
    let dir = &config.paths.artifacts_dir;
    let sender_check = ContractArtifact::load(dir, SENDER_CHECK)?;
    let destination_settler = ContractArtifact::load(dir, DELEGATION_SETTLER)?;
    let xaccount = ContractArtifact::load_from_source(dir, DELEGATION_SETTLER, XACCOUNT)?;
    let deployer = config.keys.deployer()?;

    let contracts = settlement
        .deploy_delegation_contracts(&deployer, &sender_check, &destination_settler, &xaccount)
        .await?;

    let mut deployments = config.load_deployments()?;
    contracts.record(&mut deployments, config.destination_chain.chain_id);
    deployments.save(&config.paths.deployments_path)?;
    info!("Deployments written to {}", config.paths.deployments_path.display());
    Ok(())
}

async fn fill(config: &Config, settlement: &Settlement, nonce: Option<&str>) -> Result<()> {
    let deployments = config.load_deployments()?;
    let origin_id = config.origin_chain.chain_id;
    let destination_id = config.destination_chain.chain_id;
    let contracts = SimpleContracts {
        origin_settler: resolve_address(
            &config.contracts.origin_settler_env,
            &deployments,
            origin_id,
            ORIGIN_SETTLER,
        )?,
        destination_settler: resolve_address(
            &config.contracts.destination_settler_env,
            &deployments,
            destination_id,
            DESTINATION_SETTLER,
        )?,
        hello_world: resolve_address(
            &config.contracts.hello_world_env,
            &deployments,
            destination_id,
            HELLO_WORLD,
        )?,
    };

    let order_executed_topic = ContractArtifact::load(&config.paths.artifacts_dir, DESTINATION_SETTLER)?
        .event_topic(ORDER_EXECUTED_EVENT)?;
    let order_opened_topic = ContractArtifact::load(&config.paths.artifacts_dir, ORIGIN_SETTLER)?
        .declared_event_topic(ORDER_OPENED_EVENT);
    if order_opened_topic.is_none() {
        warn!(
            "{} declares no {} event: earlier opens of this order cannot be detected",
            ORIGIN_SETTLER, ORDER_OPENED_EVENT
        );
    }
    let user = config.keys.user()?;
    let filler = config.keys.relayer()?;
    let transport = ProofApiClient::new(&config.proof.api_url, &config.proof.get_api_key()?)?;

    let params = CrossChainFill {
        user: &user,
        filler: &filler,
        contracts,
        order_executed_topic,
        order_opened_topic,
        nonce: nonce_or_random(nonce)?,
        reward: U256::from(config.order.reward_wei),
    };
    let outcome = settlement
        .run_cross_chain_fill(&params, &transport, &config.proof.poller())
        .await?;

    info!("Order {} settled", outcome.order_id);
    info!("- Fill: {:?}", outcome.fill_tx);
    info!("- Repay: {:?}", outcome.repay_tx);
    Ok(())
}

async fn delegated_fill(config: &Config, settlement: &Settlement, nonce: Option<&str>) -> Result<()> {
    let deployments = config.load_deployments()?;
    let chain_id = config.destination_chain.chain_id;
    let contracts = DelegationContracts {
        sender_check: resolve_address(
            &config.contracts.sender_check_env,
            &deployments,
            chain_id,
            SENDER_CHECK,
        )?,
        destination_settler: resolve_address(
            &config.contracts.delegation_settler_env,
            &deployments,
            chain_id,
            DELEGATION_SETTLER,
        )?,
        xaccount: resolve_address(&config.contracts.xaccount_env, &deployments, chain_id, XACCOUNT)?,
    };

    let check_topic =
        ContractArtifact::load(&config.paths.artifacts_dir, SENDER_CHECK)?.event_topic(CHECK_EVENT)?;
    let user = config.keys.user()?;
    let relayer = config.keys.relayer()?;

    let params = DelegatedFill {
        user: &user,
        relayer: &relayer,
        contracts,
        check_topic,
        intent_chain_id: config.order.delegated_intent_chain_id,
        nonce: nonce_or_random(nonce)?,
    };
    let outcome = settlement.run_delegated_fill(&params).await?;

    info!("Order {} filled as {:?}", outcome.order_id, outcome.order.user);
    info!("- Fill: {:?}", outcome.fill_tx);
    Ok(())
}
