//! Configuration Management Module
//!
//! Loads the settlement client's TOML configuration. Secrets and deployed contract
//! addresses are never stored in the file: it names the environment variables that
//! hold them, and they are resolved at first use.

pub mod deployments;

use ethereum_types::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::UserSigner;
use crate::error::{SettlerError, SettlerResult};
use crate::evm_client::{
    EvmClient, ReceiptWaitConfig, DEFAULT_GAS_LIMIT, DEFAULT_LOG_BLOCK_RANGE, DEFAULT_LOG_LOOKBACK_BLOCKS,
};
use crate::proof::{ProofPoller, DEFAULT_MAX_ATTEMPTS};

pub use deployments::Deployments;

/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "SETTLER_CONFIG_PATH";

/// Configuration file used when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config/settler.toml";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure.
///
/// - Origin chain (where orders are opened and fillers repaid)
/// - Destination chain (where orders are filled)
/// - Account keys and contract addresses, by environment variable
/// - Proof service and receipt polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub origin_chain: ChainConfig,
    pub destination_chain: ChainConfig,
    pub keys: KeysConfig,
    pub contracts: ContractsConfig,
    pub proof: ProofConfig,
    #[serde(default)]
    pub receipts: ReceiptConfig,
    #[serde(default)]
    pub order: OrderConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// One EVM chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL
    pub rpc_url: String,
    /// Environment variable that overrides `rpc_url` when set
    #[serde(default)]
    pub rpc_url_env: Option<String>,
    /// Chain ID (e.g., 84532 for Base Sepolia)
    pub chain_id: u64,
    /// Gas limit for transactions submitted to this chain
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Blocks behind the head searched for earlier opens and fills
    #[serde(default = "default_log_lookback_blocks")]
    pub log_lookback_blocks: u64,
    /// Widest block range sent in one `eth_getLogs` request
    #[serde(default = "default_log_block_range")]
    pub log_block_range: u64,
}

impl ChainConfig {
    /// RPC URL, preferring the `rpc_url_env` override.
    pub fn resolved_rpc_url(&self) -> String {
        self.rpc_url_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.rpc_url.clone())
    }

    /// Creates a client for this chain.
    pub fn client(&self) -> SettlerResult<EvmClient> {
        Ok(EvmClient::new(&self.resolved_rpc_url(), self.chain_id, self.gas_limit)?
            .with_log_window(self.log_lookback_blocks, self.log_block_range))
    }
}

/// Names of the environment variables holding account keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Deploys the settlement contracts
    pub deployer_private_key_env: String,
    /// Fills orders on the destination chain and claims repayment on the origin
    /// chain; also submits delegated fills
    pub relayer_private_key_env: String,
    /// The intent owner: opens orders and pays the reward, signs intents and
    /// authorizations
    pub user_private_key_env: String,
}

impl KeysConfig {
    pub fn deployer(&self) -> SettlerResult<UserSigner> {
        load_signer(&self.deployer_private_key_env)
    }

    pub fn relayer(&self) -> SettlerResult<UserSigner> {
        load_signer(&self.relayer_private_key_env)
    }

    pub fn user(&self) -> SettlerResult<UserSigner> {
        load_signer(&self.user_private_key_env)
    }
}

/// Names of the environment variables holding deployed contract addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub origin_settler_env: String,
    pub destination_settler_env: String,
    pub hello_world_env: String,
    /// Destination settler deployed alongside `XAccount` for delegated fills
    pub delegation_settler_env: String,
    pub xaccount_env: String,
    pub sender_check_env: String,
}

/// Proof service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    /// JSON-RPC endpoint (e.g., "https://proof.sepolia.polymer.zone")
    pub api_url: String,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
    #[serde(default = "default_proof_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_proof_max_attempts")]
    pub max_attempts: u32,
}

impl ProofConfig {
    pub fn get_api_key(&self) -> SettlerResult<String> {
        read_env(&self.api_key_env)
    }

    pub fn poller(&self) -> ProofPoller {
        ProofPoller::new(Duration::from_millis(self.poll_interval_ms), self.max_attempts)
    }
}

/// Receipt polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptConfig {
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 0 waits without a deadline
    #[serde(default = "default_receipt_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_receipt_poll_interval_ms(),
            timeout_ms: default_receipt_timeout_ms(),
        }
    }
}

impl ReceiptConfig {
    pub fn wait_config(&self) -> ReceiptWaitConfig {
        ReceiptWaitConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
        }
    }
}

/// Order parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    /// Reward attached to `open`, in wei
    #[serde(default = "default_reward_wei")]
    pub reward_wei: u64,
    /// `chainId` embedded in delegated-fill intents
    #[serde(default = "default_delegated_intent_chain_id")]
    pub delegated_intent_chain_id: u64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            reward_wei: default_reward_wei(),
            delegated_intent_chain_id: default_delegated_intent_chain_id(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Foundry build output
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Deployed address record
    #[serde(default = "default_deployments_path")]
    pub deployments_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            deployments_path: default_deployments_path(),
        }
    }
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_log_lookback_blocks() -> u64 {
    DEFAULT_LOG_LOOKBACK_BLOCKS
}

fn default_log_block_range() -> u64 {
    DEFAULT_LOG_BLOCK_RANGE
}

fn default_proof_poll_interval_ms() -> u64 {
    2000
}

fn default_proof_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

fn default_receipt_timeout_ms() -> u64 {
    120_000
}

fn default_reward_wei() -> u64 {
    // 0.01 ETH
    10_000_000_000_000_000
}

fn default_delegated_intent_chain_id() -> u64 {
    7_078_815_900
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_deployments_path() -> PathBuf {
    PathBuf::from("deployments.json")
}

// ============================================================================
// ENVIRONMENT RESOLUTION
// ============================================================================

/// Reads a non-empty environment variable.
///
/// # Returns
///
/// * `Ok(String)` - The trimmed value
/// * `Err(SettlerError::ConfigurationMissing)` - Unset or empty
pub fn read_env(name: &str) -> SettlerResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(SettlerError::ConfigurationMissing(format!(
            "environment variable '{}' not set",
            name
        ))),
    }
}

/// Loads a signer from the hex private key in environment variable `name`.
pub fn load_signer(name: &str) -> SettlerResult<UserSigner> {
    UserSigner::from_hex(&read_env(name)?)
}

/// Resolves a contract address: environment variable `env_name` first, then the
/// deployments record for `chain_id`.
///
/// # Returns
///
/// * `Ok(Address)` - Address found
/// * `Err(SettlerError::ConfigurationMissing)` - Neither source has it, or the variable is not an address
pub fn resolve_address(
    env_name: &str,
    deployments: &Deployments,
    chain_id: u64,
    contract: &str,
) -> SettlerResult<Address> {
    if let Ok(value) = read_env(env_name) {
        return Address::from_str(value.trim_start_matches("0x")).map_err(|_| {
            SettlerError::ConfigurationMissing(format!(
                "environment variable '{}' is not an address: {}",
                env_name, value
            ))
        });
    }

    deployments.get(chain_id, contract).ok_or_else(|| {
        SettlerError::ConfigurationMissing(format!(
            "{} address on chain {}: set '{}' or deploy it first",
            contract, chain_id, env_name
        ))
    })
}

// ============================================================================
// CONFIGURATION LOADING AND VALIDATION
// ============================================================================

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// Uses `path` if given, otherwise `SETTLER_CONFIG_PATH`, otherwise
    /// `config/settler.toml`. A missing file is an error pointing at the template.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Loaded and validated
    /// * `Err(anyhow::Error)` - Missing file, parse error or validation failure
    pub fn load_from_path(path: Option<&str>) -> anyhow::Result<Self> {
        let config_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse '{}': {}", config_path, e))?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/settler.template.toml config/settler.toml\n\
                Then edit config/settler.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Equivalent to `load_from_path(None)`.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_path(None)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - Origin and destination chains have different chain IDs
    /// - RPC and proof service URLs parse
    /// - Polling intervals, attempt budgets and log ranges are non-zero
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.origin_chain.chain_id == self.destination_chain.chain_id {
            return Err(anyhow::anyhow!(
                "Configuration error: origin chain '{}' and destination chain '{}' have the same chain ID {}",
                self.origin_chain.name,
                self.destination_chain.name,
                self.origin_chain.chain_id
            ));
        }

        for chain in [&self.origin_chain, &self.destination_chain] {
            url::Url::parse(&chain.rpc_url).map_err(|e| {
                anyhow::anyhow!("Invalid rpc_url for chain '{}': {}", chain.name, e)
            })?;
            if chain.gas_limit == 0 {
                anyhow::bail!("Configuration error: gas_limit for chain '{}' must be positive", chain.name);
            }
            if chain.log_block_range == 0 {
                anyhow::bail!(
                    "Configuration error: log_block_range for chain '{}' must be positive",
                    chain.name
                );
            }
        }
        url::Url::parse(&self.proof.api_url)
            .map_err(|e| anyhow::anyhow!("Invalid proof api_url: {}", e))?;

        if self.proof.poll_interval_ms == 0 || self.proof.max_attempts == 0 {
            anyhow::bail!("Configuration error: proof poll_interval_ms and max_attempts must be positive");
        }
        if self.receipts.poll_interval_ms == 0 {
            anyhow::bail!("Configuration error: receipts poll_interval_ms must be positive");
        }

        Ok(())
    }

    pub fn load_deployments(&self) -> anyhow::Result<Deployments> {
        Deployments::load(&self.paths.deployments_path)
    }
}
