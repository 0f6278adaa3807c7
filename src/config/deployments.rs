//! Deployed contract addresses, keyed by chain ID and contract name, persisted
//! as JSON so later runs can find what earlier runs deployed.

use anyhow::Context;
use ethereum_types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployments {
    /// chain ID (decimal string) -> contract name -> address
    #[serde(default)]
    pub chains: BTreeMap<String, BTreeMap<String, Address>>,
}

impl Deployments {
    /// Reads the record at `path`. A missing file is an empty record.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn record(&mut self, chain_id: u64, contract: &str, address: Address) {
        self.chains
            .entry(chain_id.to_string())
            .or_default()
            .insert(contract.to_string(), address);
    }

    pub fn get(&self, chain_id: u64, contract: &str) -> Option<Address> {
        self.chains
            .get(&chain_id.to_string())
            .and_then(|contracts| contracts.get(contract))
            .copied()
    }
}
