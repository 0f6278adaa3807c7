//! Contract Artifacts
//!
//! Loads Foundry build output (`out/<Source>.sol/<Contract>.json`) for the contracts
//! the client deploys and listens to: creation bytecode for deployments and the
//! ABI for event topics.

use anyhow::{Context, Result};
use ethereum_types::H256;
use serde::Deserialize;
use std::path::Path;

use crate::abi::event_topic;

/// One input of an ABI entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AbiParamJson {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub components: Vec<AbiParamJson>,
}

impl AbiParamJson {
    /// Canonical type string with tuples expanded, e.g. `(address,bytes,uint256)[]`.
    pub fn canonical_type(&self) -> String {
        match self.kind.strip_prefix("tuple") {
            Some(suffix) => {
                let inner: Vec<String> = self.components.iter().map(|c| c.canonical_type()).collect();
                format!("({}){}", inner.join(","), suffix)
            }
            None => self.kind.clone(),
        }
    }
}

/// A function, event, error or constructor entry of a contract ABI.
#[derive(Debug, Clone, Deserialize)]
pub struct AbiEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParamJson>,
}

impl AbiEntry {
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.inputs.iter().map(|i| i.canonical_type()).collect();
        format!("{}({})", self.name, types.join(","))
    }
}

#[derive(Debug, Deserialize)]
struct BytecodeJson {
    object: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactJson {
    abi: Vec<AbiEntry>,
    bytecode: BytecodeJson,
}

/// Compiled contract: ABI plus creation bytecode.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub abi: Vec<AbiEntry>,
    pub bytecode: Vec<u8>,
}

impl ContractArtifact {
    /// Loads `<dir>/<name>.sol/<name>.json`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        Self::load_from_source(dir, name, name)
    }

    /// Loads a contract compiled from a differently named source file,
    /// e.g. `XAccount` from `DestinationSettler.sol`.
    pub fn load_from_source(dir: &Path, source: &str, name: &str) -> Result<Self> {
        let path = dir.join(format!("{}.sol", source)).join(format!("{}.json", name));
        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read artifact {} (run `forge build` first)",
                path.display()
            )
        })?;
        Self::from_json(name, &content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))
    }

    /// Parses an artifact from its JSON text.
    pub fn from_json(name: &str, content: &str) -> Result<Self> {
        let parsed: ArtifactJson = serde_json::from_str(content)?;
        let object = parsed.bytecode.object.trim();
        let bytecode = hex::decode(object.strip_prefix("0x").unwrap_or(object))
            .context("Bytecode object is not hex (unlinked libraries?)")?;

        Ok(Self {
            name: name.to_string(),
            abi: parsed.abi,
            bytecode,
        })
    }

    /// The ABI entry of the named event.
    pub fn event(&self, event_name: &str) -> Option<&AbiEntry> {
        self.abi
            .iter()
            .find(|e| e.kind == "event" && e.name == event_name)
    }

    /// topics[0] of the named event, `None` when the ABI does not declare it.
    pub fn declared_event_topic(&self, event_name: &str) -> Option<H256> {
        self.event(event_name)
            .map(|entry| H256(event_topic(&entry.signature())))
    }

    /// topics[0] of the named event, from its ABI declaration.
    pub fn event_topic(&self, event_name: &str) -> Result<H256> {
        self.declared_event_topic(event_name).with_context(|| {
            format!("Event {} not declared in {} ABI", event_name, self.name)
        })
    }
}
