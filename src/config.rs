use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path, str::FromStr};

/// Canonical EntryPoint v0.6 deployment (same address on every chain).
pub const ENTRYPOINT_V06: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

const BUILTIN_CHAINS: &[(u64, &str, &str)] = &[
    (1, "mainnet", "https://eth.llamarpc.com"),
    (11155111, "sepolia", "https://ethereum-sepolia-rpc.publicnode.com"),
    (10, "optimism", "https://mainnet.optimism.io"),
    (137, "polygon", "https://polygon-rpc.com"),
    (8453, "base", "https://mainnet.base.org"),
    (84532, "base-sepolia", "https://sepolia.base.org"),
    (42161, "arbitrum", "https://arb1.arbitrum.io/rpc"),
];

/// One entry of a chains file (`--chains-file`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRaw {
    pub chain_id: u64,
    pub name: String,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub entry_point: Address,
}

impl ChainConfig {
    /// Applies `--rpc` / `--entrypoint` style overrides on top of the registry entry.
    pub fn with_overrides(
        mut self,
        rpc_override: Option<String>,
        entry_point_override: Option<&str>,
    ) -> Result<Self> {
        if let Some(rpc) = rpc_override {
            self.rpc_url = rpc;
        }
        if let Some(ep) = entry_point_override {
            self.entry_point = parse_addr(ep).context("invalid --entrypoint address")?;
        }
        Ok(self)
    }

    pub fn context(&self) -> ChainContext {
        ChainContext {
            chain_id: self.chain_id,
        }
    }
}

/// What an interface resolver needs to know about the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainContext {
    pub chain_id: u64,
}

#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainConfig>,
}

impl ChainRegistry {
    pub fn builtin() -> Result<Self> {
        let entry_point = parse_addr(ENTRYPOINT_V06)?;
        let chains = BUILTIN_CHAINS
            .iter()
            .map(|(chain_id, name, rpc)| ChainConfig {
                chain_id: *chain_id,
                name: (*name).to_string(),
                rpc_url: (*rpc).to_string(),
                entry_point,
            })
            .collect();
        Ok(Self { chains })
    }

    /// Built-in chains, extended (or overridden by chain id) from an optional file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut registry = Self::builtin()?;
        if let Some(path) = path {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read chains json at {}", path.display()))?;
            registry
                .merge_json(&raw)
                .with_context(|| format!("failed to parse chains json at {}", path.display()))?;
        }
        Ok(registry)
    }

    pub fn merge_json(&mut self, raw: &str) -> Result<()> {
        let entries: Vec<ChainRaw> = serde_json::from_str(raw)?;
        for entry in entries {
            let chain = chain_from_raw(entry)?;
            match self.chains.iter_mut().find(|c| c.chain_id == chain.chain_id) {
                Some(existing) => *existing = chain,
                None => self.chains.push(chain),
            }
        }
        Ok(())
    }

    /// Looks a chain up by name (case-insensitive) or decimal chain id.
    pub fn select(&self, selector: &str) -> Result<ChainConfig> {
        let selector = selector.trim();
        let by_id = selector.parse::<u64>().ok();
        self.chains
            .iter()
            .find(|c| Some(c.chain_id) == by_id || c.name.eq_ignore_ascii_case(selector))
            .cloned()
            .ok_or_else(|| {
                let known: Vec<&str> = self.chains.iter().map(|c| c.name.as_str()).collect();
                anyhow!("unknown chain {selector:?} (known: {})", known.join(", "))
            })
    }
}

fn chain_from_raw(raw: ChainRaw) -> Result<ChainConfig> {
    let rpc_url = match raw.rpc_env_var.as_deref() {
        Some(var) => env::var(var).unwrap_or(raw.rpc.clone()),
        None => raw.rpc.clone(),
    };
    let entry_point = parse_addr(raw.entry_point.as_deref().unwrap_or(ENTRYPOINT_V06))
        .with_context(|| format!("invalid entryPoint for chain {}", raw.chain_id))?;

    Ok(ChainConfig {
        chain_id: raw.chain_id,
        name: raw.name,
        rpc_url,
        entry_point,
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    Address::from_str(s.trim()).map_err(|e| anyhow!("{e}"))
}
