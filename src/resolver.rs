//! Address -> interface lookup.
//!
//! A miss is `Ok(None)`; `Err` means the lookup itself broke (network,
//! malformed response). Callers decide how much of either to tolerate.

use crate::abi::InterfaceDescription;
use crate::config::ChainContext;
use crate::encoding::fmt_address;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, H256};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::{fmt, fs};

pub const SOURCIFY_URL: &str = "https://sourcify.dev/server";
pub const ETHERSCAN_V2_URL: &str = "https://api.etherscan.io/v2/api";

/// `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`
pub const EIP1967_IMPLEMENTATION_SLOT: H256 = H256([
    0x36, 0x08, 0x94, 0xa1, 0x3b, 0xa1, 0xa3, 0x21, 0x06, 0x67, 0xc8, 0x28, 0x49, 0x2d, 0xb9, 0x8d,
    0xca, 0x3e, 0x20, 0x76, 0xcc, 0x37, 0x35, 0xa9, 0x20, 0xa3, 0xca, 0x50, 0x5d, 0x38, 0x2b, 0xbc,
]);

#[async_trait]
pub trait InterfaceResolver: Send + Sync {
    async fn resolve(
        &self,
        address: Address,
        chain: &ChainContext,
    ) -> Result<Option<InterfaceDescription>>;
}

/// Fixed set of known interfaces, typically loaded from `--abi-dir`.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    interfaces: HashMap<Address, InterfaceDescription>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, address: Address, iface: InterfaceDescription) -> Self {
        self.insert(address, iface);
        self
    }

    pub fn insert(&mut self, address: Address, iface: InterfaceDescription) {
        self.interfaces.insert(address, iface);
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Loads every `<address>.json` in `dir`. Files whose stem is not an
    /// address are skipped.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut resolver = Self::new();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read ABI directory {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let address = match Address::from_str(stem) {
                Ok(a) => a,
                Err(_) => {
                    tracing::warn!(file = %path.display(), "skipping ABI file not named by address");
                    continue;
                }
            };
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let iface = InterfaceDescription::from_json(&raw)
                .with_context(|| format!("failed to parse ABI in {}", path.display()))?;
            resolver.insert(address, iface);
        }

        tracing::debug!(count = resolver.len(), dir = %dir.display(), "loaded local ABIs");
        Ok(resolver)
    }
}

#[async_trait]
impl InterfaceResolver for StaticResolver {
    async fn resolve(
        &self,
        address: Address,
        _chain: &ChainContext,
    ) -> Result<Option<InterfaceDescription>> {
        Ok(self.interfaces.get(&address).cloned())
    }
}

/// Verified-source lookup through the Sourcify v2 API.
#[derive(Debug, Clone)]
pub struct SourcifyResolver {
    base_url: String,
    http: reqwest::Client,
}

impl SourcifyResolver {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InterfaceResolver for SourcifyResolver {
    async fn resolve(
        &self,
        address: Address,
        chain: &ChainContext,
    ) -> Result<Option<InterfaceDescription>> {
        let url = format!(
            "{}/v2/contract/{}/{}?fields=abi",
            self.base_url,
            chain.chain_id,
            fmt_address(address)
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = resp.json().await.context("failed to decode JSON")?;
        if !status.is_success() {
            return Err(anyhow!("HTTP {}: {}", status, body));
        }

        sourcify_abi(body)
    }
}

fn sourcify_abi(mut body: Value) -> Result<Option<InterfaceDescription>> {
    match body.get_mut("abi").map(Value::take) {
        Some(abi @ Value::Array(_)) => Ok(Some(InterfaceDescription::from_value(abi)?)),
        _ => Ok(None),
    }
}

/// Verified-source lookup through the Etherscan v2 (multichain) API.
#[derive(Clone)]
pub struct EtherscanResolver {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl fmt::Debug for EtherscanResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtherscanResolver")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl EtherscanResolver {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InterfaceResolver for EtherscanResolver {
    async fn resolve(
        &self,
        address: Address,
        chain: &ChainContext,
    ) -> Result<Option<InterfaceDescription>> {
        let chain_id = chain.chain_id.to_string();
        let address = fmt_address(address);
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("chainid", chain_id.as_str()),
                ("module", "contract"),
                ("action", "getabi"),
                ("address", address.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.base_url))?;

        let status = resp.status();
        let body: Value = resp.json().await.context("failed to decode JSON")?;
        if !status.is_success() {
            return Err(anyhow!("HTTP {}: {}", status, body));
        }

        etherscan_abi(&body)
    }
}

fn etherscan_abi(body: &Value) -> Result<Option<InterfaceDescription>> {
    let ok = body.get("status").and_then(|s| s.as_str()) == Some("1");
    let result = body.get("result").and_then(|r| r.as_str()).unwrap_or_default();
    if !ok {
        // e.g. "Contract source code not verified"
        tracing::debug!(reason = result, "etherscan has no ABI");
        return Ok(None);
    }
    InterfaceDescription::from_json(result).map(Some)
}

/// Follows EIP-1967 proxies: when the implementation slot is set, the
/// implementation's interface is preferred over the proxy's own.
pub struct ProxyResolver<M> {
    client: Arc<M>,
    inner: Arc<dyn InterfaceResolver>,
}

impl<M> ProxyResolver<M> {
    pub fn new(client: Arc<M>, inner: Arc<dyn InterfaceResolver>) -> Self {
        Self { client, inner }
    }
}

pub fn implementation_from_slot(slot: H256) -> Option<Address> {
    let addr = Address::from_slice(&slot.as_bytes()[12..]);
    (!addr.is_zero()).then_some(addr)
}

#[async_trait]
impl<M: Middleware + 'static> InterfaceResolver for ProxyResolver<M> {
    async fn resolve(
        &self,
        address: Address,
        chain: &ChainContext,
    ) -> Result<Option<InterfaceDescription>> {
        match self
            .client
            .get_storage_at(address, EIP1967_IMPLEMENTATION_SLOT, None)
            .await
        {
            Ok(slot) => {
                if let Some(implementation) = implementation_from_slot(slot) {
                    tracing::debug!(
                        proxy = %address,
                        implementation = %implementation,
                        "following EIP-1967 proxy"
                    );
                    match self.inner.resolve(implementation, chain).await {
                        Ok(Some(iface)) => return Ok(Some(iface)),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                implementation = %implementation,
                                "implementation lookup failed, trying proxy address"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, address = %address, "failed to read proxy slot");
            }
        }

        self.inner.resolve(address, chain).await
    }
}

/// Tries resolvers in order; the first hit wins.
#[derive(Default, Clone)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn InterfaceResolver>>,
}

impl ChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resolver: Arc<dyn InterfaceResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

#[async_trait]
impl InterfaceResolver for ChainResolver {
    async fn resolve(
        &self,
        address: Address,
        chain: &ChainContext,
    ) -> Result<Option<InterfaceDescription>> {
        let mut last_err = None;
        let mut any_answered = false;

        for resolver in &self.resolvers {
            match resolver.resolve(address, chain).await {
                Ok(Some(iface)) => return Ok(Some(iface)),
                Ok(None) => any_answered = true,
                Err(e) => {
                    tracing::warn!(error = %e, address = %address, "interface lookup failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if !any_answered => Err(e),
            _ => Ok(None),
        }
    }
}
