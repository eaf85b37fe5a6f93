use crate::encoding::{fmt_address, fmt_bytes, fmt_u256, parse_u256_quantity};
use crate::rpc::{JsonRpcClient, RpcError};
use crate::types::UserOperation;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 1000 ETH, enough for the sender to cover any value transfers in callData.
pub const DEFAULT_BALANCE_OVERRIDE: &str = "0x3635c9adc5dea00000";

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("the RPC endpoint does not support eth_simulateV1; use a node or provider that implements it")]
    Unsupported,

    #[error(transparent)]
    Rpc(RpcError),

    #[error("unexpected eth_simulateV1 response: {0}")]
    InvalidResponse(String),
}

impl From<RpcError> for SimulationError {
    fn from(e: RpcError) -> Self {
        if e.is_method_unsupported() {
            SimulationError::Unsupported
        } else {
            SimulationError::Rpc(e)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<H256>,
    #[serde(default)]
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub status: SimulationStatus,
    pub gas_used: U256,
    /// Return data on success, revert data on failure.
    pub return_value: Bytes,
    pub error: Option<String>,
    pub logs: Vec<SimulatedLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCallResult {
    status: String,
    #[serde(default)]
    return_data: Bytes,
    gas_used: String,
    #[serde(default)]
    logs: Vec<SimulatedLog>,
    #[serde(default)]
    error: Option<RawCallError>,
}

#[derive(Debug, Deserialize)]
struct RawCallError {
    #[serde(default)]
    message: String,
}

/// Runs a UserOperation's `callData` as a plain call from the sender to
/// itself, bypassing EntryPoint validation.
#[derive(Debug, Clone)]
pub struct Simulator {
    rpc: JsonRpcClient,
}

impl Simulator {
    pub fn new(rpc_url: String) -> Self {
        Self {
            rpc: JsonRpcClient::new(rpc_url),
        }
    }

    pub async fn simulate(
        &self,
        op: &UserOperation,
        balance_override: U256,
    ) -> Result<SimulationResult, SimulationError> {
        tracing::info!(sender = %op.sender, rpc = self.rpc.url(), "simulating callData");
        let result = self
            .rpc
            .request("eth_simulateV1", build_params(op, balance_override))
            .await?;
        parse_result(result)
    }
}

pub fn build_params(op: &UserOperation, balance_override: U256) -> Value {
    let sender = fmt_address(op.sender);
    let mut overrides = serde_json::Map::new();
    overrides.insert(
        sender.clone(),
        serde_json::json!({ "balance": fmt_u256(balance_override) }),
    );

    serde_json::json!([
        {
            "blockStateCalls": [{
                "stateOverrides": overrides,
                "calls": [{
                    "from": sender,
                    "to": sender,
                    "data": fmt_bytes(&op.call_data),
                }],
            }],
            "validation": false,
            "traceTransfers": false,
        },
        "latest"
    ])
}

pub fn parse_result(result: Value) -> Result<SimulationResult, SimulationError> {
    let call = result
        .get(0)
        .and_then(|block| block.get("calls"))
        .and_then(|calls| calls.get(0))
        .cloned()
        .ok_or_else(|| SimulationError::InvalidResponse("no call result".to_string()))?;

    let raw: RawCallResult = serde_json::from_value(call)
        .map_err(|e| SimulationError::InvalidResponse(e.to_string()))?;

    let status = match parse_u256_quantity(&raw.status) {
        Ok(s) if s == U256::one() => SimulationStatus::Success,
        Ok(_) => SimulationStatus::Reverted,
        Err(e) => {
            return Err(SimulationError::InvalidResponse(format!(
                "bad status {:?}: {e}",
                raw.status
            )))
        }
    };
    let gas_used = parse_u256_quantity(&raw.gas_used)
        .map_err(|e| SimulationError::InvalidResponse(format!("bad gasUsed: {e}")))?;

    Ok(SimulationResult {
        status,
        gas_used,
        return_value: raw.return_data,
        error: raw.error.map(|e| e.message),
        logs: raw.logs,
    })
}
