use crate::encoding::fmt_h256;
use crate::types::UserOperation;
use anyhow::{Context, Result};
use ethers::abi::{encode, Abi, Token};
use ethers::prelude::*;
use ethers::utils::keccak256;
use std::sync::Arc;

const GET_USER_OP_HASH_ABI: &str = r#"[{"inputs":[{"components":[{"internalType":"address","name":"sender","type":"address"},{"internalType":"uint256","name":"nonce","type":"uint256"},{"internalType":"bytes","name":"initCode","type":"bytes"},{"internalType":"bytes","name":"callData","type":"bytes"},{"internalType":"uint256","name":"callGasLimit","type":"uint256"},{"internalType":"uint256","name":"verificationGasLimit","type":"uint256"},{"internalType":"uint256","name":"preVerificationGas","type":"uint256"},{"internalType":"uint256","name":"maxFeePerGas","type":"uint256"},{"internalType":"uint256","name":"maxPriorityFeePerGas","type":"uint256"},{"internalType":"bytes","name":"paymasterAndData","type":"bytes"},{"internalType":"bytes","name":"signature","type":"bytes"}],"internalType":"struct UserOperation","name":"userOp","type":"tuple"}],"name":"getUserOpHash","outputs":[{"internalType":"bytes32","name":"","type":"bytes32"}],"stateMutability":"view","type":"function"}]"#;

/// Read-only view of an EntryPoint v0.6 deployment.
pub struct EntryPoint<M> {
    contract: Contract<M>,
}

impl<M: Middleware + 'static> EntryPoint<M> {
    pub fn new(address: Address, client: Arc<M>) -> Result<Self> {
        let abi: Abi =
            serde_json::from_str(GET_USER_OP_HASH_ABI).context("failed to parse EntryPoint ABI")?;
        Ok(Self {
            contract: Contract::new(address, abi, client),
        })
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    /// `EntryPoint.getUserOpHash(op)` via `eth_call`. Not retried.
    pub async fn get_user_op_hash(&self, op: &UserOperation) -> Result<H256> {
        let hash: H256 = self
            .contract
            .method("getUserOpHash", (op.as_abi_tuple(),))?
            .call()
            .await
            .context("entryPoint.getUserOpHash failed")?;
        Ok(hash)
    }
}

/// v0.6 hash computed locally:
/// `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))`.
pub fn compute_user_op_hash(op: &UserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let packed = encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(op.init_code.as_ref()).to_vec()),
        Token::FixedBytes(keccak256(op.call_data.as_ref()).to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::FixedBytes(keccak256(op.paymaster_and_data.as_ref()).to_vec()),
    ]);

    let op_hash = keccak256(packed);
    H256(keccak256(encode(&[
        Token::FixedBytes(op_hash.to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ])))
}

/// Result of comparing a computed hash with the one the user expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCheck {
    pub computed: H256,
    pub expected: Option<H256>,
}

impl HashCheck {
    pub fn new(computed: H256, expected: Option<H256>) -> Self {
        Self { computed, expected }
    }

    /// `None` when there was nothing to compare against.
    pub fn matches(&self) -> Option<bool> {
        self.expected.map(|e| e == self.computed)
    }

    pub fn describe(&self) -> String {
        match (self.expected, self.matches()) {
            (Some(_), Some(true)) => "match".to_string(),
            (Some(e), _) => format!("MISMATCH (expected {})", fmt_h256(e)),
            (None, _) => "no expected hash given".to_string(),
        }
    }
}
