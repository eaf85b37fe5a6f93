mod abi;
mod calltree;
mod config;
mod decoder;
mod encoding;
mod entrypoint;
mod error;
mod normalize;
mod render;
mod resolver;
mod rpc;
mod simulate;
mod types;

use anyhow::{anyhow, bail, Context, Result};
use calltree::{CallDecoder, DecodeOutcome};
use clap::{Args, Parser, Subcommand};
use config::{ChainConfig, ChainRegistry};
use decoder::EthersAbiDecoder;
use entrypoint::{compute_user_op_hash, EntryPoint, HashCheck};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::H256;
use normalize::{InputMode, UserOperationFields, UserOperationInput};
use resolver::{
    ChainResolver, EtherscanResolver, InterfaceResolver, ProxyResolver, SourcifyResolver,
    StaticResolver, ETHERSCAN_V2_URL, SOURCIFY_URL,
};
use simulate::{Simulator, DEFAULT_BALANCE_OVERRIDE};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use types::UserOperation;

#[derive(Parser, Debug)]
#[command(name = "userop-inspect", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a UserOperation and print its canonical JSON form.
    Normalize(NormalizeArgs),

    /// Compute the userOpHash (EntryPoint.getUserOpHash, or locally with --offline).
    Hash(HashArgs),

    /// Decode callData into a call tree, following nested calls.
    Decode(DecodeArgs),

    /// Run callData from the sender via eth_simulateV1.
    Simulate(SimulateArgs),

    /// Everything at once: normalized op, hash check, decoded calls, optional simulation.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct InputArgs {
    /// `raw` reads one JSON object; `fields` reads the per-field flags.
    #[arg(long, value_enum, default_value_t = InputMode::Raw)]
    mode: InputMode,

    /// UserOperation JSON (raw mode).
    #[arg(long, conflicts_with = "userop_file")]
    userop: Option<String>,

    /// Read the UserOperation JSON from a file, or `-` for stdin (raw mode).
    #[arg(long)]
    userop_file: Option<PathBuf>,

    #[arg(long, default_value = "")]
    sender: String,
    #[arg(long, default_value = "")]
    nonce: String,
    #[arg(long, default_value = "")]
    init_code: String,
    #[arg(long, default_value = "")]
    call_data: String,
    #[arg(long, default_value = "")]
    call_gas_limit: String,
    #[arg(long, default_value = "")]
    verification_gas_limit: String,
    #[arg(long, default_value = "")]
    pre_verification_gas: String,
    #[arg(long, default_value = "")]
    max_fee_per_gas: String,
    #[arg(long, default_value = "")]
    max_priority_fee_per_gas: String,
    #[arg(long, default_value = "")]
    paymaster_and_data: String,
    #[arg(long, default_value = "")]
    signature: String,
}

#[derive(Args, Debug)]
struct ChainArgs {
    /// Chain name or id.
    #[arg(long, env = "USEROP_INSPECT_CHAIN", default_value = "mainnet")]
    chain: String,

    /// Override the chain RPC URL.
    #[arg(long, env = "USEROP_INSPECT_RPC_URL")]
    rpc: Option<String>,

    /// Override the EntryPoint address (defaults to the v0.6 deployment).
    #[arg(long, env = "USEROP_INSPECT_ENTRYPOINT")]
    entrypoint: Option<String>,

    /// Extra chains, JSON: `[{ "chainId": 1, "name": "...", "rpc": "...", "entryPoint": "0x..." }]`.
    #[arg(long)]
    chains_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ResolverArgs {
    /// Directory of `<address>.json` ABI files, consulted before any remote source.
    #[arg(long)]
    abi_dir: Option<PathBuf>,

    /// Enables the Etherscan lookup.
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    etherscan_api_key: Option<String>,

    #[arg(long, env = "USEROP_INSPECT_SOURCIFY_URL", default_value = SOURCIFY_URL)]
    sourcify_url: String,
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    #[command(flatten)]
    input: InputArgs,
}

#[derive(Args, Debug)]
struct HashArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    chain: ChainArgs,

    /// Compare against this hash; exits non-zero on mismatch.
    #[arg(long)]
    expected_hash: Option<String>,

    /// Compute the hash locally instead of calling the EntryPoint.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Print a single JSON object to stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    chain: ChainArgs,

    #[command(flatten)]
    resolver: ResolverArgs,

    /// Only use `--abi-dir`; no proxy or verified-source lookups.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Inner calls nested deeper than this are left undecoded.
    #[arg(long, default_value_t = calltree::DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Print a single JSON object to stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    chain: ChainArgs,

    /// Balance (wei) given to the sender for the simulated call.
    #[arg(long, default_value = DEFAULT_BALANCE_OVERRIDE)]
    balance_override: String,

    /// Print a single JSON object to stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    chain: ChainArgs,

    #[command(flatten)]
    resolver: ResolverArgs,

    /// Compare against this hash; exits non-zero on mismatch.
    #[arg(long)]
    expected_hash: Option<String>,

    /// No network access: local hash, `--abi-dir` only, no simulation.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Also simulate callData via eth_simulateV1.
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Balance (wei) given to the sender for the simulated call.
    #[arg(long, default_value = DEFAULT_BALANCE_OVERRIDE)]
    balance_override: String,

    /// Print a single JSON object to stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl InputArgs {
    fn fields(&self) -> UserOperationFields {
        UserOperationFields {
            sender: self.sender.clone(),
            nonce: self.nonce.clone(),
            init_code: self.init_code.clone(),
            call_data: self.call_data.clone(),
            call_gas_limit: self.call_gas_limit.clone(),
            verification_gas_limit: self.verification_gas_limit.clone(),
            pre_verification_gas: self.pre_verification_gas.clone(),
            max_fee_per_gas: self.max_fee_per_gas.clone(),
            max_priority_fee_per_gas: self.max_priority_fee_per_gas.clone(),
            paymaster_and_data: self.paymaster_and_data.clone(),
            signature: self.signature.clone(),
        }
    }

    fn load(&self) -> Result<UserOperationInput> {
        match self.mode {
            InputMode::Fields => Ok(UserOperationInput::Fields(self.fields())),
            InputMode::Raw => {
                let text = match (&self.userop, &self.userop_file) {
                    (Some(text), _) => text.clone(),
                    (None, Some(path)) if path.as_os_str() == "-" => {
                        io::read_to_string(io::stdin()).context("failed to read stdin")?
                    }
                    (None, Some(path)) => fs::read_to_string(path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                    (None, None) => String::new(),
                };
                Ok(UserOperationInput::Raw(text))
            }
        }
    }

    fn user_op(&self) -> Result<UserOperation> {
        let input = self.load()?;
        let op = normalize::normalize(&input)
            .map_err(|e| {
                tracing::debug!(field = e.field(), mode = ?input.mode(), "rejected user operation");
                e
            })
            .context("invalid or empty UserOperation")?;
        tracing::debug!(sender = %op.sender, "normalized user operation");
        Ok(op)
    }
}

impl ChainArgs {
    fn resolve(&self) -> Result<ChainConfig> {
        let registry = ChainRegistry::load(self.chains_file.as_deref())?;
        registry
            .select(&self.chain)?
            .with_overrides(self.rpc.clone(), self.entrypoint.as_deref())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Always write logs to stderr so stdout can be used for script-friendly outputs.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Normalize(args) => cmd_normalize(args),
        Command::Hash(args) => cmd_hash(args).await,
        Command::Decode(args) => cmd_decode(args).await,
        Command::Simulate(args) => cmd_simulate(args).await,
        Command::Inspect(args) => cmd_inspect(args).await,
    }
}

fn cmd_normalize(args: NormalizeArgs) -> Result<()> {
    let op = args.input.user_op()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&encoding::user_op_to_json(&op))?
    );
    Ok(())
}

async fn cmd_hash(args: HashArgs) -> Result<()> {
    let op = args.input.user_op()?;
    let chain = args.chain.resolve()?;
    let expected = parse_expected_hash(args.expected_hash.as_deref())?;

    let computed = user_op_hash(&op, &chain, args.offline).await?;
    let check = HashCheck::new(computed, expected);

    if args.json {
        println!("{}", render::hash_check_to_json(&check));
    } else {
        println!("chainId:    {}", chain.chain_id);
        println!("entryPoint: {}", encoding::fmt_checksum(chain.entry_point));
        println!("{}", render::render_hash_check(&check));
    }

    ensure_hash_matches(&check)
}

async fn cmd_decode(args: DecodeArgs) -> Result<()> {
    let op = args.input.user_op()?;
    let chain = args.chain.resolve()?;

    let resolver = build_resolver(&args.resolver, &chain, args.offline)?;
    let decoder = CallDecoder::new(resolver, Arc::new(EthersAbiDecoder), chain.context())
        .with_max_depth(args.max_depth);
    let outcome = decode_user_op(&decoder, &op).await;

    if args.json {
        println!("{}", render::outcome_to_json(&outcome));
    } else {
        println!("{}", render::render_outcome(&outcome));
    }
    Ok(())
}

async fn cmd_simulate(args: SimulateArgs) -> Result<()> {
    let op = args.input.user_op()?;
    let chain = args.chain.resolve()?;
    let balance = normalize::parse_integer("balanceOverride", &args.balance_override)
        .context("invalid --balance-override")?;

    let sim = Simulator::new(chain.rpc_url.clone())
        .simulate(&op, balance)
        .await
        .context("simulation failed")?;

    if args.json {
        println!("{}", serde_json::to_string(&sim)?);
    } else {
        println!("{}", render::render_simulation(&sim));
    }
    Ok(())
}

async fn cmd_inspect(args: InspectArgs) -> Result<()> {
    let op = args.input.user_op()?;
    let chain = args.chain.resolve()?;
    let expected = parse_expected_hash(args.expected_hash.as_deref())?;
    let balance = normalize::parse_integer("balanceOverride", &args.balance_override)
        .context("invalid --balance-override")?;

    let resolver = build_resolver(&args.resolver, &chain, args.offline)?;
    let decoder = CallDecoder::new(resolver, Arc::new(EthersAbiDecoder), chain.context());

    let hash_fut = async {
        user_op_hash(&op, &chain, args.offline)
            .await
            .map(|computed| HashCheck::new(computed, expected))
            .map_err(|e| format!("{e:#}"))
    };
    let sim_fut = async {
        if args.simulate && !args.offline {
            Some(
                Simulator::new(chain.rpc_url.clone())
                    .simulate(&op, balance)
                    .await,
            )
        } else {
            None
        }
    };
    let (hash, outcome, simulation) =
        tokio::join!(hash_fut, decode_user_op(&decoder, &op), sim_fut);

    if args.simulate && args.offline {
        tracing::warn!("--offline set: skipping simulation");
    }

    if args.json {
        let report = render::report_to_json(&op, &hash, &outcome, simulation.as_ref());
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("UserOperation:");
        println!(
            "{}",
            serde_json::to_string_pretty(&encoding::user_op_to_json(&op))?
        );
        println!("\nchainId:    {}", chain.chain_id);
        println!("entryPoint: {}", encoding::fmt_checksum(chain.entry_point));
        match &hash {
            Ok(check) => println!("{}", render::render_hash_check(check)),
            Err(e) => println!("userOpHash: unavailable ({e})"),
        }
        println!("\ncallData:\n{}", render::render_outcome(&outcome));
        match &simulation {
            Some(Ok(sim)) => println!("\nsimulation:\n{}", render::render_simulation(sim)),
            Some(Err(e)) => println!("\nsimulation: failed ({e})"),
            None => {}
        }
    }

    match hash {
        Ok(check) => ensure_hash_matches(&check),
        Err(_) => Ok(()),
    }
}

/// An empty callData never reaches the resolver.
async fn decode_user_op(decoder: &CallDecoder, op: &UserOperation) -> DecodeOutcome {
    if !op.has_call_data() {
        return DecodeOutcome::NothingToDecode;
    }
    let outcome = decoder.decode_user_op(op).await;
    if let DecodeOutcome::Failed(reason) = &outcome {
        tracing::warn!(error = %reason, "could not decode callData");
    }
    outcome
}

fn parse_expected_hash(raw: Option<&str>) -> Result<Option<H256>> {
    raw.map(encoding::parse_h256)
        .transpose()
        .context("invalid --expected-hash")
}

fn ensure_hash_matches(check: &HashCheck) -> Result<()> {
    match check.matches() {
        Some(false) => bail!("userOpHash mismatch: {}", check.describe()),
        _ => Ok(()),
    }
}

async fn connect(chain: &ChainConfig) -> Result<Provider<Http>> {
    let provider =
        Provider::<Http>::try_from(chain.rpc_url.as_str())?.interval(Duration::from_millis(350));

    let chain_id = provider
        .get_chainid()
        .await
        .with_context(|| format!("failed to reach RPC at {}", chain.rpc_url))?
        .as_u64();
    if chain_id != chain.chain_id {
        return Err(anyhow!(
            "chainId mismatch: {} is configured as {}, RPC returned {}",
            chain.name,
            chain.chain_id,
            chain_id
        ));
    }
    Ok(provider)
}

async fn user_op_hash(op: &UserOperation, chain: &ChainConfig, offline: bool) -> Result<H256> {
    if offline {
        return Ok(compute_user_op_hash(op, chain.entry_point, chain.chain_id));
    }
    let provider = connect(chain).await?;
    let entry_point = EntryPoint::new(chain.entry_point, Arc::new(provider))?;
    tracing::info!(entry_point = %entry_point.address(), "calling getUserOpHash");
    entry_point.get_user_op_hash(op).await
}

fn build_resolver(
    args: &ResolverArgs,
    chain: &ChainConfig,
    offline: bool,
) -> Result<Arc<dyn InterfaceResolver>> {
    let mut resolvers = ChainResolver::new();
    if let Some(dir) = &args.abi_dir {
        let local = StaticResolver::from_dir(dir)?;
        if local.is_empty() {
            tracing::warn!(dir = %dir.display(), "no ABI files found");
        }
        resolvers.push(Arc::new(local));
    }

    if offline {
        if resolvers.is_empty() {
            tracing::warn!("--offline without --abi-dir: nothing can be decoded");
        }
        return Ok(Arc::new(resolvers));
    }

    resolvers.push(Arc::new(SourcifyResolver::new(args.sourcify_url.clone())));
    match &args.etherscan_api_key {
        Some(key) if !key.is_empty() => resolvers.push(Arc::new(EtherscanResolver::new(
            ETHERSCAN_V2_URL.to_string(),
            key.clone(),
        ))),
        _ => tracing::debug!("ETHERSCAN_API_KEY not set; skipping etherscan"),
    }
    tracing::debug!(resolvers = resolvers.len(), chain = %chain.name, "interface resolvers");

    let provider =
        Provider::<Http>::try_from(chain.rpc_url.as_str())?.interval(Duration::from_millis(350));
    Ok(Arc::new(ProxyResolver::new(
        Arc::new(provider),
        Arc::new(resolvers),
    )))
}
