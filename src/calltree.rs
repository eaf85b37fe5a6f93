//! Recursive call-data decoding.
//!
//! A call is decoded against the interface its target resolves to, then every
//! argument that is itself a call (a tuple carrying a target address and
//! non-empty call bytes) is decoded the same way, each against its own
//! freshly resolved interface.

use crate::abi::ParamDescriptor;
use crate::config::ChainContext;
use crate::decoder::AbiDecoder;
use crate::resolver::InterfaceResolver;
use crate::types::UserOperation;
use ethers::abi::Token;
use ethers::types::{Address, Bytes};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;

pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Tuple component names that carry the callee of an inner call, by priority.
const TARGET_FIELDS: [&str; 2] = ["target", "to"];
/// Tuple component names that carry the inner call bytes, by priority.
const DATA_FIELDS: [&str; 2] = ["data", "callData"];

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedCall {
    pub target: Address,
    pub function_name: String,
    pub args: Vec<ArgValue>,
    /// Declared inputs, aligned with `args`. Empty when the interface has no
    /// descriptor for the function.
    pub input_types: Vec<ParamDescriptor>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArgValue {
    /// address, integers, bool, string, fixed bytes
    Primitive(Token),
    Bytes(Bytes),
    Array(Vec<ArgValue>),
    Tuple(Vec<TupleField>),
    InnerCall(InnerCall),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TupleField {
    pub name: Option<String>,
    pub value: ArgValue,
}

/// A tuple recognised as a call. `fields` is the tuple as decoded;
/// `decoded_call` is set only when the inner call itself decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct InnerCall {
    pub target: Address,
    pub data: Bytes,
    pub fields: Vec<TupleField>,
    pub decoded_call: Option<Box<DecodedCall>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodeOutcome {
    /// The call data was empty.
    NothingToDecode,
    /// The resolver found no interface for the target.
    NoInterface,
    /// Lookup or decoding broke.
    Failed(String),
    Decoded(DecodedCall),
}

impl DecodeOutcome {
    #[cfg(test)]
    pub fn decoded(self) -> Option<DecodedCall> {
        match self {
            DecodeOutcome::Decoded(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_decoded(&self) -> Option<&DecodedCall> {
        match self {
            DecodeOutcome::Decoded(call) => Some(call),
            _ => None,
        }
    }

    /// One-line status for a top-level decode.
    pub fn summary(&self) -> String {
        match self {
            DecodeOutcome::NothingToDecode => "nothing to decode".to_string(),
            DecodeOutcome::NoInterface => {
                "could not decode callData: no interface found for target".to_string()
            }
            DecodeOutcome::Failed(reason) => format!("could not decode callData: {reason}"),
            DecodeOutcome::Decoded(call) => format!("decoded {}", call.function_name),
        }
    }
}

impl ArgValue {
    #[cfg(test)]
    pub fn as_inner_call(&self) -> Option<&InnerCall> {
        match self {
            ArgValue::InnerCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Builds the argument tree for one decoded token.
///
/// Whether a tuple is an inner call is decided here, once, from its
/// component names and values.
pub fn build_arg(token: Token, param: Option<&ParamDescriptor>) -> ArgValue {
    match token {
        Token::Bytes(bytes) => ArgValue::Bytes(Bytes::from(bytes)),
        Token::Array(items) | Token::FixedArray(items) => {
            let element = param.and_then(ParamDescriptor::element);
            ArgValue::Array(
                items
                    .into_iter()
                    .map(|item| build_arg(item, element.as_ref()))
                    .collect(),
            )
        }
        Token::Tuple(members) => {
            let fields: Vec<TupleField> = members
                .into_iter()
                .enumerate()
                .map(|(i, member)| {
                    let component = param.and_then(|p| p.component(i));
                    TupleField {
                        name: component
                            .map(|c| c.name.clone())
                            .filter(|name| !name.is_empty()),
                        value: build_arg(member, component),
                    }
                })
                .collect();

            match call_candidate(&fields) {
                Some((target, data)) => ArgValue::InnerCall(InnerCall {
                    target,
                    data,
                    fields,
                    decoded_call: None,
                }),
                None => ArgValue::Tuple(fields),
            }
        }
        other => ArgValue::Primitive(other),
    }
}

fn field_named<'a>(fields: &'a [TupleField], names: &[&str]) -> Option<&'a ArgValue> {
    names.iter().find_map(|wanted| {
        fields
            .iter()
            .find(|f| f.name.as_deref() == Some(*wanted))
            .map(|f| &f.value)
    })
}

fn call_candidate(fields: &[TupleField]) -> Option<(Address, Bytes)> {
    let target = match field_named(fields, &TARGET_FIELDS)? {
        ArgValue::Primitive(Token::Address(addr)) => *addr,
        _ => return None,
    };
    match field_named(fields, &DATA_FIELDS)? {
        ArgValue::Bytes(data) if !data.is_empty() => Some((target, data.clone())),
        _ => None,
    }
}

/// Decodes calls and their inner calls using injected collaborators.
#[derive(Clone)]
pub struct CallDecoder {
    resolver: Arc<dyn InterfaceResolver>,
    decoder: Arc<dyn AbiDecoder>,
    chain: ChainContext,
    max_depth: usize,
}

impl CallDecoder {
    pub fn new(
        resolver: Arc<dyn InterfaceResolver>,
        decoder: Arc<dyn AbiDecoder>,
        chain: ChainContext,
    ) -> Self {
        Self {
            resolver,
            decoder,
            chain,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Inner calls nested deeper than this are left undecoded.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// The account executes `callData` on itself, so the sender is the target.
    pub async fn decode_user_op(&self, op: &UserOperation) -> DecodeOutcome {
        self.decode(op.sender, &op.call_data).await
    }

    pub async fn decode(&self, target: Address, data: &Bytes) -> DecodeOutcome {
        self.decode_at(target, data.clone(), 0).await
    }

    fn decode_at(
        &self,
        target: Address,
        data: Bytes,
        depth: usize,
    ) -> BoxFuture<'_, DecodeOutcome> {
        async move {
            if data.is_empty() {
                return DecodeOutcome::NothingToDecode;
            }

            let iface = match self.resolver.resolve(target, &self.chain).await {
                Ok(Some(iface)) => iface,
                Ok(None) => return DecodeOutcome::NoInterface,
                Err(e) => return DecodeOutcome::Failed(format!("{e:#}")),
            };

            let (function_name, tokens) = match self.decoder.decode_call(&iface, &data) {
                Ok(decoded) => decoded,
                Err(e) => return DecodeOutcome::Failed(format!("{e:#}")),
            };

            let input_types = iface
                .function_inputs(&function_name)
                .map(<[ParamDescriptor]>::to_vec)
                .unwrap_or_default();

            let args = tokens
                .into_iter()
                .enumerate()
                .map(|(i, token)| build_arg(token, input_types.get(i)));
            // Collected positionally, so order survives concurrent lookups.
            let args = join_all(args.map(|arg| self.enrich(arg, depth))).await;

            DecodeOutcome::Decoded(DecodedCall {
                target,
                function_name,
                args,
                input_types,
            })
        }
        .boxed()
    }

    fn enrich(&self, arg: ArgValue, depth: usize) -> BoxFuture<'_, ArgValue> {
        async move {
            match arg {
                ArgValue::Array(items) => ArgValue::Array(
                    join_all(items.into_iter().map(|item| self.enrich(item, depth))).await,
                ),
                ArgValue::Tuple(fields) => {
                    ArgValue::Tuple(self.enrich_fields(fields, depth).await)
                }
                ArgValue::InnerCall(mut call) => {
                    call.fields = self.enrich_fields(call.fields, depth).await;
                    let inner_depth = depth + 1;
                    if inner_depth > self.max_depth {
                        tracing::debug!(
                            target_address = %call.target,
                            depth = inner_depth,
                            "inner call too deep, not decoding"
                        );
                        return ArgValue::InnerCall(call);
                    }

                    match self.decode_at(call.target, call.data.clone(), inner_depth).await {
                        DecodeOutcome::Decoded(decoded) => {
                            call.decoded_call = Some(Box::new(decoded));
                        }
                        DecodeOutcome::NothingToDecode => {}
                        DecodeOutcome::NoInterface => {
                            tracing::debug!(
                                target_address = %call.target,
                                "no interface for inner call"
                            );
                        }
                        DecodeOutcome::Failed(reason) => {
                            tracing::warn!(
                                target_address = %call.target,
                                error = %reason,
                                "failed to decode inner call"
                            );
                        }
                    }
                    ArgValue::InnerCall(call)
                }
                other => other,
            }
        }
        .boxed()
    }

    async fn enrich_fields(&self, fields: Vec<TupleField>, depth: usize) -> Vec<TupleField> {
        join_all(fields.into_iter().map(|field| async move {
            TupleField {
                name: field.name,
                value: self.enrich(field.value, depth).await,
            }
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{format_type, InterfaceDescription};
    use crate::decoder::EthersAbiDecoder;
    use crate::resolver::fakes::{CountingResolver, FailingResolver};
    use crate::resolver::StaticResolver;
    use anyhow::Result;
    use async_trait::async_trait;
    use ethers::types::U256;

    const CHAIN: ChainContext = ChainContext { chain_id: 1 };

    const ACCOUNT_ABI: &str = r#"[
        {"type":"function","name":"executeCalls","inputs":[
            {"name":"calls","type":"tuple[]","components":[
                {"name":"target","type":"address"},
                {"name":"value","type":"uint256"},
                {"name":"data","type":"bytes"}
            ]}
        ]},
        {"type":"function","name":"run","inputs":[
            {"name":"first","type":"tuple","components":[
                {"name":"to","type":"address"},{"name":"callData","type":"bytes"}]},
            {"name":"second","type":"tuple","components":[
                {"name":"to","type":"address"},{"name":"callData","type":"bytes"}]},
            {"name":"third","type":"tuple","components":[
                {"name":"to","type":"address"},{"name":"callData","type":"bytes"}]}
        ]}
    ]"#;

    const TOKEN_ABI: &str = r#"[
        {"type":"function","name":"transfer","inputs":[
            {"name":"to","type":"address"},{"name":"amount","type":"uint256"}
        ],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"}
    ]"#;

    fn account() -> Address {
        Address::repeat_byte(0xac)
    }
    fn token() -> Address {
        Address::repeat_byte(0x70)
    }
    fn unknown() -> Address {
        Address::repeat_byte(0x99)
    }

    fn account_iface() -> InterfaceDescription {
        InterfaceDescription::from_json(ACCOUNT_ABI).unwrap()
    }
    fn token_iface() -> InterfaceDescription {
        InterfaceDescription::from_json(TOKEN_ABI).unwrap()
    }

    fn encode(iface: &InterfaceDescription, name: &str, args: &[Token]) -> Bytes {
        let f = iface.abi.function(name).unwrap();
        Bytes::from(f.encode_input(args).unwrap())
    }

    fn transfer(amount: u64) -> Bytes {
        encode(
            &token_iface(),
            "transfer",
            &[
                Token::Address(Address::repeat_byte(0x01)),
                Token::Uint(U256::from(amount)),
            ],
        )
    }

    fn pair(to: Address, data: &Bytes) -> Token {
        Token::Tuple(vec![Token::Address(to), Token::Bytes(data.to_vec())])
    }

    fn resolver() -> StaticResolver {
        StaticResolver::new()
            .with(account(), account_iface())
            .with(token(), token_iface())
    }

    fn call_decoder(resolver: impl InterfaceResolver + 'static) -> CallDecoder {
        CallDecoder::new(Arc::new(resolver), Arc::new(EthersAbiDecoder), CHAIN)
    }

    /// Fails lookups for one address, delegates the rest.
    struct FlakyResolver {
        broken: Address,
        inner: StaticResolver,
    }

    #[async_trait]
    impl InterfaceResolver for FlakyResolver {
        async fn resolve(
            &self,
            address: Address,
            chain: &ChainContext,
        ) -> Result<Option<InterfaceDescription>> {
            if address == self.broken {
                return FailingResolver.resolve(address, chain).await;
            }
            self.inner.resolve(address, chain).await
        }
    }

    #[tokio::test]
    async fn empty_data_skips_resolver() {
        let counting = Arc::new(CountingResolver::new(resolver()));
        let decoder = CallDecoder::new(counting.clone(), Arc::new(EthersAbiDecoder), CHAIN);

        let outcome = decoder.decode(account(), &Bytes::default()).await;
        assert_eq!(outcome, DecodeOutcome::NothingToDecode);
        assert_eq!(outcome.summary(), "nothing to decode");
        assert_eq!(counting.calls(), 0);
    }

    #[tokio::test]
    async fn missing_interface_and_bad_selector() {
        let decoder = call_decoder(resolver());

        let outcome = decoder.decode(unknown(), &transfer(1)).await;
        assert_eq!(outcome, DecodeOutcome::NoInterface);
        assert!(outcome.summary().starts_with("could not decode callData"));

        let bogus = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);
        let outcome = decoder.decode(token(), &bogus).await;
        assert!(matches!(outcome, DecodeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn top_level_resolver_error_is_failure() {
        let decoder = call_decoder(FailingResolver);
        let outcome = decoder.decode(token(), &transfer(1)).await;
        match outcome {
            DecodeOutcome::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn flat_call_decodes_with_types() {
        let decoder = call_decoder(resolver());
        let call = decoder.decode(token(), &transfer(42)).await.decoded().unwrap();

        assert_eq!(call.target, token());
        assert_eq!(call.function_name, "transfer");
        assert_eq!(
            call.args,
            vec![
                ArgValue::Primitive(Token::Address(Address::repeat_byte(0x01))),
                ArgValue::Primitive(Token::Uint(U256::from(42))),
            ]
        );
        let types: Vec<String> = call.input_types.iter().map(format_type).collect();
        assert_eq!(types, vec!["address", "uint256"]);
    }

    #[tokio::test]
    async fn enrichment_preserves_argument_order() {
        let data = encode(
            &account_iface(),
            "run",
            &[
                pair(unknown(), &transfer(1)),
                pair(token(), &transfer(2)),
                pair(unknown(), &transfer(3)),
            ],
        );

        let call = call_decoder(resolver())
            .decode(account(), &data)
            .await
            .decoded()
            .unwrap();
        assert_eq!(call.function_name, "run");
        assert_eq!(call.args.len(), 3);

        let first = call.args[0].as_inner_call().unwrap();
        let second = call.args[1].as_inner_call().unwrap();
        let third = call.args[2].as_inner_call().unwrap();

        assert!(first.decoded_call.is_none());
        assert!(third.decoded_call.is_none());
        assert_eq!(first.data, transfer(1));
        assert_eq!(third.data, transfer(3));

        let nested = second.decoded_call.as_ref().unwrap();
        assert_eq!(nested.function_name, "transfer");
        assert_eq!(nested.args[1], ArgValue::Primitive(Token::Uint(U256::from(2))));

        // Original tuple fields stay alongside the annotation.
        assert_eq!(second.fields.len(), 2);
        assert_eq!(second.fields[0].name.as_deref(), Some("to"));
        assert_eq!(
            second.fields[0].value,
            ArgValue::Primitive(Token::Address(token()))
        );
    }

    #[tokio::test]
    async fn nested_lookup_failure_degrades() {
        let flaky = FlakyResolver {
            broken: unknown(),
            inner: resolver(),
        };
        let data = encode(
            &account_iface(),
            "run",
            &[
                pair(token(), &transfer(1)),
                pair(unknown(), &transfer(2)),
                pair(token(), &transfer(3)),
            ],
        );

        let call = call_decoder(flaky)
            .decode(account(), &data)
            .await
            .decoded()
            .unwrap();
        assert_eq!(call.args.len(), 3);
        assert!(call.args[0].as_inner_call().unwrap().decoded_call.is_some());
        assert!(call.args[1].as_inner_call().unwrap().decoded_call.is_none());
        assert!(call.args[2].as_inner_call().unwrap().decoded_call.is_some());
    }

    #[tokio::test]
    async fn nested_decode_failure_degrades() {
        let unknown_selector = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x00]);
        let data = encode(
            &account_iface(),
            "run",
            &[
                pair(token(), &transfer(1)),
                pair(token(), &unknown_selector),
                pair(token(), &transfer(3)),
            ],
        );

        let outcome = call_decoder(resolver()).decode(account(), &data).await;
        let call = outcome.as_decoded().unwrap();
        assert_eq!(call.args.len(), 3);

        let middle = call.args[1].as_inner_call().unwrap();
        assert!(middle.decoded_call.is_none());
        assert_eq!(middle.data, unknown_selector);
        assert!(call.args[0].as_inner_call().unwrap().decoded_call.is_some());
        assert!(call.args[2].as_inner_call().unwrap().decoded_call.is_some());
    }

    fn batch(calls: &[(Address, Bytes)]) -> Bytes {
        let calls = calls
            .iter()
            .map(|(to, data)| {
                Token::Tuple(vec![
                    Token::Address(*to),
                    Token::Uint(U256::zero()),
                    Token::Bytes(data.to_vec()),
                ])
            })
            .collect();
        encode(&account_iface(), "executeCalls", &[Token::Array(calls)])
    }

    #[tokio::test]
    async fn arrays_of_calls_are_walked() {
        let data = batch(&[(token(), transfer(5)), (token(), transfer(6))]);
        let call = call_decoder(resolver())
            .decode(account(), &data)
            .await
            .decoded()
            .unwrap();

        assert_eq!(
            format_type(&call.input_types[0]),
            "(address target, uint256 value, bytes data)[]"
        );
        let ArgValue::Array(items) = &call.args[0] else {
            panic!("expected array, got {:?}", call.args[0]);
        };
        assert_eq!(items.len(), 2);
        for (item, amount) in items.iter().zip([5u64, 6]) {
            let inner = item.as_inner_call().unwrap();
            let nested = inner.decoded_call.as_ref().unwrap();
            assert_eq!(
                nested.args[1],
                ArgValue::Primitive(Token::Uint(U256::from(amount)))
            );
            assert_eq!(inner.fields[1].name.as_deref(), Some("value"));
        }
    }

    #[tokio::test]
    async fn calls_nest_through_accounts() {
        let inner = batch(&[(token(), transfer(7))]);
        let outer = batch(&[(account(), inner)]);

        let call = call_decoder(resolver())
            .decode(account(), &outer)
            .await
            .decoded()
            .unwrap();

        let ArgValue::Array(items) = &call.args[0] else {
            panic!("expected array");
        };
        let level1 = items[0].as_inner_call().unwrap().decoded_call.as_ref().unwrap();
        assert_eq!(level1.function_name, "executeCalls");
        let ArgValue::Array(items) = &level1.args[0] else {
            panic!("expected array");
        };
        let level2 = items[0].as_inner_call().unwrap().decoded_call.as_ref().unwrap();
        assert_eq!(level2.function_name, "transfer");
    }

    #[tokio::test]
    async fn max_depth_stops_recursion() {
        let data = batch(&[(token(), transfer(5))]);
        let call = call_decoder(resolver())
            .with_max_depth(0)
            .decode(account(), &data)
            .await
            .decoded()
            .unwrap();

        let ArgValue::Array(items) = &call.args[0] else {
            panic!("expected array");
        };
        let inner = items[0].as_inner_call().unwrap();
        assert!(inner.decoded_call.is_none());
        assert_eq!(inner.target, token());
    }

    #[test]
    fn empty_inner_data_is_a_plain_tuple() {
        let desc = ParamDescriptor::tuple(
            "call",
            "tuple",
            vec![
                ParamDescriptor::new("target", "address"),
                ParamDescriptor::new("data", "bytes"),
            ],
        );
        let tuple = Token::Tuple(vec![Token::Address(token()), Token::Bytes(Vec::new())]);
        assert!(matches!(build_arg(tuple, Some(&desc)), ArgValue::Tuple(_)));
    }

    #[test]
    fn unnamed_tuple_is_not_a_call() {
        let tuple = Token::Tuple(vec![Token::Address(token()), Token::Bytes(vec![1, 2, 3, 4])]);
        match build_arg(tuple, None) {
            ArgValue::Tuple(fields) => assert!(fields.iter().all(|f| f.name.is_none())),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn target_name_priority() {
        let desc = ParamDescriptor::tuple(
            "",
            "tuple",
            vec![
                ParamDescriptor::new("to", "address"),
                ParamDescriptor::new("target", "address"),
                ParamDescriptor::new("callData", "bytes"),
            ],
        );
        let tuple = Token::Tuple(vec![
            Token::Address(unknown()),
            Token::Address(token()),
            Token::Bytes(vec![1, 2, 3, 4]),
        ]);
        let arg = build_arg(tuple, Some(&desc));
        assert_eq!(arg.as_inner_call().unwrap().target, token());
    }

    #[tokio::test]
    async fn user_op_without_call_data_is_not_decoded() {
        let counting = Arc::new(CountingResolver::new(resolver()));
        let decoder = CallDecoder::new(counting.clone(), Arc::new(EthersAbiDecoder), CHAIN);
        let op = UserOperation {
            sender: account(),
            nonce: U256::zero(),
            init_code: Bytes::default(),
            call_data: Bytes::default(),
            call_gas_limit: U256::zero(),
            verification_gas_limit: U256::zero(),
            pre_verification_gas: U256::zero(),
            max_fee_per_gas: U256::zero(),
            max_priority_fee_per_gas: U256::zero(),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        };

        assert_eq!(decoder.decode_user_op(&op).await, DecodeOutcome::NothingToDecode);
        assert_eq!(counting.calls(), 0);
    }
}
