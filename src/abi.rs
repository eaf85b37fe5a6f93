//! Interface descriptions and parameter type descriptors.
//!
//! `ethers::abi::Abi` drops tuple component names, so every interface keeps a
//! second, name-preserving view of its functions' inputs alongside it. The
//! decoder uses the former; tree building and rendering use the latter.

use anyhow::{anyhow, Context, Result};
use ethers::abi::{Abi, AbiParser, ParamType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One ABI parameter as declared in JSON ABI (`name`, `type`, `components`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ParamDescriptor>,
}

impl ParamDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            components: Vec::new(),
        }
    }

    pub fn tuple(
        name: impl Into<String>,
        kind: impl Into<String>,
        components: Vec<ParamDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            components,
        }
    }

    /// Descriptor of one element when this is an array type
    /// (`uint256[]` -> `uint256`, `tuple[2][]` -> `tuple[2]`).
    pub fn element(&self) -> Option<ParamDescriptor> {
        let kind = self.kind.strip_suffix(']')?;
        let open = kind.rfind('[')?;
        Some(ParamDescriptor {
            name: String::new(),
            kind: kind[..open].to_string(),
            components: self.components.clone(),
        })
    }

    pub fn component(&self, index: usize) -> Option<&ParamDescriptor> {
        self.components.get(index)
    }
}

/// Renders a type the way a Solidity signature would show it, with tuple
/// components spelled out as `(type name, ...)`.
pub fn format_type(param: &ParamDescriptor) -> String {
    match param.kind.strip_prefix("tuple") {
        Some(array_suffix) => {
            let inner = param
                .components
                .iter()
                .map(|c| {
                    let ty = format_type(c);
                    if c.name.is_empty() {
                        ty
                    } else {
                        format!("{ty} {}", c.name)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({inner}){array_suffix}")
        }
        None => param.kind.clone(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub inputs: Vec<ParamDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RawAbiItem {
    #[serde(rename = "type", default = "default_item_type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    inputs: Vec<ParamDescriptor>,
}

fn default_item_type() -> String {
    "function".to_string()
}

/// A contract interface as recovered by a resolver.
#[derive(Clone, Debug)]
pub struct InterfaceDescription {
    pub abi: Abi,
    /// Functions in declaration order.
    pub functions: Vec<FunctionDescriptor>,
}

impl InterfaceDescription {
    /// Accepts a JSON ABI array, an array of human-readable signatures, or a
    /// build artifact object with an `abi` key.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).context("ABI is not valid JSON")?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("abi") {
                Some(Value::Array(items)) => items,
                _ => return Err(anyhow!("expected a JSON ABI array or an object with `abi`")),
            },
            _ => return Err(anyhow!("expected a JSON ABI array")),
        };

        if !items.is_empty() && items.iter().all(Value::is_string) {
            let signatures: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            return Self::from_human_readable(&signatures);
        }

        let items: Vec<Value> = items.into_iter().map(fill_abi_defaults).collect();

        let raw: Vec<RawAbiItem> = serde_json::from_value(Value::Array(items.clone()))
            .context("failed to read ABI parameter descriptors")?;
        let abi: Abi =
            serde_json::from_value(Value::Array(items)).context("failed to parse ABI")?;

        let functions = raw
            .into_iter()
            .filter(|item| item.kind == "function")
            .filter_map(|item| {
                item.name.map(|name| FunctionDescriptor {
                    name,
                    inputs: item.inputs,
                })
            })
            .collect();

        Ok(Self { abi, functions })
    }

    /// Human-readable signatures, e.g. `function transfer(address to, uint256 amount)`.
    ///
    /// Tuple component names are not recoverable from this form.
    pub fn from_human_readable(signatures: &[&str]) -> Result<Self> {
        let abi = AbiParser::default()
            .parse(signatures)
            .context("failed to parse human-readable ABI")?;
        Ok(Self::from_abi(abi))
    }

    pub fn from_abi(abi: Abi) -> Self {
        let functions = abi
            .functions()
            .map(|f| FunctionDescriptor {
                name: f.name.clone(),
                inputs: f
                    .inputs
                    .iter()
                    .map(|p| describe_param_type(&p.name, &p.kind))
                    .collect(),
            })
            .collect();
        Self { abi, functions }
    }

    /// Declared inputs of the first function named `name`.
    ///
    /// Overloads are not disambiguated: the first declaration wins.
    pub fn function_inputs(&self, name: &str) -> Option<&[ParamDescriptor]> {
        self.functions
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.inputs.as_slice())
    }
}

/// Explorers and hand-written ABIs often omit `outputs`/`stateMutability`.
fn fill_abi_defaults(mut item: Value) -> Value {
    if let Some(obj) = item.as_object_mut() {
        let is_function = obj
            .get("type")
            .and_then(|t| t.as_str())
            .map_or(true, |t| t == "function");
        if is_function {
            obj.entry("type").or_insert_with(|| Value::from("function"));
            obj.entry("inputs").or_insert_with(|| Value::Array(Vec::new()));
            obj.entry("outputs").or_insert_with(|| Value::Array(Vec::new()));
            obj.entry("stateMutability")
                .or_insert_with(|| Value::from("nonpayable"));
        }
    }
    item
}

fn describe_param_type(name: &str, kind: &ParamType) -> ParamDescriptor {
    match kind {
        ParamType::Tuple(members) => ParamDescriptor::tuple(
            name,
            "tuple",
            members
                .iter()
                .map(|m| describe_param_type("", m))
                .collect(),
        ),
        ParamType::Array(inner) => {
            let mut d = describe_param_type(name, inner);
            d.kind.push_str("[]");
            d
        }
        ParamType::FixedArray(inner, len) => {
            let mut d = describe_param_type(name, inner);
            d.kind.push_str(&format!("[{len}]"));
            d
        }
        other => ParamDescriptor::new(name, other.to_string()),
    }
}
