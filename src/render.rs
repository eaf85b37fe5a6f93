//! Human-readable and JSON output for decode, hash and simulation results.

use crate::abi::{format_type, ParamDescriptor};
use crate::calltree::{ArgValue, DecodeOutcome, DecodedCall, TupleField};
use crate::encoding::{fmt_bytes, fmt_checksum, fmt_h256, user_op_to_json};
use crate::entrypoint::HashCheck;
use crate::simulate::{SimulationError, SimulationResult, SimulationStatus};
use crate::types::UserOperation;
use ethers::abi::Token;
use ethers::types::I256;
use serde_json::{json, Value};

/// Scalar token as shown to users: checksummed addresses, decimal integers.
pub fn format_token(token: &Token) -> String {
    match token {
        Token::Address(a) => fmt_checksum(*a),
        Token::Uint(v) => v.to_string(),
        Token::Int(v) => I256::from_raw(*v).to_string(),
        Token::Bool(b) => b.to_string(),
        Token::String(s) => format!("{s:?}"),
        Token::FixedBytes(b) | Token::Bytes(b) => format!("0x{}", hex::encode(b)),
        Token::Array(items) | Token::FixedArray(items) => {
            let items: Vec<String> = items.iter().map(format_token).collect();
            format!("[{}]", items.join(", "))
        }
        Token::Tuple(items) => {
            let items: Vec<String> = items.iter().map(format_token).collect();
            format!("({})", items.join(", "))
        }
    }
}

fn token_to_json(token: &Token) -> Value {
    match token {
        Token::Bool(b) => json!(b),
        Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
            Value::Array(items.iter().map(token_to_json).collect())
        }
        Token::String(s) => json!(s),
        other => json!(format_token(other)),
    }
}

fn signature(call: &DecodedCall) -> String {
    let types: Vec<String> = call.input_types.iter().map(format_type).collect();
    format!("{}({})", call.function_name, types.join(", "))
}

fn arg_label(call: &DecodedCall, index: usize) -> String {
    call.input_types
        .get(index)
        .map(|p| p.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("arg{index}"))
}

pub fn render_decoded_call(call: &DecodedCall) -> String {
    let mut out = Vec::new();
    push_call(&mut out, 0, call);
    out.join("\n")
}

/// The decoded tree, or the one-line reason there is none.
pub fn render_outcome(outcome: &DecodeOutcome) -> String {
    match outcome {
        DecodeOutcome::Decoded(call) => render_decoded_call(call),
        other => other.summary(),
    }
}

fn push_call(out: &mut Vec<String>, depth: usize, call: &DecodedCall) {
    out.push(format!(
        "{}{} @ {}",
        "  ".repeat(depth),
        signature(call),
        fmt_checksum(call.target)
    ));
    for (i, arg) in call.args.iter().enumerate() {
        push_value(
            out,
            depth + 1,
            &arg_label(call, i),
            call.input_types.get(i),
            arg,
        );
    }
}

fn push_value(
    out: &mut Vec<String>,
    depth: usize,
    label: &str,
    param: Option<&ParamDescriptor>,
    value: &ArgValue,
) {
    let indent = "  ".repeat(depth);
    let header = match param {
        Some(p) => format!("{label} ({})", format_type(p)),
        None => label.to_string(),
    };

    match value {
        ArgValue::Primitive(token) => {
            out.push(format!("{indent}{header}: {}", format_token(token)))
        }
        ArgValue::Bytes(bytes) => out.push(format!("{indent}{header}: {}", fmt_bytes(bytes))),
        ArgValue::Array(items) => {
            if items.is_empty() {
                out.push(format!("{indent}{header}: []"));
                return;
            }
            out.push(format!("{indent}{header}:"));
            let element = param.and_then(ParamDescriptor::element);
            for (i, item) in items.iter().enumerate() {
                push_value(out, depth + 1, &format!("[{i}]"), element.as_ref(), item);
            }
        }
        ArgValue::Tuple(fields) => {
            out.push(format!("{indent}{header}:"));
            push_fields(out, depth + 1, param, fields);
        }
        ArgValue::InnerCall(call) => {
            out.push(format!(
                "{indent}{header}: call to {}",
                fmt_checksum(call.target)
            ));
            push_fields(out, depth + 1, param, &call.fields);
            match &call.decoded_call {
                Some(decoded) => {
                    out.push(format!("{indent}  decoded:"));
                    push_call(out, depth + 2, decoded);
                }
                None => out.push(format!("{indent}  decoded: (not decoded)")),
            }
        }
    }
}

fn push_fields(
    out: &mut Vec<String>,
    depth: usize,
    param: Option<&ParamDescriptor>,
    fields: &[TupleField],
) {
    for (i, field) in fields.iter().enumerate() {
        let label = field.name.clone().unwrap_or_else(|| format!("[{i}]"));
        let component = param.and_then(|p| p.component(i));
        push_value(out, depth, &label, component, &field.value);
    }
}

pub fn arg_to_json(value: &ArgValue) -> Value {
    match value {
        ArgValue::Primitive(token) => token_to_json(token),
        ArgValue::Bytes(bytes) => json!(fmt_bytes(bytes)),
        ArgValue::Array(items) => Value::Array(items.iter().map(arg_to_json).collect()),
        ArgValue::Tuple(fields) => fields_to_json(fields),
        ArgValue::InnerCall(call) => json!({
            "kind": "call",
            "target": fmt_checksum(call.target),
            "data": fmt_bytes(&call.data),
            "fields": fields_to_json(&call.fields),
            "decoded": call.decoded_call.as_deref().map(decoded_call_to_json),
        }),
    }
}

fn fields_to_json(fields: &[TupleField]) -> Value {
    Value::Array(
        fields
            .iter()
            .map(|f| json!({ "name": f.name, "value": arg_to_json(&f.value) }))
            .collect(),
    )
}

pub fn decoded_call_to_json(call: &DecodedCall) -> Value {
    let args: Vec<Value> = call
        .args
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            json!({
                "name": arg_label(call, i),
                "type": call.input_types.get(i).map(format_type),
                "value": arg_to_json(arg),
            })
        })
        .collect();

    json!({
        "target": fmt_checksum(call.target),
        "function": call.function_name,
        "signature": signature(call),
        "args": args,
    })
}

pub fn outcome_to_json(outcome: &DecodeOutcome) -> Value {
    let status = match outcome {
        DecodeOutcome::NothingToDecode => "nothingToDecode",
        DecodeOutcome::NoInterface => "noInterface",
        DecodeOutcome::Failed(_) => "failed",
        DecodeOutcome::Decoded(_) => "decoded",
    };
    json!({
        "status": status,
        "message": outcome.summary(),
        "call": outcome.as_decoded().map(decoded_call_to_json),
    })
}

pub fn hash_check_to_json(check: &HashCheck) -> Value {
    json!({
        "userOpHash": fmt_h256(check.computed),
        "expected": check.expected.map(fmt_h256),
        "matches": check.matches(),
    })
}

pub fn render_hash_check(check: &HashCheck) -> String {
    format!(
        "userOpHash: {}\ncheck:      {}",
        fmt_h256(check.computed),
        check.describe()
    )
}

pub fn simulation_to_json(result: &Result<SimulationResult, SimulationError>) -> Value {
    match result {
        Ok(sim) => serde_json::to_value(sim)
            .unwrap_or_else(|e| json!({ "error": format!("failed to serialize result: {e}") })),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

pub fn render_simulation(sim: &SimulationResult) -> String {
    let status = match sim.status {
        SimulationStatus::Success => "success",
        SimulationStatus::Reverted => "reverted",
    };
    let mut out = vec![
        format!("status:      {status}"),
        format!("gasUsed:     {}", sim.gas_used),
        format!("returnValue: {}", fmt_bytes(&sim.return_value)),
    ];
    if let Some(error) = &sim.error {
        out.push(format!("error:       {error}"));
    }
    out.push(format!("logs:        {}", sim.logs.len()));
    for (i, log) in sim.logs.iter().enumerate() {
        out.push(format!("  [{i}] {}", fmt_checksum(log.address)));
        for topic in &log.topics {
            out.push(format!("      topic {}", fmt_h256(*topic)));
        }
        out.push(format!("      data  {}", fmt_bytes(&log.data)));
    }
    out.join("\n")
}

/// Everything `inspect` learned about one UserOperation, as a single document.
pub fn report_to_json(
    op: &UserOperation,
    hash: &Result<HashCheck, String>,
    decode: &DecodeOutcome,
    simulation: Option<&Result<SimulationResult, SimulationError>>,
) -> Value {
    let hash = match hash {
        Ok(check) => hash_check_to_json(check),
        Err(e) => json!({ "error": e }),
    };
    json!({
        "userOperation": user_op_to_json(op),
        "hash": hash,
        "decode": outcome_to_json(decode),
        "simulation": simulation.map(simulation_to_json),
    })
}
