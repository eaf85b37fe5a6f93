//! Turns user-supplied text into a [`UserOperation`].
//!
//! Two input shapes are supported: a raw JSON object, or one string per field.
//! Either way the result is all-or-nothing: the first malformed field aborts
//! normalization and nothing partial is returned.

use crate::encoding::fmt_checksum;
use crate::error::ParseError;
use crate::types::UserOperation;
use ethers::types::{Address, Bytes, U256};
use serde_json::{Map, Value};

pub const SENDER: &str = "sender";
pub const NONCE: &str = "nonce";
pub const INIT_CODE: &str = "initCode";
pub const CALL_DATA: &str = "callData";
pub const CALL_GAS_LIMIT: &str = "callGasLimit";
pub const VERIFICATION_GAS_LIMIT: &str = "verificationGasLimit";
pub const PRE_VERIFICATION_GAS: &str = "preVerificationGas";
pub const MAX_FEE_PER_GAS: &str = "maxFeePerGas";
pub const MAX_PRIORITY_FEE_PER_GAS: &str = "maxPriorityFeePerGas";
pub const PAYMASTER_AND_DATA: &str = "paymasterAndData";
pub const SIGNATURE: &str = "signature";

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum InputMode {
    /// A single JSON object.
    Raw,
    /// One text value per field.
    Fields,
}

/// Per-field text inputs. Unset fields are empty strings.
#[derive(Clone, Debug, Default)]
pub struct UserOperationFields {
    pub sender: String,
    pub nonce: String,
    pub init_code: String,
    pub call_data: String,
    pub call_gas_limit: String,
    pub verification_gas_limit: String,
    pub pre_verification_gas: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    pub paymaster_and_data: String,
    pub signature: String,
}

#[derive(Clone, Debug)]
pub enum UserOperationInput {
    Raw(String),
    Fields(UserOperationFields),
}

impl UserOperationInput {
    pub fn mode(&self) -> InputMode {
        match self {
            UserOperationInput::Raw(_) => InputMode::Raw,
            UserOperationInput::Fields(_) => InputMode::Fields,
        }
    }
}

pub fn normalize(input: &UserOperationInput) -> Result<UserOperation, ParseError> {
    match input {
        UserOperationInput::Raw(text) => normalize_raw(text),
        UserOperationInput::Fields(fields) => normalize_fields(fields),
    }
}

fn normalize_raw(text: &str) -> Result<UserOperation, ParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let obj = value.as_object().ok_or(ParseError::NotAnObject)?;

    Ok(UserOperation {
        sender: parse_address(SENDER, &json_text(obj, SENDER)?)?,
        nonce: json_integer(obj, NONCE)?,
        init_code: parse_bytes(INIT_CODE, &json_text(obj, INIT_CODE)?)?,
        call_data: parse_bytes(CALL_DATA, &json_text(obj, CALL_DATA)?)?,
        call_gas_limit: json_integer(obj, CALL_GAS_LIMIT)?,
        verification_gas_limit: json_integer(obj, VERIFICATION_GAS_LIMIT)?,
        pre_verification_gas: json_integer(obj, PRE_VERIFICATION_GAS)?,
        max_fee_per_gas: json_integer(obj, MAX_FEE_PER_GAS)?,
        max_priority_fee_per_gas: json_integer(obj, MAX_PRIORITY_FEE_PER_GAS)?,
        paymaster_and_data: parse_bytes(
            PAYMASTER_AND_DATA,
            &json_text(obj, PAYMASTER_AND_DATA)?,
        )?,
        signature: parse_bytes(SIGNATURE, &json_text(obj, SIGNATURE)?)?,
    })
}

fn normalize_fields(f: &UserOperationFields) -> Result<UserOperation, ParseError> {
    Ok(UserOperation {
        sender: parse_address(SENDER, &f.sender)?,
        nonce: parse_integer(NONCE, &f.nonce)?,
        init_code: parse_bytes(INIT_CODE, &f.init_code)?,
        call_data: parse_bytes(CALL_DATA, &f.call_data)?,
        call_gas_limit: parse_integer(CALL_GAS_LIMIT, &f.call_gas_limit)?,
        verification_gas_limit: parse_integer(VERIFICATION_GAS_LIMIT, &f.verification_gas_limit)?,
        pre_verification_gas: parse_integer(PRE_VERIFICATION_GAS, &f.pre_verification_gas)?,
        max_fee_per_gas: parse_integer(MAX_FEE_PER_GAS, &f.max_fee_per_gas)?,
        max_priority_fee_per_gas: parse_integer(
            MAX_PRIORITY_FEE_PER_GAS,
            &f.max_priority_fee_per_gas,
        )?,
        paymaster_and_data: parse_bytes(PAYMASTER_AND_DATA, &f.paymaster_and_data)?,
        signature: parse_bytes(SIGNATURE, &f.signature)?,
    })
}

/// String value of a field that must be text (address or bytes).
fn json_text(obj: &Map<String, Value>, field: &'static str) -> Result<String, ParseError> {
    match obj.get(field) {
        None => Err(ParseError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) if field == SENDER => Err(ParseError::InvalidAddress {
            field,
            raw: other.to_string(),
        }),
        Some(other) => Err(ParseError::InvalidHex {
            field,
            raw: other.to_string(),
        }),
    }
}

fn json_integer(obj: &Map<String, Value>, field: &'static str) -> Result<U256, ParseError> {
    match obj.get(field) {
        None => Err(ParseError::MissingField(field)),
        Some(Value::String(s)) => parse_integer(field, s),
        // Only integers that survived JSON parsing exactly; floats and
        // negatives are malformed.
        Some(Value::Number(n)) => n.as_u64().map(U256::from).ok_or_else(|| {
            ParseError::InvalidInteger {
                field,
                raw: n.to_string(),
            }
        }),
        Some(other) => Err(ParseError::InvalidInteger {
            field,
            raw: other.to_string(),
        }),
    }
}

/// Integer literal: empty is zero, `0x` is hex, a trailing `n` is stripped,
/// anything else is decimal.
pub fn parse_integer(field: &'static str, raw: &str) -> Result<U256, ParseError> {
    let invalid = || ParseError::InvalidInteger {
        field,
        raw: raw.to_string(),
    };

    let s = raw.trim();
    if s.is_empty() {
        return Ok(U256::zero());
    }

    if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let significant = digits.trim_start_matches('0');
        if significant.is_empty() {
            return Ok(U256::zero());
        }
        if significant.len() > 64 {
            return Err(invalid());
        }
        return U256::from_str_radix(significant, 16).map_err(|_| invalid());
    }

    let digits = s.strip_suffix('n').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    U256::from_dec_str(digits).map_err(|_| invalid())
}

/// Byte-string literal: empty or `0x` is the empty marker, otherwise
/// `0x` followed by an even number of hex digits.
pub fn parse_bytes(field: &'static str, raw: &str) -> Result<Bytes, ParseError> {
    let invalid = || ParseError::InvalidHex {
        field,
        raw: raw.to_string(),
    };

    let s = raw.trim();
    if s.is_empty() || s == "0x" {
        return Ok(Bytes::default());
    }

    let digits = s.strip_prefix("0x").ok_or_else(invalid)?;
    if digits.len() % 2 != 0 {
        return Err(invalid());
    }
    hex::decode(digits).map(Bytes::from).map_err(|_| invalid())
}

/// 20-byte address. Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_address(field: &'static str, raw: &str) -> Result<Address, ParseError> {
    let invalid = || ParseError::InvalidAddress {
        field,
        raw: raw.to_string(),
    };

    let s = raw.trim();
    let digits = s.strip_prefix("0x").ok_or_else(invalid)?;
    if digits.len() != 40 {
        return Err(invalid());
    }
    let bytes = hex::decode(digits).map_err(|_| invalid())?;
    let addr = Address::from_slice(&bytes);

    let has_lower = digits.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = digits.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper && fmt_checksum(addr) != s {
        return Err(invalid());
    }

    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::user_op_to_json;
    use serde_json::json;

    const SENDER_ADDR: &str = "0x921f125a92930cabb2969ad9323261d3a2a784e7";
    const ENTRYPOINT_CHECKSUM: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

    fn valid_json() -> Value {
        json!({
            "sender": SENDER_ADDR,
            "nonce": "0x0",
            "initCode": "0x",
            "callData": "0xb61d27f6",
            "callGasLimit": "530100",
            "verificationGasLimit": "0x7a390",
            "preVerificationGas": "104056n",
            "maxFeePerGas": 1695000030u64,
            "maxPriorityFeePerGas": "1695000000",
            "paymasterAndData": "",
            "signature": "0x5ae30c60",
        })
    }

    fn raw(v: &Value) -> UserOperationInput {
        UserOperationInput::Raw(v.to_string())
    }

    #[test]
    fn integer_literals() {
        assert_eq!(parse_integer(NONCE, "0x10").unwrap(), U256::from(16));
        assert_eq!(parse_integer(NONCE, "10").unwrap(), U256::from(10));
        assert_eq!(parse_integer(NONCE, "10n").unwrap(), U256::from(10));
        assert_eq!(parse_integer(NONCE, "").unwrap(), U256::zero());
        assert_eq!(parse_integer(NONCE, "  42  ").unwrap(), U256::from(42));
        assert_eq!(parse_integer(NONCE, "0X1f").unwrap(), U256::from(31));
    }

    #[test]
    fn integer_literals_rejected() {
        for bad in ["0x", "-1", "+1", "1 0", "abc", "0x1g", "n", "1.5", "0x10n"] {
            let err = parse_integer(NONCE, bad).unwrap_err();
            assert_eq!(err.field(), Some(NONCE), "input {bad:?}");
        }
    }

    #[test]
    fn integer_must_fit_256_bits() {
        let max = format!("0x{}", "f".repeat(64));
        assert_eq!(parse_integer(NONCE, &max).unwrap(), U256::MAX);

        let padded = format!("0x00{}", "f".repeat(64));
        assert_eq!(parse_integer(NONCE, &padded).unwrap(), U256::MAX);

        let too_wide = format!("0x1{}", "0".repeat(64));
        assert!(parse_integer(NONCE, &too_wide).is_err());

        // 2^256
        let overflow =
            "115792089237316195423570985008687907853269984665640564039457584007913129639936";
        assert!(parse_integer(NONCE, overflow).is_err());
    }

    #[test]
    fn byte_string_literals() {
        assert!(parse_bytes(CALL_DATA, "").unwrap().is_empty());
        assert!(parse_bytes(CALL_DATA, "0x").unwrap().is_empty());
        assert!(parse_bytes(CALL_DATA, " 0x ").unwrap().is_empty());
        assert_eq!(
            parse_bytes(CALL_DATA, "0x1234").unwrap(),
            Bytes::from(vec![0x12, 0x34])
        );
    }

    #[test]
    fn odd_length_hex_names_field() {
        let err = parse_bytes(SIGNATURE, "0x123").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidHex {
                field: SIGNATURE,
                raw: "0x123".to_string()
            }
        );
        assert!(err.to_string().contains("invalid hex value for signature"));
        assert!(err.to_string().contains("0x123"));
    }

    #[test]
    fn hex_requires_prefix_and_digits() {
        assert!(parse_bytes(INIT_CODE, "1234").is_err());
        assert!(parse_bytes(INIT_CODE, "0xzz").is_err());
    }

    #[test]
    fn address_checksum_rules() {
        let lower = ENTRYPOINT_CHECKSUM.to_lowercase();
        let a = parse_address(SENDER, ENTRYPOINT_CHECKSUM).unwrap();
        let b = parse_address(SENDER, &lower).unwrap();
        assert_eq!(a, b);

        let upper = format!("0x{}", ENTRYPOINT_CHECKSUM[2..].to_uppercase());
        assert_eq!(parse_address(SENDER, &upper).unwrap(), a);

        // Flip the case of one checksummed letter.
        let broken = ENTRYPOINT_CHECKSUM.replacen("5FF", "5fF", 1);
        assert!(parse_address(SENDER, &broken).is_err());

        assert!(parse_address(SENDER, "0xabc").is_err());
        assert!(parse_address(SENDER, "").is_err());
    }

    #[test]
    fn raw_mode_parses_all_fields() {
        let op = normalize(&raw(&valid_json())).unwrap();
        assert_eq!(op.sender, parse_address(SENDER, SENDER_ADDR).unwrap());
        assert_eq!(op.nonce, U256::zero());
        assert!(op.init_code.is_empty());
        assert_eq!(op.call_data, Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]));
        assert_eq!(op.call_gas_limit, U256::from(530_100));
        assert_eq!(op.verification_gas_limit, U256::from(500_624));
        assert_eq!(op.pre_verification_gas, U256::from(104_056));
        assert_eq!(op.max_fee_per_gas, U256::from(1_695_000_030u64));
        assert_eq!(op.max_priority_fee_per_gas, U256::from(1_695_000_000u64));
        assert!(op.paymaster_and_data.is_empty());
        assert_eq!(op.signature.len(), 4);
    }

    #[test]
    fn raw_mode_single_bad_field_fails_whole_record() {
        let mut v = valid_json();
        v["nonce"] = json!("not-a-number");
        let err = normalize(&raw(&v)).unwrap_err();
        assert_eq!(err.field(), Some(NONCE));

        let mut v = valid_json();
        v["sender"] = json!("0xabc");
        assert!(matches!(
            normalize(&raw(&v)),
            Err(ParseError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn raw_mode_missing_field() {
        let mut v = valid_json();
        v.as_object_mut().unwrap().remove("signature");
        assert_eq!(
            normalize(&raw(&v)).unwrap_err(),
            ParseError::MissingField(SIGNATURE)
        );
    }

    #[test]
    fn raw_mode_rejects_bad_json_and_shapes() {
        let input = UserOperationInput::Raw("{\"sender\":".to_string());
        assert!(matches!(
            normalize(&input),
            Err(ParseError::InvalidJson(_))
        ));

        let input = UserOperationInput::Raw("[]".to_string());
        assert_eq!(normalize(&input).unwrap_err(), ParseError::NotAnObject);

        let input = UserOperationInput::Raw(String::new());
        assert!(normalize(&input).is_err());
    }

    #[test]
    fn raw_mode_rejects_non_integer_numbers() {
        let mut v = valid_json();
        v["callGasLimit"] = json!(1.5);
        assert!(normalize(&raw(&v)).is_err());

        let mut v = valid_json();
        v["callGasLimit"] = json!(-1);
        assert!(normalize(&raw(&v)).is_err());

        let mut v = valid_json();
        v["callData"] = json!(1234);
        assert!(matches!(
            normalize(&raw(&v)),
            Err(ParseError::InvalidHex { field: CALL_DATA, .. })
        ));
    }

    #[test]
    fn canonical_json_round_trips() {
        let op = normalize(&raw(&valid_json())).unwrap();
        let canonical = user_op_to_json(&op);
        let again = normalize(&raw(&canonical)).unwrap();
        assert_eq!(op, again);
        assert_eq!(canonical, user_op_to_json(&again));
    }

    #[test]
    fn fields_mode_defaults_empty_values() {
        let fields = UserOperationFields {
            sender: SENDER_ADDR.to_string(),
            ..Default::default()
        };
        let op = normalize(&UserOperationInput::Fields(fields)).unwrap();
        assert_eq!(op.nonce, U256::zero());
        assert!(op.call_data.is_empty());
        assert!(!op.has_call_data());
    }

    #[test]
    fn fields_mode_fails_as_unit() {
        let fields = UserOperationFields {
            sender: SENDER_ADDR.to_string(),
            nonce: "7".to_string(),
            signature: "0x123".to_string(),
            ..Default::default()
        };
        let input = UserOperationInput::Fields(fields);
        assert_eq!(input.mode(), InputMode::Fields);
        let err = normalize(&input).unwrap_err();
        assert_eq!(err.field(), Some(SIGNATURE));
    }

    #[test]
    fn fields_mode_requires_sender() {
        let err = normalize(&UserOperationInput::Fields(UserOperationFields::default()))
            .unwrap_err();
        assert_eq!(err.field(), Some(SENDER));
    }
}
