//! Contract-ABI call data.
//!
//! Call data is `selector ‖ head ‖ tail`: the selector is the first four bytes of the Keccak-256
//! hash of the canonical signature, the head holds one 32-byte word per argument (the value
//! itself for static types, an offset into the tail for dynamic ones) and the tail holds the
//! length-prefixed, zero-padded payloads of dynamic arguments in argument order.

use std::fmt;
use std::str::FromStr;

use alloy::dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy::hex;
use alloy::json_abi::Function;
use alloy::primitives::{Address, Bytes, Selector, U256, keccak256};

use crate::error::{Error, Result};

const WORD: usize = 32;

/// A single call argument. The variant decides the canonical ABI type used in the signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Argument {
    Address(Address),
    UnsignedInteger(U256),
    Boolean(bool),
    String(String),
    Bytes(Bytes),
}

impl Argument {
    pub fn type_name(&self) -> &'static str {
        match self {
            Argument::Address(_) => "address",
            Argument::UnsignedInteger(_) => "uint256",
            Argument::Boolean(_) => "bool",
            Argument::String(_) => "string",
            Argument::Bytes(_) => "bytes",
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Argument::String(_) | Argument::Bytes(_))
    }

    /// Build an argument from its textual form and a declared type tag.
    ///
    /// Accepted tags are `address`, `uint`/`uint256`, `bool`, `string` and `bytes`. Any other tag
    /// fails with [`Error::UnsupportedArgumentType`] so type mistakes surface here rather than as
    /// a wrong selector on chain.
    pub fn parse(raw: &str, type_tag: &str) -> Result<Self> {
        let tag = type_tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "address" => parse_address(raw).map(Argument::Address),
            "uint" | "uint256" => parse_unsigned(raw, 256).map(Argument::UnsignedInteger),
            "bool" => parse_bool(raw).map(Argument::Boolean),
            "string" => Ok(Argument::String(raw.to_string())),
            "bytes" => parse_hex_bytes(raw).map(Argument::Bytes),
            _ => Err(Error::UnsupportedArgumentType(type_tag.to_string())),
        }
    }

    /// Guess the type of an untyped command-line argument.
    pub fn infer(raw: &str) -> Self {
        if raw.len() == 42 && raw.starts_with("0x") {
            if let Ok(address) = Address::from_str(raw) {
                return Argument::Address(address);
            }
        }
        match raw {
            "true" => return Argument::Boolean(true),
            "false" => return Argument::Boolean(false),
            _ => {}
        }
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(value) = U256::from_str_radix(raw, 10) {
                return Argument::UnsignedInteger(value);
            }
        }
        Argument::String(raw.to_string())
    }

    fn to_token(&self) -> Token {
        match self {
            Argument::Address(address) => Token::Word(address_word(address)),
            Argument::UnsignedInteger(value) => Token::Word(value.to_be_bytes::<WORD>()),
            Argument::Boolean(flag) => Token::Word(bool_word(*flag)),
            Argument::String(text) => Token::Dynamic(text.as_bytes().to_vec()),
            Argument::Bytes(bytes) => Token::Dynamic(bytes.to_vec()),
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Address(address) => write!(f, "{address}"),
            Argument::UnsignedInteger(value) => write!(f, "{value}"),
            Argument::Boolean(flag) => write!(f, "{flag}"),
            Argument::String(text) => write!(f, "\"{text}\""),
            Argument::Bytes(bytes) => write!(f, "{bytes}"),
        }
    }
}

/// Build arguments from parallel value/type lists, as declared by post-deployment actions.
pub fn parse_arguments<S: AsRef<str>, T: AsRef<str>>(
    values: &[S],
    types: &[T],
) -> Result<Vec<Argument>> {
    if values.len() != types.len() {
        return Err(Error::ArgumentCountMismatch {
            args: values.len(),
            types: types.len(),
        });
    }
    values
        .iter()
        .zip(types)
        .map(|(value, tag)| Argument::parse(value.as_ref(), tag.as_ref()))
        .collect()
}

pub fn signature(method: &str, args: &[Argument]) -> String {
    let types = args
        .iter()
        .map(Argument::type_name)
        .collect::<Vec<_>>()
        .join(",");
    format!("{method}({types})")
}

pub fn selector(signature: &str) -> Selector {
    let hash = keccak256(signature.as_bytes());
    Selector::from_slice(&hash[..4])
}

/// Encode a full call: selector of `method(<types of args>)` followed by the argument block.
pub fn encode_call(method: &str, args: &[Argument]) -> Bytes {
    let mut data = selector(&signature(method, args)).to_vec();
    data.extend(encode_arguments(args));
    data.into()
}

/// Encode the argument block alone (no selector).
pub fn encode_arguments(args: &[Argument]) -> Vec<u8> {
    let tokens = args.iter().map(Argument::to_token).collect::<Vec<_>>();
    encode_tokens(&tokens)
}

/// Encode a call from an explicit Solidity signature such as `initialize(uint64,address,string)`
/// and one textual value per parameter.
///
/// Unlike [`encode_call`] the parameter types come from the signature, so any Solidity type is
/// accepted (`uint64`, `int256`, `bytes32`, `address[]`, tuples) and keeps its declared name in
/// the selector. Values use the usual textual forms, `[a,b]` for arrays and `(a,b)` for tuples.
pub fn encode_with_signature<S: AsRef<str>>(signature: &str, values: &[S]) -> Result<Bytes> {
    let function = Function::parse(signature.trim())
        .map_err(|e| Error::invalid_value("signature", signature, e))?;
    if function.inputs.len() != values.len() {
        return Err(Error::ArgumentCountMismatch {
            args: values.len(),
            types: function.inputs.len(),
        });
    }
    let mut types = Vec::with_capacity(values.len());
    let mut tokens = Vec::with_capacity(values.len());
    for (param, value) in function.inputs.iter().zip(values) {
        let ty: DynSolType = param
            .resolve()
            .map_err(|_| Error::UnsupportedArgumentType(param.ty.clone()))?;
        let value = value.as_ref().trim();
        if matches!(ty, DynSolType::Uint(_)) && value.starts_with('-') {
            return Err(Error::NegativeUnsignedValue(value.to_string()));
        }
        let token = ty
            .coerce_str(value)
            .map_err(|e| Error::invalid_value(ty.sol_type_name(), value, e))?;
        types.push(ty.sol_type_name().into_owned());
        tokens.push(token);
    }
    let mut data = selector(&format!("{}({})", function.name, types.join(","))).to_vec();
    data.extend(DynSolValue::Tuple(tokens).abi_encode_params());
    Ok(data.into())
}

/// Read a call result as an unsigned integer. Only the first word is considered; an empty
/// result reads as zero.
pub fn decode_uint(result: &[u8]) -> Result<U256> {
    let word = &result[..result.len().min(WORD)];
    U256::try_from_be_slice(word)
        .ok_or_else(|| Error::invalid_value("uint256", hex::encode_prefixed(word), "does not fit"))
}

enum Token {
    Word([u8; WORD]),
    Dynamic(Vec<u8>),
}

fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        match token {
            Token::Word(word) => head.extend_from_slice(word),
            Token::Dynamic(payload) => {
                let offset = head_len + tail.len();
                head.extend_from_slice(&U256::from(offset).to_be_bytes::<WORD>());
                tail.extend_from_slice(&U256::from(payload.len()).to_be_bytes::<WORD>());
                tail.extend_from_slice(payload);
                tail.resize(tail.len() + padding(payload.len()), 0);
            }
        }
    }
    head.extend(tail);
    head
}

fn padding(len: usize) -> usize {
    (WORD - len % WORD) % WORD
}

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn bool_word(flag: bool) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 1] = flag as u8;
    word
}

fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw.trim()).map_err(|e| Error::invalid_value("address", raw, e))
}

fn parse_unsigned(raw: &str, bits: usize) -> Result<U256> {
    let kind = format!("uint{bits}");
    let trimmed = raw.trim();
    if trimmed.starts_with('-') {
        return Err(Error::NegativeUnsignedValue(raw.to_string()));
    }
    let value = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(digits) => U256::from_str_radix(digits, 16),
        None => U256::from_str_radix(trimmed, 10),
    }
    .map_err(|e| Error::invalid_value(&kind, raw, e))?;
    if value.bit_len() > bits {
        return Err(Error::invalid_value(kind, raw, format!("exceeds {bits} bits")));
    }
    Ok(value)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(Error::invalid_value("bool", other, "expected true or false")),
    }
}

fn parse_hex_bytes(raw: &str) -> Result<Bytes> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| Error::invalid_value("bytes", raw, e))
}
