//! Values returned by a read-only get-method call.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cosmwasm_std::Uint256;
use serde_json::Value;

use crate::cell::Cell;
use crate::error::CodecError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEntry {
    Int(Uint256),
    Slice(Cell),
}

impl StackEntry {
    pub fn as_int(&self) -> Option<Uint256> {
        match self {
            StackEntry::Int(value) => Some(*value),
            StackEntry::Slice(_) => None,
        }
    }

    pub fn as_slice(&self) -> Option<&Cell> {
        match self {
            StackEntry::Slice(cell) => Some(cell),
            StackEntry::Int(_) => None,
        }
    }

    /// Parses one entry of the JSON stack served by ledger HTTP APIs:
    /// `["num", "0x1f"]` or `["cell", {"bytes": "<base64 bag of cells>"}]`.
    pub fn from_json(value: &Value) -> Result<Self, CodecError> {
        let malformed = || CodecError::MalformedStack(value.to_string());
        let (kind, payload) = match value.as_array().map(Vec::as_slice) {
            Some([kind, payload]) => (kind.as_str().ok_or_else(malformed)?, payload),
            _ => return Err(malformed()),
        };
        match kind {
            "num" => {
                let text = payload.as_str().ok_or_else(malformed)?;
                parse_hex_uint(text).ok_or_else(malformed).map(StackEntry::Int)
            }
            "cell" | "slice" => {
                let bytes = payload
                    .get("bytes")
                    .and_then(Value::as_str)
                    .ok_or_else(malformed)?;
                let bytes = STANDARD.decode(bytes).map_err(|_| malformed())?;
                Ok(StackEntry::Slice(Cell::from_boc(&bytes)?))
            }
            _ => Err(malformed()),
        }
    }

    pub fn parse_json_stack(stack: &Value) -> Result<Vec<Self>, CodecError> {
        stack
            .as_array()
            .ok_or_else(|| CodecError::MalformedStack(stack.to_string()))?
            .iter()
            .map(StackEntry::from_json)
            .collect()
    }
}

/// `0x`-prefixed big-endian hex; negative values are not valid here.
fn parse_hex_uint(text: &str) -> Option<Uint256> {
    let digits = text.strip_prefix("0x")?;
    if digits.is_empty() || digits.len() > 64 {
        return None;
    }
    let padded = format!("{digits:0>64}");
    let bytes: [u8; 32] = hex::decode(padded).ok()?.try_into().ok()?;
    Some(Uint256::from_be_bytes(bytes))
}

pub(crate) fn uint_to_u64(value: Uint256) -> Option<u64> {
    let bytes = value.to_be_bytes();
    if bytes[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[24..]);
    Some(u64::from_be_bytes(low))
}
