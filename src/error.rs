use std::time::Duration;

use cosmwasm_std::{OverflowError, StdError};
use thiserror::Error;

use crate::codec::DealField;

/// Exit code reported for failures that have no dedicated code.
pub const GENERIC_EXIT_CODE: u32 = 0xffff;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("cell capacity exceeded: {bits} bits, {refs} refs")]
    CapacityExceeded { bits: usize, refs: usize },
    #[error("malformed field: {needed} bits needed, {remaining} remaining")]
    MalformedField { needed: usize, remaining: usize },
    #[error("missing cell reference")]
    MissingReference,
    #[error("malformed address")]
    MalformedAddress,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("value does not fit in {bits} bits")]
    ValueOutOfRange { bits: usize },
    #[error("could not decode field `{field}`")]
    DecodeError { field: DealField },
    #[error("cell tree depth {depth} exceeds the limit")]
    DepthExceeded { depth: usize },
    #[error("malformed bag of cells: {0}")]
    MalformedBoc(&'static str),
    #[error("malformed stack entry: {0}")]
    MalformedStack(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum ContractError {
    #[error("Standard error: {0}")]
    Std(#[from] StdError),

    #[error("{0}")]
    OverflowError(#[from] OverflowError),

    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("Deal not active")]
    NotActive {},
    #[error("Invalid op")]
    InvalidOp {},
    #[error("Deal not expired")]
    NotExpired {},
    #[error("Invalid signature")]
    InvalidSignature {},
    #[error("Wrong target")]
    WrongTarget {},
    #[error("Not enough coins")]
    NotEnoughCoins {},
    #[error("Unknown sender")]
    UnknownSender {},
}

impl ContractError {
    /// Numeric code reported by the execution environment for this rejection.
    pub fn exit_code(&self) -> u32 {
        match self {
            ContractError::NotActive {} => 101,
            ContractError::InvalidOp {} => 102,
            ContractError::NotExpired {} => 103,
            ContractError::InvalidSignature {} => 104,
            ContractError::WrongTarget {} => 105,
            ContractError::NotEnoughCoins {} => 106,
            ContractError::UnknownSender {} => 107,
            ContractError::Std(_) | ContractError::OverflowError(_) | ContractError::Codec(_) => {
                GENERIC_EXIT_CODE
            }
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Standard error: {0}")]
    Std(#[from] StdError),

    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("Deal ttl cannot be zero")]
    TtlCannotBeZero {},
    #[error("Guarantor public key must be 32 bytes")]
    InvalidPublicKey {},
    #[error("Buyer and seller cannot be the same address")]
    SameParties {},
    #[error("Cannot create deal with less than {min} coins")]
    AmountTooSmall { min: String },
    #[error("Deal not found")]
    DealNotFound {},
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("get method `{method}` failed with exit code {exit_code}")]
    GetMethodFailed { method: &'static str, exit_code: i32 },
    #[error("message rejected with exit code {exit_code}")]
    Rejected { exit_code: i32 },
    #[error("transport error: {0}")]
    Transport(String),
}
