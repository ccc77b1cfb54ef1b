//! Canonical binary form of a [`DealRecord`].
//!
//! Root cell: `deal_id:u64 state:u2 buyer:addr seller:addr expires_at:u64`,
//! first reference: `guarantor_key:bits256 fee_gainer:addr`,
//! second reference: `fee:coins coins:coins`.
//! The deployed contract reads exactly this shape, and the derived address
//! depends on it, so the layout must not change.

use std::fmt;

use cosmwasm_std::Uint256;
use tracing::debug;

use crate::address::PublicKey;
use crate::cell::{Cell, CellBuilder, CellSlice, MAX_COINS_BYTES};
use crate::error::CodecError;
use crate::stack::{uint_to_u64, StackEntry};
use crate::state::{DealRecord, DealState};

/// Number of entries returned by the `get_deal_state` get-method.
pub const STACK_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealField {
    DealId,
    State,
    BuyerAddress,
    SellerAddress,
    ExpiresAt,
    GuarantorPublicKey,
    FeeGainerAddress,
    FeeAmount,
    CoinsAmount,
}

impl DealField {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DealId => "deal_id",
            Self::State => "state",
            Self::BuyerAddress => "buyer_address",
            Self::SellerAddress => "seller_address",
            Self::ExpiresAt => "expires_at",
            Self::GuarantorPublicKey => "guarantor_public_key",
            Self::FeeGainerAddress => "fee_gainer_address",
            Self::FeeAmount => "fee_amount",
            Self::CoinsAmount => "coins_amount",
        }
    }
}

impl fmt::Display for DealField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

trait FieldContext<T> {
    fn field(self, field: DealField) -> Result<T, CodecError>;
}

impl<T> FieldContext<T> for Result<T, CodecError> {
    fn field(self, field: DealField) -> Result<T, CodecError> {
        self.map_err(|err| {
            debug!(%field, %err, "deal field decode failed");
            CodecError::DecodeError { field }
        })
    }
}

impl<T> FieldContext<T> for Option<T> {
    fn field(self, field: DealField) -> Result<T, CodecError> {
        self.ok_or_else(|| {
            debug!(%field, "deal field missing or mistyped");
            CodecError::DecodeError { field }
        })
    }
}

/// Fails on the named field if the slice has bits or references left.
fn exhausted(slice: &CellSlice<'_>, field: DealField) -> Result<(), CodecError> {
    if slice.is_empty() {
        return Ok(());
    }
    debug!(
        %field,
        bits = slice.remaining_bits(),
        refs = slice.remaining_refs(),
        "trailing data after deal field"
    );
    Err(CodecError::DecodeError { field })
}

/// Whether `amount` fits the 4-bit length prefix of the coins encoding.
fn fits_coins(amount: &Uint256) -> bool {
    amount.to_be_bytes()[..32 - MAX_COINS_BYTES]
        .iter()
        .all(|b| *b == 0)
}

pub fn encode(record: &DealRecord) -> Result<Cell, CodecError> {
    let mut admins = CellBuilder::new();
    admins
        .store_public_key(&record.guarantor_public_key)?
        .store_address(&record.fee_gainer_address)?;

    let mut amounts = CellBuilder::new();
    amounts
        .store_coins(record.fee_amount)?
        .store_coins(record.coins_amount)?;

    let mut root = CellBuilder::new();
    root.store_uint(record.deal_id, 64)?
        .store_uint(record.state.as_u64(), DealState::BITS)?
        .store_address(&record.buyer_address)?
        .store_address(&record.seller_address)?
        .store_uint(record.expires_at, 64)?
        .store_ref(admins.build()?)?
        .store_ref(amounts.build()?)?;
    root.build()
}

pub fn decode_cell(cell: &Cell) -> Result<DealRecord, CodecError> {
    let mut s = cell.parse();
    let deal_id = s.load_uint(64).field(DealField::DealId)?;
    let state = s
        .load_uint(DealState::BITS)
        .and_then(DealState::try_from)
        .field(DealField::State)?;
    let buyer_address = s.load_address().field(DealField::BuyerAddress)?;
    let seller_address = s.load_address().field(DealField::SellerAddress)?;
    let expires_at = s.load_uint(64).field(DealField::ExpiresAt)?;
    if s.remaining_bits() != 0 {
        return Err(CodecError::DecodeError {
            field: DealField::ExpiresAt,
        });
    }

    let mut admins = s.load_ref().map(Cell::parse).field(DealField::GuarantorPublicKey)?;
    let guarantor_public_key = admins
        .load_public_key()
        .field(DealField::GuarantorPublicKey)?;
    let fee_gainer_address = admins.load_address().field(DealField::FeeGainerAddress)?;
    exhausted(&admins, DealField::FeeGainerAddress)?;

    let mut amounts = s.load_ref().map(Cell::parse).field(DealField::FeeAmount)?;
    let fee_amount = amounts.load_coins().field(DealField::FeeAmount)?;
    let coins_amount = amounts.load_coins().field(DealField::CoinsAmount)?;
    exhausted(&amounts, DealField::CoinsAmount)?;
    exhausted(&s, DealField::CoinsAmount)?;

    Ok(DealRecord {
        deal_id,
        state,
        buyer_address,
        seller_address,
        expires_at,
        guarantor_public_key,
        fee_gainer_address,
        fee_amount,
        coins_amount,
    })
}

/// Decodes the flat get-method form: integers for numbers and keys, slices for addresses.
pub fn decode_stack(stack: &[StackEntry]) -> Result<DealRecord, CodecError> {
    let entry = |index: usize| stack.get(index);
    let int = |index: usize| entry(index).and_then(StackEntry::as_int);
    let address = |index: usize, field: DealField| {
        entry(index)
            .and_then(StackEntry::as_slice)
            .field(field)?
            .parse()
            .load_address()
            .field(field)
    };

    let deal_id = int(0).and_then(uint_to_u64).field(DealField::DealId)?;
    let state = int(1)
        .and_then(uint_to_u64)
        .field(DealField::State)?;
    let state = DealState::try_from(state).field(DealField::State)?;
    let buyer_address = address(2, DealField::BuyerAddress)?;
    let seller_address = address(3, DealField::SellerAddress)?;
    let expires_at = int(4).and_then(uint_to_u64).field(DealField::ExpiresAt)?;
    let guarantor_public_key = int(5)
        .map(|key| PublicKey(key.to_be_bytes()))
        .field(DealField::GuarantorPublicKey)?;
    let fee_gainer_address = address(6, DealField::FeeGainerAddress)?;
    let fee_amount = int(7).filter(fits_coins).field(DealField::FeeAmount)?;
    let coins_amount = int(8).filter(fits_coins).field(DealField::CoinsAmount)?;
    if stack.len() > STACK_LEN {
        debug!(len = stack.len(), "trailing entries after deal fields");
        return Err(CodecError::DecodeError {
            field: DealField::CoinsAmount,
        });
    }

    Ok(DealRecord {
        deal_id,
        state,
        buyer_address,
        seller_address,
        expires_at,
        guarantor_public_key,
        fee_gainer_address,
        fee_amount,
        coins_amount,
    })
}

/// Get-method view of a record, in the order [`decode_stack`] reads it.
pub fn to_stack(record: &DealRecord) -> Result<Vec<StackEntry>, CodecError> {
    Ok(vec![
        StackEntry::Int(record.deal_id.into()),
        StackEntry::Int(record.state.as_u64().into()),
        StackEntry::Slice(record.buyer_address.to_cell()?),
        StackEntry::Slice(record.seller_address.to_cell()?),
        StackEntry::Int(record.expires_at.into()),
        StackEntry::Int(record.guarantor_public_key.to_uint()),
        StackEntry::Slice(record.fee_gainer_address.to_cell()?),
        StackEntry::Int(record.fee_amount),
        StackEntry::Int(record.coins_amount),
    ])
}

/// Either representation a record can arrive in.
#[derive(Debug, Clone, Copy)]
pub enum Encoded<'a> {
    Cell(&'a Cell),
    Stack(&'a [StackEntry]),
}

impl<'a> From<&'a Cell> for Encoded<'a> {
    fn from(cell: &'a Cell) -> Self {
        Encoded::Cell(cell)
    }
}

impl<'a> From<&'a [StackEntry]> for Encoded<'a> {
    fn from(stack: &'a [StackEntry]) -> Self {
        Encoded::Stack(stack)
    }
}

pub fn decode<'a>(input: impl Into<Encoded<'a>>) -> Result<DealRecord, CodecError> {
    match input.into() {
        Encoded::Cell(cell) => decode_cell(cell),
        Encoded::Stack(stack) => decode_stack(stack),
    }
}
