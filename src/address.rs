use std::{fmt, str::FromStr};

use cosmwasm_schema::cw_serde;
use cosmwasm_std::Uint256;
use ed25519_dalek::VerifyingKey;

use crate::cell::{Cell, CellBuilder};
use crate::error::CodecError;

/// Bits taken by an address on the wire: 2-bit tag, anycast flag, workchain, hash.
pub const ADDRESS_BITS: usize = 2 + 1 + 8 + 256;

/// Chain account identifier. Compared by value.
#[cw_serde]
#[derive(Copy, Eq, Hash)]
pub struct Address {
    pub workchain: i8,
    pub hash: [u8; 32],
}

impl Address {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    /// Standalone cell holding only this address, as returned in get-method stacks.
    pub fn to_cell(&self) -> Result<Cell, CodecError> {
        let mut b = CellBuilder::new();
        b.store_address(self)?;
        b.build()
    }
}

/// Raw form, `workchain:hex`.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, hex::encode(self.hash))
    }
}

impl FromStr for Address {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (workchain, hash) = s.split_once(':').ok_or(CodecError::MalformedAddress)?;
        let workchain = workchain
            .parse::<i8>()
            .map_err(|_| CodecError::MalformedAddress)?;
        let hash = hex::decode(hash).map_err(|_| CodecError::MalformedAddress)?;
        let hash: [u8; 32] = hash
            .try_into()
            .map_err(|_| CodecError::MalformedAddress)?;
        Ok(Address { workchain, hash })
    }
}

/// Raw 256-bit Ed25519 verification key.
#[cw_serde]
#[derive(Copy, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn to_uint(&self) -> Uint256 {
        Uint256::from_be_bytes(self.0)
    }
}

impl From<&VerifyingKey> for PublicKey {
    fn from(key: &VerifyingKey) -> Self {
        PublicKey(key.to_bytes())
    }
}

/// Initial state of a contract: no split depth, not special, code, data, no library.
pub fn state_init(code: &Cell, data: &Cell) -> Result<Cell, CodecError> {
    let mut b = CellBuilder::new();
    b.store_bit(false)?
        .store_bit(false)?
        .store_bit(true)?
        .store_bit(true)?
        .store_bit(false)?
        .store_ref(code.clone())?
        .store_ref(data.clone())?;
    b.build()
}

/// Address a contract deployed with `code` and `data` will live at.
pub fn contract_address(workchain: i8, code: &Cell, data: &Cell) -> Result<Address, CodecError> {
    Ok(Address {
        workchain,
        hash: state_init(code, data)?.hash(),
    })
}
