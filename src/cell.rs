//! Bounded binary tree container.
//!
//! A [`Cell`] holds up to [`MAX_BITS`] bits of payload and up to [`MAX_REFS`]
//! ordered child cells. Its representation hash is computed bottom-up when the
//! cell is built, so every cell in a tree is immutable and carries its identity.
//! [`CellBuilder`] appends fields left to right and [`CellSlice`] reads them
//! back in the same order.

use std::{fmt, sync::Arc};

use cosmwasm_std::Uint256;
use sha2::{Digest, Sha256};

use crate::address::{Address, PublicKey, ADDRESS_BITS};
use crate::error::CodecError;

pub const MAX_BITS: usize = 1023;
pub const MAX_REFS: usize = 4;

/// Deepest tree the ledger accepts; a leaf has depth 0.
pub const MAX_DEPTH: u16 = 1024;

/// Largest coin amount length, in bytes, that fits the 4-bit prefix.
pub const MAX_COINS_BYTES: usize = 15;

/// Tag of a standard internal address (`addr_std$10`).
const ADDRESS_TAG: u64 = 0b10;

#[derive(Clone)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    depth: u16,
    hash: [u8; 32],
}

impl Cell {
    /// Builds a cell from raw parts. Bits past `bit_len` are cleared.
    pub fn new(
        mut data: Vec<u8>,
        bit_len: usize,
        refs: Vec<Arc<Cell>>,
    ) -> Result<Self, CodecError> {
        if bit_len > MAX_BITS || refs.len() > MAX_REFS {
            return Err(CodecError::CapacityExceeded {
                bits: bit_len,
                refs: refs.len(),
            });
        }
        let byte_len = bit_len.div_ceil(8);
        if data.len() < byte_len {
            return Err(CodecError::MalformedField {
                needed: bit_len,
                remaining: data.len() * 8,
            });
        }
        data.truncate(byte_len);
        if bit_len % 8 != 0 {
            data[byte_len - 1] &= 0xffu8 << (8 - bit_len % 8);
        }
        let depth = match refs.iter().map(|r| r.depth).max() {
            None => 0,
            Some(child) if child < MAX_DEPTH => child + 1,
            Some(child) => {
                return Err(CodecError::DepthExceeded {
                    depth: usize::from(child) + 1,
                })
            }
        };
        Ok(Self::assemble(data, bit_len, refs, depth))
    }

    fn assemble(data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>, depth: u16) -> Self {
        let mut cell = Cell {
            data,
            bit_len,
            refs,
            depth,
            hash: [0; 32],
        };
        cell.hash = cell.repr_hash();
        cell
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn references(&self) -> impl Iterator<Item = &Cell> {
        self.refs.iter().map(|r| &**r)
    }

    pub fn reference(&self, index: usize) -> Option<&Cell> {
        self.refs.get(index).map(|r| &**r)
    }

    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Representation hash: the canonical identity of the tree rooted here.
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    /// Same payload bits, no children.
    pub fn without_refs(&self) -> Cell {
        Self::assemble(self.data.clone(), self.bit_len, Vec::new(), 0)
    }

    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice {
            cell: self,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    pub(crate) fn descriptors(&self) -> [u8; 2] {
        let d1 = self.refs.len() as u8;
        let d2 = (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8;
        [d1, d2]
    }

    /// Payload bytes with the completion bit appended after an incomplete last byte.
    pub(crate) fn padded_data(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        if self.bit_len % 8 != 0 {
            let last = data.len() - 1;
            data[last] |= 0x80 >> (self.bit_len % 8);
        }
        data
    }

    fn repr_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptors());
        hasher.update(self.padded_data());
        for child in &self.refs {
            hasher.update(child.depth.to_be_bytes());
        }
        for child in &self.refs {
            hasher.update(child.hash);
        }
        hasher.finalize().into()
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::assemble(Vec::new(), 0, Vec::new(), 0)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Cell {}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &self.bit_len)
            .field("data", &hex::encode(&self.data))
            .field("refs", &self.refs)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits_left(&self) -> usize {
        MAX_BITS - self.bit_len
    }

    pub fn refs_left(&self) -> usize {
        MAX_REFS - self.refs.len()
    }

    fn reserve(&self, bits: usize, refs: usize) -> Result<(), CodecError> {
        if bits > self.bits_left() || refs > self.refs_left() {
            return Err(CodecError::CapacityExceeded {
                bits: self.bit_len + bits,
                refs: self.refs.len() + refs,
            });
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.bit_len / 8] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CodecError> {
        self.reserve(1, 0)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Big-endian unsigned integer of `bits` width (at most 64).
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, CodecError> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(CodecError::ValueOutOfRange { bits });
        }
        self.reserve(bits, 0)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    /// Two's complement signed integer of `bits` width (1 to 64).
    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self, CodecError> {
        if bits == 0 || bits > 64 {
            return Err(CodecError::ValueOutOfRange { bits });
        }
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << (bits - 1)) - 1;
        if i128::from(value) < min || i128::from(value) > max {
            return Err(CodecError::ValueOutOfRange { bits });
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        self.store_uint(value as u64 & mask, bits)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CodecError> {
        self.reserve(bytes.len() * 8, 0)?;
        for byte in bytes {
            for i in (0..8).rev() {
                self.push_bit((byte >> i) & 1 == 1);
            }
        }
        Ok(self)
    }

    /// Standard internal address: tag, anycast flag, workchain, account hash.
    pub fn store_address(&mut self, address: &Address) -> Result<&mut Self, CodecError> {
        self.reserve(ADDRESS_BITS, 0)?;
        self.store_uint(ADDRESS_TAG, 2)?
            .store_bit(false)?
            .store_int(i64::from(address.workchain), 8)?
            .store_bytes(&address.hash)
    }

    /// Variable-length amount: 4-bit byte count followed by the big-endian bytes.
    pub fn store_coins(&mut self, amount: Uint256) -> Result<&mut Self, CodecError> {
        let bytes = amount.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let len = bytes.len() - skip;
        if len > MAX_COINS_BYTES {
            return Err(CodecError::InvalidAmount(format!(
                "{amount} needs {len} bytes, at most {MAX_COINS_BYTES} fit"
            )));
        }
        self.reserve(4 + len * 8, 0)?;
        self.store_uint(len as u64, 4)?.store_bytes(&bytes[skip..])
    }

    pub fn store_public_key(&mut self, key: &PublicKey) -> Result<&mut Self, CodecError> {
        self.store_bytes(&key.0)
    }

    pub fn store_ref(&mut self, cell: Cell) -> Result<&mut Self, CodecError> {
        self.reserve(0, 1)?;
        self.refs.push(Arc::new(cell));
        Ok(self)
    }

    pub fn build(self) -> Result<Cell, CodecError> {
        Cell::new(self.data, self.bit_len, self.refs)
    }
}

/// Read cursor over a cell's bits and references.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs.len() - self.ref_pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    fn ensure(&self, bits: usize) -> Result<(), CodecError> {
        if bits > self.remaining_bits() {
            return Err(CodecError::MalformedField {
                needed: bits,
                remaining: self.remaining_bits(),
            });
        }
        Ok(())
    }

    fn next_bit(&mut self) -> bool {
        let byte = self.cell.data[self.bit_pos / 8];
        let bit = (byte >> (7 - self.bit_pos % 8)) & 1 == 1;
        self.bit_pos += 1;
        bit
    }

    pub fn load_bit(&mut self) -> Result<bool, CodecError> {
        self.ensure(1)?;
        Ok(self.next_bit())
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64, CodecError> {
        if bits > 64 {
            return Err(CodecError::ValueOutOfRange { bits });
        }
        self.ensure(bits)?;
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.next_bit());
        }
        Ok(value)
    }

    pub fn load_int(&mut self, bits: usize) -> Result<i64, CodecError> {
        if bits == 0 || bits > 64 {
            return Err(CodecError::ValueOutOfRange { bits });
        }
        let raw = self.load_uint(bits)?;
        if bits < 64 && (raw >> (bits - 1)) & 1 == 1 {
            return Ok((raw | (u64::MAX << bits)) as i64);
        }
        Ok(raw as i64)
    }

    pub fn load_bytes(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        self.ensure(len * 8)?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            let mut byte = 0u8;
            for _ in 0..8 {
                byte = (byte << 1) | u8::from(self.next_bit());
            }
            out.push(byte);
        }
        Ok(out)
    }

    pub fn load_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let bytes = self.load_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    pub fn load_address(&mut self) -> Result<Address, CodecError> {
        if self.remaining_bits() < ADDRESS_BITS {
            return Err(CodecError::MalformedAddress);
        }
        let tag = self.load_uint(2)?;
        let anycast = self.load_bit()?;
        if tag != ADDRESS_TAG || anycast {
            return Err(CodecError::MalformedAddress);
        }
        let workchain = self.load_int(8)? as i8;
        let hash = self.load_array::<32>()?;
        Ok(Address { workchain, hash })
    }

    pub fn load_coins(&mut self) -> Result<Uint256, CodecError> {
        let len = self.load_uint(4)? as usize;
        let bytes = self.load_bytes(len)?;
        let mut buf = [0u8; 32];
        buf[32 - len..].copy_from_slice(&bytes);
        Ok(Uint256::from_be_bytes(buf))
    }

    pub fn load_public_key(&mut self) -> Result<PublicKey, CodecError> {
        Ok(PublicKey(self.load_array::<32>()?))
    }

    pub fn load_ref(&mut self) -> Result<&'a Cell, CodecError> {
        let cell = self
            .cell
            .reference(self.ref_pos)
            .ok_or(CodecError::MissingReference)?;
        self.ref_pos += 1;
        Ok(cell)
    }
}
