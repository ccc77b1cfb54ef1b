//! Flat byte form of a cell tree (bag of cells).
//!
//! Cells are laid out as an indexed list in which every parent precedes its
//! children and identical subtrees are stored once; references are written as
//! indices into that list. Only single-root bags are produced or accepted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cell::{Cell, MAX_REFS};
use crate::error::CodecError;

const MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

const FLAG_HAS_INDEX: u8 = 0x80;
const FLAG_HAS_CRC: u8 = 0x40;
const SIZE_MASK: u8 = 0x07;

impl Cell {
    pub fn to_boc(&self) -> Vec<u8> {
        serialize(self)
    }

    pub fn from_boc(bytes: &[u8]) -> Result<Cell, CodecError> {
        deserialize(bytes)
    }
}

pub fn serialize(root: &Cell) -> Vec<u8> {
    let mut order = Vec::new();
    collect(root, &mut order, &mut HashSet::new());
    order.reverse();

    let index: HashMap<[u8; 32], usize> = order
        .iter()
        .enumerate()
        .map(|(i, cell)| (cell.hash(), i))
        .collect();
    let size_bytes = byte_width(order.len());

    let mut cells = Vec::new();
    for cell in &order {
        cells.extend_from_slice(&cell.descriptors());
        cells.extend_from_slice(&cell.padded_data());
        for child in cell.references() {
            write_be(&mut cells, index[&child.hash()], size_bytes);
        }
    }
    let offset_bytes = byte_width(cells.len());

    let mut out = Vec::with_capacity(cells.len() + 6 + 4 * size_bytes + offset_bytes);
    out.extend_from_slice(&MAGIC);
    out.push(size_bytes as u8);
    out.push(offset_bytes as u8);
    write_be(&mut out, order.len(), size_bytes);
    write_be(&mut out, 1, size_bytes);
    write_be(&mut out, 0, size_bytes);
    write_be(&mut out, cells.len(), offset_bytes);
    write_be(&mut out, 0, size_bytes);
    out.extend_from_slice(&cells);
    out
}

/// Post-order walk; reversed it puts every parent before its children.
fn collect<'a>(cell: &'a Cell, order: &mut Vec<&'a Cell>, seen: &mut HashSet<[u8; 32]>) {
    if !seen.insert(cell.hash()) {
        return;
    }
    for child in cell.references() {
        collect(child, order, seen);
    }
    order.push(cell);
}

fn byte_width(value: usize) -> usize {
    let mut width = 1;
    while width < 8 && value >> (8 * width) != 0 {
        width += 1;
    }
    width
}

fn write_be(out: &mut Vec<u8>, value: usize, width: usize) {
    for i in (0..width).rev() {
        out.push((value >> (8 * i)) as u8);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CodecError::MalformedBoc("unexpected end of input"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, width: usize) -> Result<usize, CodecError> {
        Ok(self
            .take(width)?
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
    }
}

struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

pub fn deserialize(bytes: &[u8]) -> Result<Cell, CodecError> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(4)? != MAGIC.as_slice() {
        return Err(CodecError::MalformedBoc("bad magic"));
    }
    let flags = r.byte()?;
    let size_bytes = usize::from(flags & SIZE_MASK);
    if size_bytes == 0 || size_bytes > 4 {
        return Err(CodecError::MalformedBoc("bad reference size"));
    }
    let offset_bytes = usize::from(r.byte()?);
    if offset_bytes == 0 || offset_bytes > 8 {
        return Err(CodecError::MalformedBoc("bad offset size"));
    }
    let cell_count = r.uint(size_bytes)?;
    let roots = r.uint(size_bytes)?;
    let _absent = r.uint(size_bytes)?;
    let total_size = r.uint(offset_bytes)?;
    if roots != 1 {
        return Err(CodecError::MalformedBoc("expected exactly one root"));
    }
    let root = r.uint(size_bytes)?;
    if flags & FLAG_HAS_INDEX != 0 {
        r.take(cell_count.saturating_mul(offset_bytes))?;
    }
    let body = r.take(total_size)?;
    if flags & FLAG_HAS_CRC != 0 {
        let expected = u32::from_le_bytes([r.byte()?, r.byte()?, r.byte()?, r.byte()?]);
        if crc32c(&bytes[..r.pos - 4]) != expected {
            return Err(CodecError::MalformedBoc("checksum mismatch"));
        }
    }
    if cell_count == 0 || root >= cell_count || cell_count > body.len() / 2 {
        return Err(CodecError::MalformedBoc("bad cell count"));
    }

    let mut body = Reader { bytes: body, pos: 0 };
    let mut raw = Vec::with_capacity(cell_count);
    for _ in 0..cell_count {
        raw.push(read_raw_cell(&mut body, size_bytes)?);
    }

    let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
    for (index, cell) in raw.into_iter().enumerate().rev() {
        let mut refs = Vec::with_capacity(cell.refs.len());
        for child in cell.refs {
            if child <= index || child >= cell_count {
                return Err(CodecError::MalformedBoc("reference out of order"));
            }
            let child = built[child]
                .clone()
                .ok_or(CodecError::MalformedBoc("missing child"))?;
            refs.push(child);
        }
        let cell = Cell::new(cell.data, cell.bit_len, refs).map_err(|err| match err {
            CodecError::DepthExceeded { .. } => CodecError::MalformedBoc("cell too deep"),
            other => other,
        })?;
        built[index] = Some(Arc::new(cell));
    }
    built[root]
        .take()
        .map(|cell| Arc::try_unwrap(cell).unwrap_or_else(|shared| (*shared).clone()))
        .ok_or(CodecError::MalformedBoc("missing root"))
}

fn read_raw_cell(r: &mut Reader<'_>, size_bytes: usize) -> Result<RawCell, CodecError> {
    let d1 = r.byte()?;
    let d2 = r.byte()?;
    if d1 & 0x18 != 0 {
        return Err(CodecError::MalformedBoc("exotic cells are not supported"));
    }
    let ref_count = usize::from(d1 & 0x07);
    if ref_count > MAX_REFS {
        return Err(CodecError::MalformedBoc("too many references"));
    }
    let byte_len = usize::from(d2).div_ceil(2);
    let data = r.take(byte_len)?.to_vec();
    let bit_len = if d2 % 2 == 0 {
        byte_len * 8
    } else {
        let last = data.last().copied().unwrap_or(0);
        if last == 0 {
            return Err(CodecError::MalformedBoc("missing completion bit"));
        }
        byte_len * 8 - (last.trailing_zeros() as usize + 1)
    };
    let mut refs = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        refs.push(r.uint(size_bytes)?);
    }
    Ok(RawCell {
        data,
        bit_len,
        refs,
    })
}

fn crc32c(bytes: &[u8]) -> u32 {
    let mut crc = !0u32;
    for byte in bytes {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x82f6_3b78
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellBuilder, MAX_DEPTH};

    fn leaf(value: u64, bits: usize) -> Cell {
        let mut b = CellBuilder::new();
        b.store_uint(value, bits).unwrap();
        b.build().unwrap()
    }

    fn tree() -> Cell {
        let shared = leaf(0x5, 3);
        let mut mid = CellBuilder::new();
        mid.store_uint(0xbeef, 16).unwrap().store_ref(shared.clone()).unwrap();
        let mid = mid.build().unwrap();

        let mut root = CellBuilder::new();
        root.store_uint(1, 1)
            .unwrap()
            .store_ref(mid)
            .unwrap()
            .store_ref(shared)
            .unwrap();
        root.build().unwrap()
    }

    #[test]
    fn empty_cell_bytes() {
        assert_eq!(
            hex::encode(Cell::default().to_boc()),
            "b5ee9c72010101010002000000"
        );
    }

    #[test]
    fn tree_survives_serialization() {
        let root = tree();
        let bytes = root.to_boc();
        let decoded = Cell::from_boc(&bytes).unwrap();
        assert_eq!(decoded.hash(), root.hash());
        assert_eq!(decoded.ref_count(), 2);
        assert_eq!(decoded.reference(0).unwrap().bit_len(), 16);
        assert_eq!(decoded.reference(1).unwrap().bit_len(), 3);
    }

    #[test]
    fn shared_subtrees_are_stored_once() {
        let bytes = tree().to_boc();
        // header: magic, flags, offset size, then the cell count
        assert_eq!(bytes[6], 3);
    }

    #[test]
    fn checksum_is_verified() {
        let mut bytes = Cell::default().to_boc();
        bytes[4] |= FLAG_HAS_CRC;
        let crc = crc32c(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(Cell::from_boc(&bytes).unwrap(), Cell::default());

        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert_eq!(
            Cell::from_boc(&bytes),
            Err(CodecError::MalformedBoc("checksum mismatch"))
        );
    }

    #[test]
    fn crc32c_check_value() {
        assert_eq!(crc32c(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = tree().to_boc();
        for len in [0, 3, 8, bytes.len() - 1] {
            assert!(Cell::from_boc(&bytes[..len]).is_err(), "{len}");
        }
        assert_eq!(
            Cell::from_boc(&[0u8; 16]),
            Err(CodecError::MalformedBoc("bad magic"))
        );
    }

    /// Linear chain of `len` empty cells, each referencing the next, root first.
    fn chain_boc(len: usize) -> Vec<u8> {
        let size_bytes = byte_width(len);
        let mut cells = Vec::new();
        for i in 0..len {
            if i + 1 < len {
                cells.extend_from_slice(&[1, 0]);
                write_be(&mut cells, i + 1, size_bytes);
            } else {
                cells.extend_from_slice(&[0, 0]);
            }
        }
        let mut out = MAGIC.to_vec();
        out.push(size_bytes as u8);
        out.push(4);
        write_be(&mut out, len, size_bytes);
        write_be(&mut out, 1, size_bytes);
        write_be(&mut out, 0, size_bytes);
        write_be(&mut out, cells.len(), 4);
        write_be(&mut out, 0, size_bytes);
        out.extend_from_slice(&cells);
        out
    }

    #[test]
    fn chain_at_depth_limit_is_accepted() {
        let root = Cell::from_boc(&chain_boc(usize::from(MAX_DEPTH) + 1)).unwrap();
        assert_eq!(root.depth(), MAX_DEPTH);
        assert_eq!(Cell::from_boc(&root.to_boc()).unwrap(), root);
    }

    #[test]
    fn chain_past_depth_limit_is_rejected() {
        assert_eq!(
            Cell::from_boc(&chain_boc(usize::from(MAX_DEPTH) + 2)),
            Err(CodecError::MalformedBoc("cell too deep"))
        );
        // deep enough to overflow a 16-bit depth counter
        assert_eq!(
            Cell::from_boc(&chain_boc(66_000)),
            Err(CodecError::MalformedBoc("cell too deep"))
        );
    }
}
