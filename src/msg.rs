use cosmwasm_schema::cw_serde;
use cosmwasm_std::HexBinary;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::address::{Address, PublicKey};
use crate::cell::{Cell, CellBuilder};
use crate::error::{CodecError, ContractError};

pub const OP_BITS: usize = 32;
pub const QUERY_ID_BITS: usize = 64;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpCode {
    Complete = 1,
    Cancel = 2,
    SellerCompletion = 0x4e8e_ec8f,
    FeeGainerCompletion = 0x1139_7f78,
    Cancellation = 0x7255_1da1,
}

impl OpCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(OpCode::Complete),
            2 => Some(OpCode::Cancel),
            0x4e8e_ec8f => Some(OpCode::SellerCompletion),
            0x1139_7f78 => Some(OpCode::FeeGainerCompletion),
            0x7255_1da1 => Some(OpCode::Cancellation),
            _ => None,
        }
    }
}

fn op_cell(op: OpCode, query_id: u64) -> Result<Cell, CodecError> {
    let mut b = CellBuilder::new();
    b.store_uint(op as u64, OP_BITS)?
        .store_uint(query_id, QUERY_ID_BITS)?;
    b.build()
}

/// Cancel request sent by the buyer or the seller from their own address.
pub fn internal_cancel(query_id: u64) -> Result<Cell, CodecError> {
    op_cell(OpCode::Cancel, query_id)
}

pub fn cancellation(query_id: u64) -> Result<Cell, CodecError> {
    op_cell(OpCode::Cancellation, query_id)
}

pub fn seller_completion(query_id: u64) -> Result<Cell, CodecError> {
    op_cell(OpCode::SellerCompletion, query_id)
}

pub fn fee_gainer_completion(query_id: u64) -> Result<Cell, CodecError> {
    op_cell(OpCode::FeeGainerCompletion, query_id)
}

pub fn external_cancel(
    query_id: u64,
    target: &Address,
    key: &SigningKey,
) -> Result<Cell, CodecError> {
    signed(OpCode::Cancel, query_id, target, key)
}

pub fn external_complete(
    query_id: u64,
    target: &Address,
    key: &SigningKey,
) -> Result<Cell, CodecError> {
    signed(OpCode::Complete, query_id, target, key)
}

/// Guarantor command: `op query_id target` signed over the hash of that
/// prefix, with the signature stored in the first reference.
fn signed(
    op: OpCode,
    query_id: u64,
    target: &Address,
    key: &SigningKey,
) -> Result<Cell, CodecError> {
    let mut b = CellBuilder::new();
    b.store_uint(op as u64, OP_BITS)?
        .store_uint(query_id, QUERY_ID_BITS)?
        .store_address(target)?;
    let prefix = b.clone().build()?;
    let signature = key.sign(&prefix.hash());

    let mut sig = CellBuilder::new();
    sig.store_bytes(&signature.to_bytes())?;
    b.store_ref(sig.build()?)?;
    b.build()
}

/// Body of an internal message from a party address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalCommand {
    pub op: u32,
    pub query_id: u64,
}

impl InternalCommand {
    pub fn parse(body: &Cell) -> Result<Self, CodecError> {
        let mut s = body.parse();
        let op = s.load_uint(OP_BITS)? as u32;
        let query_id = s.load_uint(QUERY_ID_BITS)?;
        Ok(InternalCommand { op, query_id })
    }
}

/// Body of an external message from the guarantor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCommand {
    pub op: u32,
    pub query_id: u64,
    pub target: Address,
    signature: Option<[u8; SIGNATURE_LEN]>,
    signed_hash: [u8; 32],
}

impl SignedCommand {
    /// Reads the prefix; a missing or short signature is kept as absent and
    /// only fails at [`SignedCommand::verify`].
    pub fn parse(body: &Cell) -> Result<Self, CodecError> {
        let mut s = body.parse();
        let op = s.load_uint(OP_BITS)? as u32;
        let query_id = s.load_uint(QUERY_ID_BITS)?;
        let target = s.load_address()?;
        let signature = s
            .load_ref()
            .ok()
            .and_then(|cell| cell.parse().load_array::<SIGNATURE_LEN>().ok());
        Ok(SignedCommand {
            op,
            query_id,
            target,
            signature,
            signed_hash: body.without_refs().hash(),
        })
    }

    pub fn signed_hash(&self) -> [u8; 32] {
        self.signed_hash
    }

    pub fn verify(&self, key: &PublicKey) -> Result<(), ContractError> {
        let signature = self.signature.ok_or(ContractError::InvalidSignature {})?;
        let key = VerifyingKey::from_bytes(&key.0).map_err(|_| ContractError::InvalidSignature {})?;
        key.verify(&self.signed_hash, &Signature::from_bytes(&signature))
            .map_err(|_| ContractError::InvalidSignature {})
    }
}

/// Registry setup. Amounts are decimal coins, addresses are in raw form.
#[cw_serde]
pub struct InstantiateMsg {
    pub guarantor_public_key: HexBinary,
    pub fee_gainer_address: String,
    pub fee: String,
    pub deal_ttl: Option<u64>,
    pub min_deal_amount: Option<String>,
}

#[cw_serde]
pub enum ExecuteMsg {
    CreateDeal {
        buyer: String,
        seller: String,
        coins_amount: String,
    },
}

#[cw_serde]
pub enum QueryMsg {
    Config {},
    Deal { deal_id: u64 },
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn target() -> Address {
        Address::new(0, [9; 32])
    }

    #[test]
    fn unsigned_layout() {
        let cell = internal_cancel(123).unwrap();
        assert_eq!(cell.bit_len(), OP_BITS + QUERY_ID_BITS);
        assert_eq!(cell.ref_count(), 0);
        assert_eq!(
            InternalCommand::parse(&cell).unwrap(),
            InternalCommand {
                op: OpCode::Cancel as u32,
                query_id: 123
            }
        );
    }

    #[test]
    fn notifications_carry_op_and_query_id() {
        let cases = [
            (cancellation(7).unwrap(), OpCode::Cancellation),
            (seller_completion(7).unwrap(), OpCode::SellerCompletion),
            (fee_gainer_completion(7).unwrap(), OpCode::FeeGainerCompletion),
        ];
        for (cell, op) in cases {
            let cmd = InternalCommand::parse(&cell).unwrap();
            assert_eq!(OpCode::from_u32(cmd.op), Some(op));
            assert_eq!(cmd.query_id, 7);
        }
    }

    #[test]
    fn signed_command_verifies_with_guarantor_key() {
        let guarantor = key(1);
        let cell = external_complete(5, &target(), &guarantor).unwrap();
        assert_eq!(cell.ref_count(), 1);
        assert_eq!(cell.reference(0).unwrap().bit_len(), SIGNATURE_LEN * 8);

        let cmd = SignedCommand::parse(&cell).unwrap();
        assert_eq!(cmd.op, OpCode::Complete as u32);
        assert_eq!(cmd.query_id, 5);
        assert_eq!(cmd.target, target());
        cmd.verify(&PublicKey::from(&guarantor.verifying_key()))
            .unwrap();
    }

    #[test]
    fn generated_keys_sign_and_verify() {
        let guarantor = SigningKey::generate(&mut rand::rngs::OsRng);
        let cell = external_cancel(u64::MAX, &target(), &guarantor).unwrap();
        let cmd = SignedCommand::parse(&cell).unwrap();
        assert_eq!(cmd.query_id, u64::MAX);
        assert_eq!(
            cmd.verify(&PublicKey::from(&guarantor.verifying_key())),
            Ok(())
        );
    }

    #[test]
    fn foreign_key_is_rejected() {
        let cell = external_cancel(0, &target(), &key(2)).unwrap();
        let cmd = SignedCommand::parse(&cell).unwrap();
        assert_eq!(
            cmd.verify(&PublicKey::from(&key(1).verifying_key())),
            Err(ContractError::InvalidSignature {})
        );
    }

    #[test]
    fn signature_bit_flip_is_rejected() {
        let guarantor = key(1);
        let public = PublicKey::from(&guarantor.verifying_key());
        let cell = external_cancel(0, &target(), &guarantor).unwrap();
        let prefix = cell.without_refs();
        let sig = cell.reference(0).unwrap().data().to_vec();

        for bit in [0, 100, 511] {
            let mut flipped = sig.clone();
            flipped[bit / 8] ^= 0x80 >> (bit % 8);
            let sig_cell = Cell::new(flipped, SIGNATURE_LEN * 8, Vec::new()).unwrap();
            let tampered = Cell::new(
                prefix.data().to_vec(),
                prefix.bit_len(),
                vec![Arc::new(sig_cell)],
            )
            .unwrap();
            let cmd = SignedCommand::parse(&tampered).unwrap();
            assert_eq!(cmd.verify(&public), Err(ContractError::InvalidSignature {}));
        }
    }

    #[test]
    fn missing_signature_is_invalid_not_malformed() {
        let guarantor = key(1);
        let cell = external_cancel(0, &target(), &guarantor).unwrap();
        let cmd = SignedCommand::parse(&cell.without_refs()).unwrap();
        assert_eq!(
            cmd.verify(&PublicKey::from(&guarantor.verifying_key())),
            Err(ContractError::InvalidSignature {})
        );
    }

    #[test]
    fn signed_hash_excludes_signature() {
        let cell = external_cancel(3, &target(), &key(1)).unwrap();
        let other = external_cancel(3, &target(), &key(2)).unwrap();
        let a = SignedCommand::parse(&cell).unwrap();
        let b = SignedCommand::parse(&other).unwrap();
        assert_ne!(cell.hash(), other.hash());
        assert_eq!(a.signed_hash(), b.signed_hash());
    }

    #[test]
    fn unknown_op_codes() {
        assert_eq!(OpCode::from_u32(0), None);
        assert_eq!(OpCode::from_u32(3), None);
        assert_eq!(OpCode::from_u32(0x7255_1da1), Some(OpCode::Cancellation));
    }
}
