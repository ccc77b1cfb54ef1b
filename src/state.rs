use cosmwasm_schema::cw_serde;
use cosmwasm_std::{OverflowError, Uint256};
use cw_storage_plus::{Item, Map};

use crate::address::{Address, PublicKey};
use crate::amount::funding_reserve;
use crate::error::CodecError;

#[cw_serde]
#[derive(Copy, Eq)]
pub enum DealState {
    Uninitialized,
    Active,
    Completed,
    Cancelled,
}

impl DealState {
    pub const BITS: usize = 2;

    pub fn as_u64(self) -> u64 {
        match self {
            DealState::Uninitialized => 0,
            DealState::Active => 1,
            DealState::Completed => 2,
            DealState::Cancelled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DealState::Completed | DealState::Cancelled)
    }
}

impl TryFrom<u64> for DealState {
    type Error = CodecError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DealState::Uninitialized),
            1 => Ok(DealState::Active),
            2 => Ok(DealState::Completed),
            3 => Ok(DealState::Cancelled),
            _ => Err(CodecError::ValueOutOfRange {
                bits: DealState::BITS,
            }),
        }
    }
}

/// Escrow state as held by a deployed deal.
///
/// Everything except `state` is fixed when the record is created.
#[cw_serde]
pub struct DealRecord {
    pub deal_id: u64,
    pub state: DealState,
    pub buyer_address: Address,
    pub seller_address: Address,
    pub expires_at: u64,
    pub guarantor_public_key: PublicKey,
    pub fee_gainer_address: Address,
    pub fee_amount: Uint256,
    pub coins_amount: Uint256,
}

impl DealRecord {
    /// Sum the buyer commits: fee plus coins. Refunds pay back exactly this.
    pub fn committed(&self) -> Result<Uint256, OverflowError> {
        self.fee_amount.checked_add(self.coins_amount)
    }

    /// Smallest funding transfer that activates the deal.
    pub fn funding_threshold(&self) -> Result<Uint256, OverflowError> {
        self.committed()?.checked_add(funding_reserve())
    }
}

/// Deployment parameters shared by every deal of one guarantor.
#[cw_serde]
pub struct CommonDealPart {
    pub guarantor_public_key: PublicKey,
    pub fee_gainer_address: Address,
}

/// A deal known off-chain, before its record is observed on the ledger.
#[cw_serde]
pub struct PendingDeal {
    pub deal_id: u64,
    pub buyer_address: Address,
    pub seller_address: Address,
    pub expires_at: u64,
    pub fee_amount: Uint256,
    pub coins_amount: Uint256,
}

impl PendingDeal {
    /// Initial data the deal is deployed with.
    pub fn to_record(&self, common: &CommonDealPart) -> DealRecord {
        DealRecord {
            deal_id: self.deal_id,
            state: DealState::Uninitialized,
            buyer_address: self.buyer_address,
            seller_address: self.seller_address,
            expires_at: self.expires_at,
            guarantor_public_key: common.guarantor_public_key,
            fee_gainer_address: common.fee_gainer_address,
            fee_amount: self.fee_amount,
            coins_amount: self.coins_amount,
        }
    }
}

#[cw_serde]
pub struct Config {
    pub common: CommonDealPart,
    pub fee_amount: Uint256,
    pub deal_ttl: u64,
    pub min_deal_amount: Uint256,
}

// record of a single deployed deal
pub const DEAL: Item<DealRecord> = Item::new("deal");

pub const CONFIG: Item<Config> = Item::new("config");

// increments on every deal creation
pub const LATEST_DEAL_ID: Item<u64> = Item::new("latest_deal_id");

// maps deal_id => pending deal
pub const PENDING_DEALS: Map<u64, PendingDeal> = Map::new("pending_deals");
