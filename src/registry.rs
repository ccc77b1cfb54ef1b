//! Off-chain record of the deals a guarantor has issued.
//!
//! Assigns deal ids from a monotonic counter and keeps each deal's parameters
//! until it is deployed. Storage sits behind one lock, so concurrent callers
//! never observe or assign the same id.

use std::sync::{Mutex, MutexGuard};

use cosmwasm_std::{to_json_binary, Binary, MemoryStorage, Response, StdError, Uint256};
use cw2::set_contract_version;
use ed25519_dalek::VerifyingKey;
use tracing::info;

use crate::address::{Address, PublicKey};
use crate::amount::{format_coins, parse_coins};
use crate::error::RegistryError;
use crate::msg::{ExecuteMsg, InstantiateMsg, QueryMsg};
use crate::state::{
    CommonDealPart, Config, DealRecord, PendingDeal, CONFIG, LATEST_DEAL_ID, PENDING_DEALS,
};

const CONTRACT_NAME: &str = "crates.io:deal-escrow-registry";
const CONTRACT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 72 hours.
pub const DEFAULT_DEAL_TTL: u64 = 72 * 60 * 60;
pub const DEFAULT_MIN_DEAL_AMOUNT: &str = "0.01";

pub struct DealRegistry {
    storage: Mutex<MemoryStorage>,
}

impl DealRegistry {
    pub fn instantiate(msg: InstantiateMsg) -> Result<Self, RegistryError> {
        if msg.deal_ttl == Some(0) {
            return Err(RegistryError::TtlCannotBeZero {});
        }

        let key: [u8; 32] = msg
            .guarantor_public_key
            .as_slice()
            .try_into()
            .map_err(|_| RegistryError::InvalidPublicKey {})?;
        VerifyingKey::from_bytes(&key).map_err(|_| RegistryError::InvalidPublicKey {})?;

        let config = Config {
            common: CommonDealPart {
                guarantor_public_key: PublicKey(key),
                fee_gainer_address: msg.fee_gainer_address.parse()?,
            },
            fee_amount: parse_coins(&msg.fee)?,
            deal_ttl: msg.deal_ttl.unwrap_or(DEFAULT_DEAL_TTL),
            min_deal_amount: parse_coins(
                msg.min_deal_amount
                    .as_deref()
                    .unwrap_or(DEFAULT_MIN_DEAL_AMOUNT),
            )?,
        };

        let mut storage = MemoryStorage::new();
        set_contract_version(&mut storage, CONTRACT_NAME, CONTRACT_VERSION)?;
        CONFIG.save(&mut storage, &config)?;
        LATEST_DEAL_ID.save(&mut storage, &0)?;

        info!(
            fee_gainer = %config.common.fee_gainer_address,
            fee = %format_coins(config.fee_amount),
            deal_ttl = config.deal_ttl,
            "deal registry ready"
        );

        Ok(DealRegistry {
            storage: Mutex::new(storage),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorage>, RegistryError> {
        self.storage
            .lock()
            .map_err(|_| StdError::generic_err("registry storage lock poisoned").into())
    }

    pub fn config(&self) -> Result<Config, RegistryError> {
        Ok(CONFIG.load(&*self.lock()?)?)
    }

    pub fn common(&self) -> Result<CommonDealPart, RegistryError> {
        Ok(self.config()?.common)
    }

    pub fn create_deal(
        &self,
        now: u64,
        buyer: Address,
        seller: Address,
        coins_amount: Uint256,
    ) -> Result<PendingDeal, RegistryError> {
        if buyer == seller {
            return Err(RegistryError::SameParties {});
        }

        let mut storage = self.lock()?;
        let config = CONFIG.load(&*storage)?;
        if coins_amount < config.min_deal_amount {
            return Err(RegistryError::AmountTooSmall {
                min: format_coins(config.min_deal_amount),
            });
        }

        let deal_id = LATEST_DEAL_ID.load(&*storage)? + 1;
        let expires_at = now
            .checked_add(config.deal_ttl)
            .ok_or_else(|| StdError::generic_err("deal expiry overflows"))?;
        let deal = PendingDeal {
            deal_id,
            buyer_address: buyer,
            seller_address: seller,
            expires_at,
            fee_amount: config.fee_amount,
            coins_amount,
        };
        PENDING_DEALS.save(&mut *storage, deal_id, &deal)?;
        LATEST_DEAL_ID.save(&mut *storage, &deal_id)?;

        info!(
            deal_id,
            %buyer,
            %seller,
            coins = %format_coins(coins_amount),
            expires_at,
            "deal created"
        );
        Ok(deal)
    }

    pub fn pending_deal(&self, deal_id: u64) -> Result<PendingDeal, RegistryError> {
        PENDING_DEALS
            .may_load(&*self.lock()?, deal_id)?
            .ok_or(RegistryError::DealNotFound {})
    }

    /// Initial data the deal is deployed with.
    pub fn deal_record(&self, deal_id: u64) -> Result<DealRecord, RegistryError> {
        let deal = self.pending_deal(deal_id)?;
        Ok(deal.to_record(&self.common()?))
    }

    pub fn execute(&self, now: u64, msg: ExecuteMsg) -> Result<Response, RegistryError> {
        match msg {
            ExecuteMsg::CreateDeal {
                buyer,
                seller,
                coins_amount,
            } => self.try_create_deal(now, buyer, seller, coins_amount),
        }
    }

    fn try_create_deal(
        &self,
        now: u64,
        buyer: String,
        seller: String,
        coins_amount: String,
    ) -> Result<Response, RegistryError> {
        let deal = self.create_deal(
            now,
            buyer.parse()?,
            seller.parse()?,
            parse_coins(&coins_amount)?,
        )?;

        Ok(Response::new()
            .add_attribute("action", "create_deal")
            .add_attribute("deal_id", deal.deal_id.to_string())
            .add_attribute("buyer", deal.buyer_address.to_string())
            .add_attribute("seller", deal.seller_address.to_string())
            .add_attribute("coins_amount", deal.coins_amount.to_string())
            .add_attribute("fee_amount", deal.fee_amount.to_string())
            .add_attribute("expires_at", deal.expires_at.to_string()))
    }

    pub fn query(&self, msg: QueryMsg) -> Result<Binary, RegistryError> {
        match msg {
            QueryMsg::Config {} => Ok(to_json_binary(&self.config()?)?),
            QueryMsg::Deal { deal_id } => Ok(to_json_binary(&self.pending_deal(deal_id)?)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cosmwasm_std::{attr, from_json, HexBinary};
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::state::DealState;

    const NOW: u64 = 1_700_000_000;

    fn guarantor() -> PublicKey {
        PublicKey::from(&SigningKey::from_bytes(&[7; 32]).verifying_key())
    }

    fn buyer() -> Address {
        Address::new(0, [1; 32])
    }

    fn seller() -> Address {
        Address::new(0, [2; 32])
    }

    fn instantiate_msg() -> InstantiateMsg {
        InstantiateMsg {
            guarantor_public_key: HexBinary::from(guarantor().0.to_vec()),
            fee_gainer_address: Address::new(-1, [3; 32]).to_string(),
            fee: "0.1".to_string(),
            deal_ttl: None,
            min_deal_amount: None,
        }
    }

    #[test]
    fn instantiate_applies_defaults() {
        let registry = DealRegistry::instantiate(instantiate_msg()).unwrap();
        let config = registry.config().unwrap();
        assert_eq!(config.deal_ttl, DEFAULT_DEAL_TTL);
        assert_eq!(config.min_deal_amount, Uint256::from(10_000_000u128));
        assert_eq!(config.fee_amount, Uint256::from(100_000_000u128));
        assert_eq!(config.common.guarantor_public_key, guarantor());
    }

    #[test]
    fn instantiate_rejects_bad_config() {
        let mut msg = instantiate_msg();
        msg.deal_ttl = Some(0);
        assert_eq!(
            DealRegistry::instantiate(msg).err(),
            Some(RegistryError::TtlCannotBeZero {})
        );

        let mut msg = instantiate_msg();
        msg.guarantor_public_key = HexBinary::from(vec![1u8; 31]);
        assert_eq!(
            DealRegistry::instantiate(msg).err(),
            Some(RegistryError::InvalidPublicKey {})
        );

        let mut msg = instantiate_msg();
        msg.fee_gainer_address = "EQ-friendly".to_string();
        assert!(matches!(
            DealRegistry::instantiate(msg),
            Err(RegistryError::Codec(_))
        ));

        let mut msg = instantiate_msg();
        msg.fee = "-1".to_string();
        assert!(matches!(
            DealRegistry::instantiate(msg),
            Err(RegistryError::Codec(_))
        ));
    }

    #[test]
    fn deal_ids_start_at_one() {
        let registry = DealRegistry::instantiate(instantiate_msg()).unwrap();
        let coins = Uint256::from(1_000_000_000u128);

        let first = registry.create_deal(NOW, buyer(), seller(), coins).unwrap();
        let second = registry.create_deal(NOW, seller(), buyer(), coins).unwrap();
        assert_eq!(first.deal_id, 1);
        assert_eq!(second.deal_id, 2);
        assert_eq!(first.expires_at, NOW + DEFAULT_DEAL_TTL);
        assert_eq!(first.fee_amount, Uint256::from(100_000_000u128));
        assert_eq!(registry.pending_deal(2).unwrap(), second);
    }

    #[test]
    fn create_deal_validates_parties_and_amount() {
        let registry = DealRegistry::instantiate(instantiate_msg()).unwrap();
        assert_eq!(
            registry.create_deal(NOW, buyer(), buyer(), Uint256::from(1_000_000_000u128)),
            Err(RegistryError::SameParties {})
        );
        assert_eq!(
            registry.create_deal(NOW, buyer(), seller(), Uint256::from(9_999_999u128)),
            Err(RegistryError::AmountTooSmall {
                min: "0.01".to_string()
            })
        );
        // rejected deals do not consume ids
        let deal = registry
            .create_deal(NOW, buyer(), seller(), Uint256::from(10_000_000u128))
            .unwrap();
        assert_eq!(deal.deal_id, 1);
    }

    #[test]
    fn concurrent_creation_assigns_unique_ids() {
        let registry = Arc::new(DealRegistry::instantiate(instantiate_msg()).unwrap());
        let coins = Uint256::from(1_000_000_000u128);

        let mut ids: Vec<u64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || {
                        (0..25)
                            .map(|_| {
                                registry
                                    .create_deal(NOW, buyer(), seller(), coins)
                                    .unwrap()
                                    .deal_id
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        ids.sort_unstable();
        assert_eq!(ids, (1..=200).collect::<Vec<u64>>());
    }

    #[test]
    fn deal_record_is_uninitialized() {
        let registry = DealRegistry::instantiate(instantiate_msg()).unwrap();
        let deal = registry
            .create_deal(NOW, buyer(), seller(), Uint256::from(1_000_000_000u128))
            .unwrap();
        let record = registry.deal_record(deal.deal_id).unwrap();
        assert_eq!(record.state, DealState::Uninitialized);
        assert_eq!(record.guarantor_public_key, guarantor());
        assert_eq!(record.fee_gainer_address, Address::new(-1, [3; 32]));
        assert_eq!(
            registry.deal_record(99),
            Err(RegistryError::DealNotFound {})
        );
    }

    #[test]
    fn execute_and_query() {
        let registry = DealRegistry::instantiate(instantiate_msg()).unwrap();
        let res = registry
            .execute(
                NOW,
                ExecuteMsg::CreateDeal {
                    buyer: buyer().to_string(),
                    seller: seller().to_string(),
                    coins_amount: "2.5".to_string(),
                },
            )
            .unwrap();
        assert_eq!(
            res.attributes,
            vec![
                attr("action", "create_deal"),
                attr("deal_id", "1"),
                attr("buyer", buyer().to_string()),
                attr("seller", seller().to_string()),
                attr("coins_amount", "2500000000"),
                attr("fee_amount", "100000000"),
                attr("expires_at", (NOW + DEFAULT_DEAL_TTL).to_string()),
            ]
        );

        let deal: PendingDeal =
            from_json(registry.query(QueryMsg::Deal { deal_id: 1 }).unwrap()).unwrap();
        assert_eq!(deal.coins_amount, Uint256::from(2_500_000_000u128));

        let config: Config = from_json(registry.query(QueryMsg::Config {}).unwrap()).unwrap();
        assert_eq!(config, registry.config().unwrap());

        assert_eq!(
            registry.query(QueryMsg::Deal { deal_id: 2 }),
            Err(RegistryError::DealNotFound {})
        );
    }
}
