pub mod address;
pub mod amount;
pub mod boc;
pub mod cell;
pub mod client;
pub mod codec;
pub mod contract;
pub mod error;
pub mod msg;
pub mod registry;
pub mod stack;
pub mod state;

pub use crate::address::{contract_address, Address, PublicKey};
pub use crate::cell::{Cell, CellBuilder, CellSlice};
pub use crate::error::{ClientError, CodecError, ContractError, RegistryError};
pub use crate::state::{DealRecord, DealState, PendingDeal};
