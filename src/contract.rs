use cosmwasm_schema::cw_serde;
use cosmwasm_std::{
    to_json_binary, Binary, CosmosMsg, CustomMsg, Deps, DepsMut, Env, MessageInfo, Response,
    StdResult, Uint256,
};
use cw2::set_contract_version;

use crate::address::Address;
use crate::cell::Cell;
use crate::codec::{decode_cell, to_stack};
use crate::error::ContractError;
use crate::msg::{
    cancellation, fee_gainer_completion, seller_completion, InternalCommand, OpCode,
    SignedCommand,
};
use crate::stack::StackEntry;
use crate::state::{DealRecord, DealState, DEAL};

const CONTRACT_NAME: &str = "crates.io:deal-escrow";
const CONTRACT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Denomination of the native coin attached to internal messages.
pub const NATIVE_DENOM: &str = "nanoton";

/// Transfer fees are paid separately from the payout value.
pub const PAYOUT_MODE: u8 = 1;

/// Outbound transfer emitted by a transition. `body` is the notification cell as a bag of cells.
#[cw_serde]
pub struct Payout {
    pub to: Address,
    pub amount: Uint256,
    pub mode: u8,
    pub body: Binary,
}

impl CustomMsg for Payout {}

impl Payout {
    fn new(to: Address, amount: Uint256, body: &Cell) -> CosmosMsg<Payout> {
        CosmosMsg::Custom(Payout {
            to,
            amount,
            mode: PAYOUT_MODE,
            body: Binary::from(body.to_boc()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub now: u64,
    pub contract_address: Address,
}

impl Context {
    pub fn from_env(env: &Env) -> Result<Self, ContractError> {
        Ok(Context {
            now: env.block.time.seconds(),
            contract_address: env.contract.address.as_str().parse()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Inbound<'a> {
    /// Message from an account, carrying coins.
    Internal {
        sender: Address,
        value: Uint256,
        body: &'a Cell,
    },
    /// Message from outside the chain; only the guarantor's signature authorizes it.
    External { body: &'a Cell },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub record: DealRecord,
    pub response: Response<Payout>,
}

/// Applies one inbound message to a deal. Rejections leave `record` untouched.
pub fn apply(
    record: &DealRecord,
    ctx: &Context,
    inbound: Inbound<'_>,
) -> Result<Transition, ContractError> {
    match inbound {
        Inbound::Internal {
            sender,
            value,
            body,
        } => try_internal(record, ctx, sender, value, body),
        Inbound::External { body } => try_external(record, ctx, body),
    }
}

fn try_internal(
    record: &DealRecord,
    ctx: &Context,
    sender: Address,
    value: Uint256,
    body: &Cell,
) -> Result<Transition, ContractError> {
    // any transfer to an uninitialized deal is a funding attempt
    if record.state == DealState::Uninitialized {
        return try_fund(record, value);
    }
    if record.state != DealState::Active {
        return Err(ContractError::NotActive {});
    }

    let cmd = InternalCommand::parse(body).map_err(|_| ContractError::InvalidOp {})?;
    if cmd.op != OpCode::Cancel as u32 {
        return Err(ContractError::InvalidOp {});
    }

    if sender == record.seller_address {
        try_cancel(record, cmd.query_id, "seller")
    } else if sender == record.buyer_address {
        if ctx.now < record.expires_at {
            return Err(ContractError::NotExpired {});
        }
        try_cancel(record, cmd.query_id, "buyer")
    } else {
        Err(ContractError::UnknownSender {})
    }
}

fn try_external(
    record: &DealRecord,
    ctx: &Context,
    body: &Cell,
) -> Result<Transition, ContractError> {
    if record.state != DealState::Active {
        return Err(ContractError::NotActive {});
    }

    let cmd = SignedCommand::parse(body).map_err(|_| ContractError::InvalidOp {})?;
    if cmd.target != ctx.contract_address {
        return Err(ContractError::WrongTarget {});
    }
    cmd.verify(&record.guarantor_public_key)?;

    match OpCode::from_u32(cmd.op) {
        Some(OpCode::Complete) => try_complete(record, cmd.query_id),
        Some(OpCode::Cancel) => try_cancel(record, cmd.query_id, "guarantor"),
        _ => Err(ContractError::InvalidOp {}),
    }
}

fn try_fund(record: &DealRecord, value: Uint256) -> Result<Transition, ContractError> {
    if value < record.funding_threshold()? {
        return Err(ContractError::NotEnoughCoins {});
    }

    let mut next = record.clone();
    next.state = DealState::Active;

    Ok(Transition {
        record: next,
        response: Response::new()
            .add_attribute("action", "fund")
            .add_attribute("deal_id", record.deal_id.to_string())
            .add_attribute("amount", value.to_string()),
    })
}

/// Refunds everything the buyer committed.
fn try_cancel(
    record: &DealRecord,
    query_id: u64,
    cancelled_by: &str,
) -> Result<Transition, ContractError> {
    let refund = record.committed()?;

    let mut next = record.clone();
    next.state = DealState::Cancelled;

    Ok(Transition {
        record: next,
        response: Response::new()
            .add_attribute("action", "cancel")
            .add_attribute("deal_id", record.deal_id.to_string())
            .add_attribute("cancelled_by", cancelled_by)
            .add_attribute("refund", refund.to_string())
            .add_message(Payout::new(
                record.buyer_address,
                refund,
                &cancellation(query_id)?,
            )),
    })
}

fn try_complete(record: &DealRecord, query_id: u64) -> Result<Transition, ContractError> {
    let mut next = record.clone();
    next.state = DealState::Completed;

    let mut response = Response::new()
        .add_attribute("action", "complete")
        .add_attribute("deal_id", record.deal_id.to_string())
        .add_attribute("coins_amount", record.coins_amount.to_string())
        .add_attribute("fee_amount", record.fee_amount.to_string())
        .add_message(Payout::new(
            record.seller_address,
            record.coins_amount,
            &seller_completion(query_id)?,
        ));
    if !record.fee_amount.is_zero() {
        response = response.add_message(Payout::new(
            record.fee_gainer_address,
            record.fee_amount,
            &fee_gainer_completion(query_id)?,
        ));
    }

    Ok(Transition {
        record: next,
        response,
    })
}

/// Deploys a deal from its initial data cell.
pub fn instantiate(
    deps: DepsMut,
    _env: Env,
    data: &Cell,
) -> Result<Response<Payout>, ContractError> {
    set_contract_version(deps.storage, CONTRACT_NAME, CONTRACT_VERSION)?;

    let record = decode_cell(data)?;
    DEAL.save(deps.storage, &record)?;

    Ok(Response::new()
        .add_attribute("action", "instantiate")
        .add_attribute("deal_id", record.deal_id.to_string())
        .add_attribute("state", format!("{:?}", record.state)))
}

pub fn execute_internal(
    deps: DepsMut,
    env: Env,
    info: MessageInfo,
    body: &Cell,
) -> Result<Response<Payout>, ContractError> {
    let ctx = Context::from_env(&env)?;
    let sender: Address = info.sender.as_str().parse()?;
    let value = info
        .funds
        .iter()
        .filter(|coin| coin.denom == NATIVE_DENOM)
        .try_fold(Uint256::zero(), |acc, coin| acc.checked_add(coin.amount.into()))?;

    let record = DEAL.load(deps.storage)?;
    let transition = apply(
        &record,
        &ctx,
        Inbound::Internal {
            sender,
            value,
            body,
        },
    )?;
    DEAL.save(deps.storage, &transition.record)?;

    Ok(transition.response)
}

pub fn execute_external(
    deps: DepsMut,
    env: Env,
    body: &Cell,
) -> Result<Response<Payout>, ContractError> {
    let ctx = Context::from_env(&env)?;
    let record = DEAL.load(deps.storage)?;
    let transition = apply(&record, &ctx, Inbound::External { body })?;
    DEAL.save(deps.storage, &transition.record)?;

    Ok(transition.response)
}

/// Get-method view of the stored deal.
pub fn get_deal_state(deps: Deps) -> Result<Vec<StackEntry>, ContractError> {
    let record = DEAL.load(deps.storage)?;
    Ok(to_stack(&record)?)
}

pub fn query_deal(deps: Deps) -> StdResult<Binary> {
    to_json_binary(&DEAL.load(deps.storage)?)
}
