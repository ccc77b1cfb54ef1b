//! Off-chain view of deployed deals and the guarantor's apply calls.

use std::future::Future;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use serde_json::Value;
use tracing::{debug, warn};

use crate::address::{contract_address, Address};
use crate::cell::Cell;
use crate::codec::{decode, encode};
use crate::error::ClientError;
use crate::msg::{external_cancel, external_complete};
use crate::stack::StackEntry;
use crate::state::{CommonDealPart, DealRecord, PendingDeal};

pub const GET_DEAL_STATE: &str = "get_deal_state";

/// Result of a read-only get-method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMethodOutput {
    pub exit_code: i32,
    pub stack: Vec<StackEntry>,
}

impl GetMethodOutput {
    /// Reads `{"exit_code": .., "stack": [..]}` as returned by ledger HTTP APIs.
    /// The stack is only parsed on success.
    pub fn from_json(value: &Value) -> Result<Self, ClientError> {
        let exit_code = value
            .get("exit_code")
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .ok_or_else(|| ClientError::Transport(format!("no exit code in {value}")))?;
        let stack = if exit_code == 0 {
            StackEntry::parse_json_stack(value.get("stack").unwrap_or(&Value::Null))?
        } else {
            Vec::new()
        };
        Ok(GetMethodOutput { exit_code, stack })
    }
}

#[async_trait::async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn run_get_method(
        &self,
        address: &Address,
        method: &str,
    ) -> Result<GetMethodOutput, ClientError>;

    /// Submits an external message and returns the exit code of its processing.
    async fn send_external(&self, address: &Address, body: &Cell) -> Result<i32, ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub workchain: i8,
    pub timeout: Duration,
    /// Get-method exit codes that mean the account does not exist yet.
    pub absent_exit_codes: Vec<i32>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            workchain: 0,
            timeout: Duration::from_secs(10),
            absent_exit_codes: vec![-13],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DealSnapshot {
    NotDeployed { address: Address },
    Deployed { address: Address, record: DealRecord },
}

impl DealSnapshot {
    pub fn address(&self) -> Address {
        match self {
            DealSnapshot::NotDeployed { address } | DealSnapshot::Deployed { address, .. } => {
                *address
            }
        }
    }

    pub fn record(&self) -> Option<&DealRecord> {
        match self {
            DealSnapshot::Deployed { record, .. } => Some(record),
            DealSnapshot::NotDeployed { .. } => None,
        }
    }
}

#[derive(Debug)]
pub struct DealClient<R: LedgerRpc> {
    rpc: R,
    code: Cell,
    common: CommonDealPart,
    settings: ClientSettings,
}

impl<R: LedgerRpc> DealClient<R> {
    pub fn new(rpc: R, code: Cell, common: CommonDealPart) -> Self {
        Self {
            rpc,
            code,
            common,
            settings: ClientSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub fn initial_data(&self, deal: &PendingDeal) -> Result<Cell, ClientError> {
        Ok(encode(&deal.to_record(&self.common))?)
    }

    pub fn deal_address(&self, deal: &PendingDeal) -> Result<Address, ClientError> {
        let data = self.initial_data(deal)?;
        Ok(contract_address(self.settings.workchain, &self.code, &data)?)
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let timeout = self.settings.timeout;
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ClientError::Timeout { operation, timeout })?
    }

    pub async fn snapshot(&self, deal: &PendingDeal) -> Result<DealSnapshot, ClientError> {
        let address = self.deal_address(deal)?;
        let output = self
            .bounded(GET_DEAL_STATE, self.rpc.run_get_method(&address, GET_DEAL_STATE))
            .await?;

        if output.exit_code != 0 {
            if self.settings.absent_exit_codes.contains(&output.exit_code) {
                debug!(deal_id = deal.deal_id, %address, "deal not deployed");
                return Ok(DealSnapshot::NotDeployed { address });
            }
            warn!(
                deal_id = deal.deal_id,
                %address,
                exit_code = output.exit_code,
                "get method failed"
            );
            return Err(ClientError::GetMethodFailed {
                method: GET_DEAL_STATE,
                exit_code: output.exit_code,
            });
        }

        let record = decode(output.stack.as_slice())?;
        if record.deal_id != deal.deal_id {
            warn!(expected = deal.deal_id, found = record.deal_id, %address, "deal id mismatch");
        }
        Ok(DealSnapshot::Deployed { address, record })
    }

    pub async fn complete(
        &self,
        deal: &PendingDeal,
        query_id: u64,
        guarantor: &SigningKey,
    ) -> Result<(), ClientError> {
        let address = self.deal_address(deal)?;
        let body = external_complete(query_id, &address, guarantor)?;
        self.submit("complete", deal, &address, &body).await
    }

    pub async fn cancel(
        &self,
        deal: &PendingDeal,
        query_id: u64,
        guarantor: &SigningKey,
    ) -> Result<(), ClientError> {
        let address = self.deal_address(deal)?;
        let body = external_cancel(query_id, &address, guarantor)?;
        self.submit("cancel", deal, &address, &body).await
    }

    async fn submit(
        &self,
        operation: &'static str,
        deal: &PendingDeal,
        address: &Address,
        body: &Cell,
    ) -> Result<(), ClientError> {
        let exit_code = self
            .bounded(operation, self.rpc.send_external(address, body))
            .await?;
        if exit_code != 0 {
            warn!(deal_id = deal.deal_id, %address, exit_code, operation, "apply call rejected");
            return Err(ClientError::Rejected { exit_code });
        }
        debug!(deal_id = deal.deal_id, %address, operation, "apply call accepted");
        Ok(())
    }
}
