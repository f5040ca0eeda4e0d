//! Deposit Lifecycle
//!
//! ```text
//! submitted ──accept──► accepted   (after: plus_funds, collect)
//!     ├─────cancel────► canceled
//!     └─────reject────► rejected
//! new ──────submit────► canceled
//! ```

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::FundingError;
use super::ports::FundingPorts;
use super::types::{Account, Tid};
use crate::db::PgTx;
use crate::fsm::{
    EventDef, Hook, Machine, PersistenceError, Stateful, Symbol, TransitionContext, UnknownSymbol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositState {
    Submitted,
    New,
    Canceled,
    Rejected,
    Accepted,
}

impl Symbol for DepositState {
    fn as_str(&self) -> &'static str {
        match self {
            DepositState::Submitted => "submitted",
            DepositState::New => "new",
            DepositState::Canceled => "canceled",
            DepositState::Rejected => "rejected",
            DepositState::Accepted => "accepted",
        }
    }
}

impl fmt::Display for DepositState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositState {
    type Err = UnknownSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(DepositState::Submitted),
            "new" => Ok(DepositState::New),
            "canceled" => Ok(DepositState::Canceled),
            "rejected" => Ok(DepositState::Rejected),
            "accepted" => Ok(DepositState::Accepted),
            _ => Err(UnknownSymbol::new("deposit state", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositEvent {
    Submit,
    Cancel,
    Reject,
    Accept,
}

impl Symbol for DepositEvent {
    fn as_str(&self) -> &'static str {
        match self {
            DepositEvent::Submit => "submit",
            DepositEvent::Cancel => "cancel",
            DepositEvent::Reject => "reject",
            DepositEvent::Accept => "accept",
        }
    }
}

impl fmt::Display for DepositEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositEvent {
    type Err = UnknownSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit" => Ok(DepositEvent::Submit),
            "cancel" => Ok(DepositEvent::Cancel),
            "reject" => Ok(DepositEvent::Reject),
            "accept" => Ok(DepositEvent::Accept),
            _ => Err(UnknownSymbol::new("deposit event", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositHook {
    PlusFunds,
    Collect,
}

static MACHINE: Lazy<Machine<Deposit>> = Lazy::new(|| {
    use DepositState::*;

    Machine::builder("aasm_state")
        .strict(false)
        .initial(Submitted)
        .state(New)
        .state(Canceled)
        .state(Rejected)
        .state(Accepted)
        // new -> canceled is the historical definition of `submit`
        .event(EventDef::new(DepositEvent::Submit, [New], Canceled))
        .event(EventDef::new(DepositEvent::Cancel, [Submitted], Canceled))
        .event(EventDef::new(DepositEvent::Reject, [Submitted], Rejected))
        .event(
            EventDef::new(DepositEvent::Accept, [Submitted], Accepted)
                .after(Hook::Method(DepositHook::PlusFunds))
                .after(Hook::Method(DepositHook::Collect)),
        )
        .build()
        .expect("deposit state machine definition is valid")
});

/// Incoming deposit as reported by a scanner or an operator
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDeposit {
    pub member_id: i64,
    pub currency_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub address: Option<String>,
    pub txid: Option<String>,
    pub txout: Option<i32>,
    pub block_number: Option<i64>,
    pub kind: String,
    pub tid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deposit {
    pub id: Option<i64>,
    pub member_id: i64,
    pub currency_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub address: Option<String>,
    pub txid: Option<String>,
    pub txout: Option<i32>,
    pub aasm_state: Option<DepositState>,
    pub block_number: Option<i64>,
    /// `type` column
    pub kind: String,
    pub tid: Tid,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Deposit {
    /// Build an unsaved deposit; the state is assigned on first save
    pub fn new(new: NewDeposit) -> Result<Self, FundingError> {
        if new.amount <= Decimal::ZERO || new.fee < Decimal::ZERO {
            return Err(FundingError::InvalidAmount);
        }

        Ok(Self {
            id: None,
            member_id: new.member_id,
            currency_id: new.currency_id,
            amount: new.amount,
            fee: new.fee,
            address: new.address,
            txid: new.txid,
            txout: new.txout,
            aasm_state: None,
            block_number: new.block_number,
            kind: new.kind,
            tid: Tid::or_generate(new.tid)?,
            completed_at: None,
            created_at: None,
            updated_at: None,
        })
    }

    /// Account credited by this deposit
    pub async fn account(
        &self,
        ports: &FundingPorts,
        tx: Option<&mut PgTx>,
    ) -> Result<Account, FundingError> {
        ports
            .members
            .get_account(self.member_id, &self.currency_id, tx)
            .await
    }

    async fn plus_funds(&self, ctx: &mut TransitionContext<'_, Self>) -> anyhow::Result<()> {
        let ports = ctx.env;
        let account = self.account(ports, ctx.tx()).await?;
        ports
            .accounts
            .plus_funds(account.id, self.amount, ctx.tx())
            .await?;
        debug!(
            deposit_id = ?self.id,
            account_id = account.id,
            amount = %self.amount,
            "Deposit credited"
        );
        Ok(())
    }

    async fn collect(&self, ctx: &mut TransitionContext<'_, Self>) -> anyhow::Result<()> {
        let ports = ctx.env;
        let currency = ports.currencies.get_currency(&self.currency_id).await?;
        if !currency.is_coin() {
            return Ok(());
        }
        let Some(id) = self.id else {
            return Ok(());
        };
        // Collection is best effort: the deposit stays accepted either way
        if let Err(e) = ports.collector.enqueue_deposit_collection(&currency, id).await {
            warn!(deposit_id = id, currency = %currency.id, error = %e, "Collection enqueue failed");
        }
        Ok(())
    }
}

#[async_trait]
impl Stateful for Deposit {
    type State = DepositState;
    type Event = DepositEvent;
    type Hook = DepositHook;
    type Env = FundingPorts;
    type Tx = PgTx;

    const ENTITY: &'static str = "Deposit";

    fn machine() -> &'static Machine<Self> {
        &MACHINE
    }

    fn state(&self) -> Option<DepositState> {
        self.aasm_state
    }

    fn set_state(&mut self, state: DepositState) {
        self.aasm_state = Some(state);
    }

    async fn persist(
        &mut self,
        env: &FundingPorts,
        tx: Option<&mut PgTx>,
    ) -> Result<(), PersistenceError> {
        env.deposits.save(self, tx).await
    }

    async fn call_hook(
        &mut self,
        hook: DepositHook,
        ctx: &mut TransitionContext<'_, Self>,
    ) -> anyhow::Result<()> {
        match hook {
            DepositHook::PlusFunds => self.plus_funds(ctx).await,
            DepositHook::Collect => self.collect(ctx).await,
        }
    }
}
