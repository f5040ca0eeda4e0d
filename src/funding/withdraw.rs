//! Withdraw Lifecycle
//!
//! ```text
//! new   prepared ──submit──► submitted ──accept──► accepted ──process──► processing
//!          │                  │  │                    │                    │  │
//!          │               suspect reject           reject             dispatch fail
//!          ▼                  ▼  ▼                    ▼                    ▼  ▼
//!       canceled        suspected rejected        rejected         confirming failed
//!                                                                       │  │
//!                                                                 success  fail
//!                                                                       ▼  ▼
//!                                                                  succeed failed
//! ```
//!
//! # Fund Custody
//!
//! - `submit` locks `amount`; every exit from a locked state releases it exactly once
//! - `cancel` from `prepared` releases nothing, funds were never locked
//! - `success` debits the lock *before* the state is persisted

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::FundingError;
use super::ports::FundingPorts;
use super::types::Tid;
use crate::db::PgTx;
use crate::fsm::{
    EventDef, Hook, Machine, PersistenceError, Stateful, Symbol, TransitionContext, UnknownSymbol,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawState {
    New,
    Prepared,
    Submitted,
    Rejected,
    Accepted,
    Suspected,
    Processing,
    Succeed,
    Canceled,
    Failed,
    Confirming,
}

impl Symbol for WithdrawState {
    fn as_str(&self) -> &'static str {
        match self {
            WithdrawState::New => "new",
            WithdrawState::Prepared => "prepared",
            WithdrawState::Submitted => "submitted",
            WithdrawState::Rejected => "rejected",
            WithdrawState::Accepted => "accepted",
            WithdrawState::Suspected => "suspected",
            WithdrawState::Processing => "processing",
            WithdrawState::Succeed => "succeed",
            WithdrawState::Canceled => "canceled",
            WithdrawState::Failed => "failed",
            WithdrawState::Confirming => "confirming",
        }
    }
}

impl fmt::Display for WithdrawState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawState {
    type Err = UnknownSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(WithdrawState::New),
            "prepared" => Ok(WithdrawState::Prepared),
            "submitted" => Ok(WithdrawState::Submitted),
            "rejected" => Ok(WithdrawState::Rejected),
            "accepted" => Ok(WithdrawState::Accepted),
            "suspected" => Ok(WithdrawState::Suspected),
            "processing" => Ok(WithdrawState::Processing),
            "succeed" => Ok(WithdrawState::Succeed),
            "canceled" => Ok(WithdrawState::Canceled),
            "failed" => Ok(WithdrawState::Failed),
            "confirming" => Ok(WithdrawState::Confirming),
            _ => Err(UnknownSymbol::new("withdraw state", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawEvent {
    Submit,
    Cancel,
    Suspect,
    Accept,
    Reject,
    Process,
    Dispatch,
    Success,
    Fail,
}

impl Symbol for WithdrawEvent {
    fn as_str(&self) -> &'static str {
        match self {
            WithdrawEvent::Submit => "submit",
            WithdrawEvent::Cancel => "cancel",
            WithdrawEvent::Suspect => "suspect",
            WithdrawEvent::Accept => "accept",
            WithdrawEvent::Reject => "reject",
            WithdrawEvent::Process => "process",
            WithdrawEvent::Dispatch => "dispatch",
            WithdrawEvent::Success => "success",
            WithdrawEvent::Fail => "fail",
        }
    }
}

impl fmt::Display for WithdrawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawEvent {
    type Err = UnknownSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit" => Ok(WithdrawEvent::Submit),
            "cancel" => Ok(WithdrawEvent::Cancel),
            "suspect" => Ok(WithdrawEvent::Suspect),
            "accept" => Ok(WithdrawEvent::Accept),
            "reject" => Ok(WithdrawEvent::Reject),
            "process" => Ok(WithdrawEvent::Process),
            "dispatch" => Ok(WithdrawEvent::Dispatch),
            "success" => Ok(WithdrawEvent::Success),
            "fail" => Ok(WithdrawEvent::Fail),
            _ => Err(UnknownSymbol::new("withdraw event", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawHook {
    LockFunds,
    UnlockFunds,
    SendCoins,
    UnlockAndSubFunds,
}

/// `cancel` releases the lock unless the withdraw never got past `prepared`
fn unlock_unless_prepared<'a>(
    withdraw: &'a mut Withdraw,
    ctx: &'a mut TransitionContext<'_, Withdraw>,
) -> BoxFuture<'a, anyhow::Result<()>> {
    Box::pin(async move {
        if ctx.from == WithdrawState::Prepared {
            return Ok(());
        }
        withdraw.unlock_funds(ctx).await
    })
}

static MACHINE: Lazy<Machine<Withdraw>> = Lazy::new(|| {
    use WithdrawEvent as Ev;
    use WithdrawState::*;

    Machine::builder("aasm_state")
        .strict(false)
        .initial(New)
        .state(Prepared)
        .state(Submitted)
        .state(Rejected)
        .state(Accepted)
        .state(Suspected)
        .state(Processing)
        .state(Succeed)
        .state(Canceled)
        .state(Failed)
        .state(Confirming)
        .event(
            EventDef::new(Ev::Submit, [Prepared], Submitted)
                .after(Hook::Method(WithdrawHook::LockFunds)),
        )
        .event(
            EventDef::new(Ev::Cancel, [Prepared, Submitted, Accepted], Canceled)
                .after(Hook::Call(unlock_unless_prepared)),
        )
        .event(
            EventDef::new(Ev::Suspect, [Submitted], Suspected)
                .after(Hook::Method(WithdrawHook::UnlockFunds)),
        )
        .event(EventDef::new(Ev::Accept, [Submitted], Accepted))
        .event(
            EventDef::new(Ev::Reject, [Submitted, Accepted], Rejected)
                .after(Hook::Method(WithdrawHook::UnlockFunds)),
        )
        .event(
            EventDef::new(Ev::Process, [Accepted], Processing)
                .after(Hook::Method(WithdrawHook::SendCoins)),
        )
        // txid and block_number are expected to be set by the caller
        .event(EventDef::new(Ev::Dispatch, [Processing], Confirming))
        .event(
            EventDef::new(Ev::Success, [Confirming], Succeed)
                .before(Hook::Method(WithdrawHook::UnlockAndSubFunds)),
        )
        .event(
            EventDef::new(Ev::Fail, [Processing, Confirming], Failed)
                .after(Hook::Method(WithdrawHook::UnlockFunds)),
        )
        .build()
        .expect("withdraw state machine definition is valid")
});

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWithdraw {
    pub account_id: i64,
    pub member_id: i64,
    pub currency_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub rid: String,
    pub to_address: String,
    pub kind: String,
    pub tid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Withdraw {
    pub id: Option<i64>,
    pub account_id: i64,
    pub member_id: i64,
    pub currency_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub sum: Decimal,
    pub txid: Option<String>,
    pub aasm_state: Option<WithdrawState>,
    pub block_number: Option<i64>,
    /// `type` column
    pub kind: String,
    pub tid: Tid,
    /// Destination reference
    pub rid: String,
    pub to_address: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Withdraw {
    /// Build an unsaved withdraw. `sum` is the amount plus fee.
    pub fn new(new: NewWithdraw) -> Result<Self, FundingError> {
        if new.amount <= Decimal::ZERO || new.fee < Decimal::ZERO {
            return Err(FundingError::InvalidAmount);
        }

        Ok(Self {
            id: None,
            account_id: new.account_id,
            member_id: new.member_id,
            currency_id: new.currency_id,
            amount: new.amount,
            fee: new.fee,
            sum: new.amount + new.fee,
            txid: None,
            aasm_state: None,
            block_number: None,
            kind: new.kind,
            tid: Tid::or_generate(new.tid)?,
            rid: new.rid,
            to_address: new.to_address,
            completed_at: None,
            created_at: None,
            updated_at: None,
        })
    }

    /// Read-only classification against the configured completed set
    pub fn is_completed(&self, completed: &[WithdrawState]) -> bool {
        self.aasm_state.is_some_and(|s| completed.contains(&s))
    }

    async fn lock_funds(&self, ctx: &mut TransitionContext<'_, Self>) -> anyhow::Result<()> {
        let ports = ctx.env;
        ports
            .accounts
            .lock_funds(self.account_id, self.amount, ctx.tx())
            .await?;
        Ok(())
    }

    async fn unlock_funds(&self, ctx: &mut TransitionContext<'_, Self>) -> anyhow::Result<()> {
        let ports = ctx.env;
        ports
            .accounts
            .unlock_funds(self.account_id, self.amount, ctx.tx())
            .await?;
        Ok(())
    }

    async fn unlock_and_sub_funds(
        &self,
        ctx: &mut TransitionContext<'_, Self>,
    ) -> anyhow::Result<()> {
        let ports = ctx.env;
        ports
            .accounts
            .unlock_and_sub_funds(self.account_id, self.amount, ctx.tx())
            .await?;
        Ok(())
    }

    async fn send_coins(&self, ctx: &mut TransitionContext<'_, Self>) -> anyhow::Result<()> {
        ctx.env.settlement.send_coins(self).await?;
        debug!(withdraw_id = ?self.id, rid = %self.rid, "Withdraw handed to settlement");
        Ok(())
    }
}

#[async_trait]
impl Stateful for Withdraw {
    type State = WithdrawState;
    type Event = WithdrawEvent;
    type Hook = WithdrawHook;
    type Env = FundingPorts;
    type Tx = PgTx;

    const ENTITY: &'static str = "Withdraw";

    fn machine() -> &'static Machine<Self> {
        &MACHINE
    }

    fn state(&self) -> Option<WithdrawState> {
        self.aasm_state
    }

    fn set_state(&mut self, state: WithdrawState) {
        self.aasm_state = Some(state);
    }

    async fn persist(
        &mut self,
        env: &FundingPorts,
        tx: Option<&mut PgTx>,
    ) -> Result<(), PersistenceError> {
        env.withdraws.save(self, tx).await
    }

    async fn call_hook(
        &mut self,
        hook: WithdrawHook,
        ctx: &mut TransitionContext<'_, Self>,
    ) -> anyhow::Result<()> {
        match hook {
            WithdrawHook::LockFunds => self.lock_funds(ctx).await,
            WithdrawHook::UnlockFunds => self.unlock_funds(ctx).await,
            WithdrawHook::SendCoins => self.send_coins(ctx).await,
            WithdrawHook::UnlockAndSubFunds => self.unlock_and_sub_funds(ctx).await,
        }
    }
}
