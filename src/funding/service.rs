//! Funding Service
//!
//! Entry point for callers that drive deposits and withdraws by id. Every
//! event runs in its own transaction with the entity row held `FOR UPDATE`.
//!
//! # Delivery
//!
//! - `LifecycleEvent`s are emitted only after commit, and only for applied
//!   transitions
//! - Collection and settlement requests are pushed by after hooks, inside the
//!   transaction. If the commit then fails, the request is already queued
//!   while the row keeps its old state, and a retried event queues it again.
//!   Consumers of the dispatch queue must deduplicate (on deposit id, or on
//!   withdraw `tid`) and re-read the row before acting.

use std::sync::Arc;

use futures::FutureExt;
use tracing::info;

use super::deposit::{Deposit, DepositEvent, DepositState, NewDeposit};
use super::error::FundingError;
use super::pg::PgFunding;
use super::ports::{EventEmitter, FundingPorts};
use super::types::LifecycleEvent;
use super::withdraw::{NewWithdraw, Withdraw, WithdrawEvent, WithdrawState};
use crate::config::FundingConfig;
use crate::db::{Database, PgTx};
use crate::fsm::{Outcome, StateMachine, Stateful, Symbol, TransitionOptions};
use crate::transaction::{within, within_entity};

pub struct FundingService {
    db: Arc<Database>,
    store: Arc<PgFunding>,
    ports: FundingPorts,
    emitter: Arc<dyn EventEmitter>,
    config: FundingConfig,
}

impl FundingService {
    pub fn new(
        db: Arc<Database>,
        store: Arc<PgFunding>,
        ports: FundingPorts,
        emitter: Arc<dyn EventEmitter>,
        config: FundingConfig,
    ) -> Self {
        Self {
            db,
            store,
            ports,
            emitter,
            config,
        }
    }

    /// Persist a new deposit in its initial state
    pub async fn create_deposit(&self, new: NewDeposit) -> Result<Deposit, FundingError> {
        let mut deposit = Deposit::new(new)?;
        let ports = self.ports.clone();
        within_entity(
            &*self.db,
            &mut deposit,
            move |deposit: &mut Deposit, tx: &mut PgTx| {
                async move {
                    deposit.save(&ports, Some(tx)).await?;
                    Ok::<_, FundingError>(())
                }
                .boxed()
            },
        )
        .await?;

        info!(deposit_id = ?deposit.id, tid = %deposit.tid, "Deposit created");
        Ok(deposit)
    }

    /// Persist a new withdraw in its initial state
    pub async fn create_withdraw(&self, new: NewWithdraw) -> Result<Withdraw, FundingError> {
        let mut withdraw = Withdraw::new(new)?;
        let ports = self.ports.clone();
        within_entity(
            &*self.db,
            &mut withdraw,
            move |withdraw: &mut Withdraw, tx: &mut PgTx| {
                async move {
                    withdraw.save(&ports, Some(tx)).await?;
                    Ok::<_, FundingError>(())
                }
                .boxed()
            },
        )
        .await?;

        info!(withdraw_id = ?withdraw.id, tid = %withdraw.tid, "Withdraw created");
        Ok(withdraw)
    }

    /// Fire `event` on deposit `id`. Any error, after hooks included, rolls back.
    pub async fn fire_deposit(
        &self,
        id: i64,
        event: DepositEvent,
    ) -> Result<Outcome<DepositState>, FundingError> {
        let store = self.store.clone();
        let ports = self.ports.clone();
        let outcome = within(&*self.db, move |tx: &mut PgTx| {
            async move {
                let mut deposit = store.lock_deposit(tx, id).await?;
                let opts = TransitionOptions::<Deposit>::new(&ports).with_tx(tx);
                let outcome = deposit.transition(event, opts).await?;
                Ok::<_, FundingError>(outcome)
            }
            .boxed()
        })
        .await?;

        self.publish(Deposit::ENTITY, id, event, outcome);
        Ok(outcome)
    }

    /// Fire `event` on withdraw `id`. Any error, after hooks included, rolls back.
    pub async fn fire_withdraw(
        &self,
        id: i64,
        event: WithdrawEvent,
    ) -> Result<Outcome<WithdrawState>, FundingError> {
        let store = self.store.clone();
        let ports = self.ports.clone();
        let outcome = within(&*self.db, move |tx: &mut PgTx| {
            async move {
                let mut withdraw = store.lock_withdraw(tx, id).await?;
                let opts = TransitionOptions::<Withdraw>::new(&ports).with_tx(tx);
                let outcome = withdraw.transition(event, opts).await?;
                Ok::<_, FundingError>(outcome)
            }
            .boxed()
        })
        .await?;

        self.publish(Withdraw::ENTITY, id, event, outcome);
        Ok(outcome)
    }

    /// Withdraws in one of the configured completed states
    pub async fn completed_withdraws(&self, limit: i64) -> Result<Vec<Withdraw>, FundingError> {
        let scope = Withdraw::machine().scope_in(&self.config.completed_withdraw_states);
        self.store.withdraws_in(&scope, limit).await
    }

    fn publish<S: Symbol, V: Symbol>(
        &self,
        entity: &'static str,
        id: i64,
        event: V,
        outcome: Outcome<S>,
    ) {
        if let Outcome::Applied { from, to } = outcome {
            self.emitter.emit(LifecycleEvent {
                entity,
                id,
                event: event.as_str(),
                from: from.as_str(),
                to: to.as_str(),
            });
        }
    }
}
