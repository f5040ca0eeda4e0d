//! Collaborator Ports
//!
//! Everything the funding workflows consume from the outside world. Fund
//! operations receive the caller's transaction so they commit or roll back
//! together with the state change.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::deposit::Deposit;
use super::error::FundingError;
use super::types::{Account, Currency, LifecycleEvent};
use super::withdraw::Withdraw;
use crate::db::PgTx;
use crate::fsm::PersistenceError;

/// Single-statement persistence for one entity type
#[async_trait]
pub trait EntityStore<E>: Send + Sync {
    /// Insert when the entity has no id yet (assigning it), update otherwise
    async fn save(&self, entity: &mut E, tx: Option<&mut PgTx>) -> Result<(), PersistenceError>;
}

/// Balance mutations. Each call must be transactional on its own.
#[async_trait]
pub trait AccountLedger: Send + Sync {
    /// Credit `balance`
    async fn plus_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError>;

    /// Move `amount` from `balance` into `locked`
    async fn lock_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError>;

    /// Move `amount` from `locked` back into `balance`
    async fn unlock_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError>;

    /// Release the reservation and debit it for good
    async fn unlock_and_sub_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError>;
}

#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Resolve (creating if needed) the member's account in `currency_id`
    async fn get_account(
        &self,
        member_id: i64,
        currency_id: &str,
        tx: Option<&mut PgTx>,
    ) -> Result<Account, FundingError>;
}

#[async_trait]
pub trait CurrencyDirectory: Send + Sync {
    async fn get_currency(&self, currency_id: &str) -> Result<Currency, FundingError>;
}

/// Best-effort request to sweep deposited coins
#[async_trait]
pub trait Collector: Send + Sync {
    async fn enqueue_deposit_collection(
        &self,
        currency: &Currency,
        deposit_id: i64,
    ) -> Result<(), FundingError>;
}

#[async_trait]
pub trait Settlement: Send + Sync {
    async fn send_coins(&self, withdraw: &Withdraw) -> Result<(), FundingError>;
}

/// Fire-and-forget notification. Must not block.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Collaborators handed to deposit and withdraw hooks
#[derive(Clone)]
pub struct FundingPorts {
    pub deposits: Arc<dyn EntityStore<Deposit>>,
    pub withdraws: Arc<dyn EntityStore<Withdraw>>,
    pub accounts: Arc<dyn AccountLedger>,
    pub members: Arc<dyn MemberDirectory>,
    pub currencies: Arc<dyn CurrencyDirectory>,
    pub collector: Arc<dyn Collector>,
    pub settlement: Arc<dyn Settlement>,
}
