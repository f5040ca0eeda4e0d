//! Funding Workflows
//!
//! Deposit intake and withdrawal settlement, each driven by its own state
//! machine. Balance changes happen in hooks on the caller's transaction so
//! they commit or roll back together with the state.

pub mod deposit;
pub mod dispatch;
pub mod error;
pub mod pg;
pub mod ports;
pub mod service;
pub mod types;
pub mod withdraw;

#[cfg(test)]
pub(crate) mod mock;


pub use deposit::{Deposit, DepositEvent, DepositHook, DepositState, NewDeposit};
pub use dispatch::{ChannelEmitter, DispatchQueue, DispatchRequest};
pub use error::FundingError;
pub use pg::PgFunding;
pub use ports::{
    AccountLedger, Collector, CurrencyDirectory, EntityStore, EventEmitter, FundingPorts,
    MemberDirectory, Settlement,
};
pub use service::FundingService;
pub use types::{Account, Currency, CurrencyKind, LifecycleEvent, TID_MAX_LEN, Tid};
pub use withdraw::{NewWithdraw, Withdraw, WithdrawEvent, WithdrawHook, WithdrawState};
