//! funding_fsm - Declarative State Machines for Funding Entities
//!
//! A transition engine for persisted entities plus the deposit and withdraw
//! workflows built on it.
//!
//! # Modules
//!
//! - [`fsm`] - Machine definitions, guarded transitions, scopes
//! - [`transaction`] - Scoped transactions (commit on success, rollback on error)
//! - [`funding`] - Deposit and withdraw lifecycles, collaborators, Postgres adapter
//! - [`db`] - PostgreSQL connection pool
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod fsm;
pub mod funding;
pub mod logging;
pub mod transaction;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError, DatabaseConfig, FundingConfig};
pub use db::{Database, PgTx};
pub use fsm::{
    FsmError, Hook, Machine, Outcome, PersistenceError, StateMachine, Stateful, Symbol,
    TransitionContext, TransitionOptions,
};
pub use funding::{
    Deposit, DepositEvent, DepositState, FundingError, FundingPorts, FundingService, Withdraw,
    WithdrawEvent, WithdrawState,
};
pub use logging::init_logging;
pub use transaction::{TransactionSource, within, within_entity};
