use rust_decimal::Decimal;
use thiserror::Error;

use crate::fsm::{FsmError, PersistenceError};

#[derive(Error, Debug)]
pub enum FundingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Account not found for member {member_id} in {currency_id}")]
    AccountNotFound { member_id: i64, currency_id: String },

    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    #[error("Insufficient funds on account {account_id}: need {amount}")]
    InsufficientFunds { account_id: i64, amount: Decimal },

    #[error("Insufficient locked funds on account {account_id}: need {amount}")]
    InsufficientLocked { account_id: i64, amount: Decimal },

    #[error("Invalid amount: must be positive")]
    InvalidAmount,

    #[error("Invalid tid: {0}")]
    InvalidTid(String),

    #[error("Dispatch queue closed: {0}")]
    DispatchClosed(&'static str),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Transition(#[from] FsmError),
}

impl FundingError {
    pub fn code(&self) -> &'static str {
        match self {
            FundingError::Database(_) => "DATABASE_ERROR",
            FundingError::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            FundingError::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            FundingError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            FundingError::InsufficientLocked { .. } => "INSUFFICIENT_LOCKED",
            FundingError::InvalidAmount => "INVALID_AMOUNT",
            FundingError::InvalidTid(_) => "INVALID_TID",
            FundingError::DispatchClosed(_) => "DISPATCH_CLOSED",
            FundingError::Persistence(_) => "PERSISTENCE_ERROR",
            FundingError::Transition(e) => e.code(),
        }
    }
}
