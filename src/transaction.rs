//! Transaction Scope
//!
//! Runs an operation inside a freshly acquired transaction: commit on `Ok`,
//! rollback on `Err`. Every failure, including begin and commit, reaches the
//! caller; callers that want to ignore one must do so explicitly.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::error;

use crate::fsm::PersistenceError;

/// Something that hands out transactions
#[async_trait]
pub trait TransactionSource: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, PersistenceError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), PersistenceError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), PersistenceError>;
}

/// Run `op` with a new transaction.
///
/// A rollback failure is logged and the operation's own error is returned.
pub async fn within<S, R, E, F>(source: &S, op: F) -> Result<R, E>
where
    S: TransactionSource + ?Sized,
    E: From<PersistenceError> + std::fmt::Display,
    F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<R, E>>,
{
    let mut tx = source.begin().await?;
    let result = op(&mut tx).await;
    finish(source, tx, result).await
}

/// Run `op` bound to `entity`, with the transaction appended.
pub async fn within_entity<S, T, R, E, F>(source: &S, entity: &mut T, op: F) -> Result<R, E>
where
    S: TransactionSource + ?Sized,
    T: ?Sized,
    E: From<PersistenceError> + std::fmt::Display,
    F: for<'a> FnOnce(&'a mut T, &'a mut S::Tx) -> BoxFuture<'a, Result<R, E>>,
{
    let mut tx = source.begin().await?;
    let result = op(entity, &mut tx).await;
    finish(source, tx, result).await
}

async fn finish<S, R, E>(source: &S, tx: S::Tx, result: Result<R, E>) -> Result<R, E>
where
    S: TransactionSource + ?Sized,
    E: From<PersistenceError> + std::fmt::Display,
{
    match result {
        Ok(value) => {
            source.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = source.rollback(tx).await {
                error!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "Rollback failed after operation error"
                );
            }
            Err(err)
        }
    }
}
