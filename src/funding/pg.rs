//! PostgreSQL adapter
//!
//! Stores deposits and withdraws, and implements the account ledger, member
//! and currency directories on the `accounts` / `currencies` tables. Every
//! operation runs on the caller's transaction when one is given.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::deposit::{Deposit, DepositState};
use super::error::FundingError;
use super::ports::{AccountLedger, CurrencyDirectory, EntityStore, MemberDirectory};
use super::types::{Account, Currency, CurrencyKind, Tid};
use super::withdraw::{Withdraw, WithdrawState};
use crate::db::PgTx;
use crate::fsm::{PersistenceError, StateScope, Symbol};

const DEPOSIT_COLUMNS: &str = "id, member_id, currency_id, amount, fee, address, txid, txout, \
     aasm_state, block_number, type, tid, completed_at, created_at, updated_at";

const WITHDRAW_COLUMNS: &str = "id, account_id, member_id, currency_id, amount, fee, sum, txid, \
     aasm_state, block_number, type, tid, rid, to_address, completed_at, created_at, updated_at";

pub struct PgFunding {
    pool: PgPool,
}

impl PgFunding {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn execute(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        tx: Option<&mut PgTx>,
    ) -> Result<PgQueryResult, sqlx::Error> {
        match tx {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        }
    }

    async fn fetch_optional(
        &self,
        query: Query<'_, Postgres, PgArguments>,
        tx: Option<&mut PgTx>,
    ) -> Result<Option<PgRow>, sqlx::Error> {
        match tx {
            Some(tx) => query.fetch_optional(&mut **tx).await,
            None => query.fetch_optional(&self.pool).await,
        }
    }

    /// Load a deposit with `SELECT ... FOR UPDATE`
    pub async fn lock_deposit(&self, tx: &mut PgTx, id: i64) -> Result<Deposit, PersistenceError> {
        let sql = format!("SELECT {} FROM deposits WHERE id = $1 FOR UPDATE", DEPOSIT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(PersistenceError::NotFound {
                entity: "Deposit",
                id,
            })?;
        Ok(deposit_from_row(&row)?)
    }

    /// Load a withdraw with `SELECT ... FOR UPDATE`
    pub async fn lock_withdraw(
        &self,
        tx: &mut PgTx,
        id: i64,
    ) -> Result<Withdraw, PersistenceError> {
        let sql = format!("SELECT {} FROM withdraws WHERE id = $1 FOR UPDATE", WITHDRAW_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(PersistenceError::NotFound {
                entity: "Withdraw",
                id,
            })?;
        Ok(withdraw_from_row(&row)?)
    }

    /// Withdraws matching a state scope, oldest first
    pub async fn withdraws_in(
        &self,
        scope: &StateScope,
        limit: i64,
    ) -> Result<Vec<Withdraw>, FundingError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM withdraws WHERE ",
            WITHDRAW_COLUMNS
        ));
        scope.push_filter(&mut qb);
        qb.push(" ORDER BY id LIMIT ").push_bind(limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let withdraws = rows
            .iter()
            .map(withdraw_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(withdraws)
    }

    async fn update_account(
        &self,
        sql: &'static str,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<bool, FundingError> {
        if amount <= Decimal::ZERO {
            return Err(FundingError::InvalidAmount);
        }
        let result = self
            .execute(sqlx::query(sql).bind(amount).bind(account_id), tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn decode_state<S: std::str::FromStr<Err = crate::fsm::UnknownSymbol>>(
    row: &PgRow,
) -> Result<S, sqlx::Error> {
    let raw: String = row.try_get("aasm_state")?;
    raw.parse::<S>().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn decode_tid(row: &PgRow) -> Result<Tid, sqlx::Error> {
    let raw: String = row.try_get("tid")?;
    raw.parse::<Tid>().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn deposit_from_row(row: &PgRow) -> Result<Deposit, sqlx::Error> {
    Ok(Deposit {
        id: Some(row.try_get("id")?),
        member_id: row.try_get("member_id")?,
        currency_id: row.try_get("currency_id")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        address: row.try_get("address")?,
        txid: row.try_get("txid")?,
        txout: row.try_get("txout")?,
        aasm_state: Some(decode_state::<DepositState>(row)?),
        block_number: row.try_get("block_number")?,
        kind: row.try_get("type")?,
        tid: decode_tid(row)?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn withdraw_from_row(row: &PgRow) -> Result<Withdraw, sqlx::Error> {
    Ok(Withdraw {
        id: Some(row.try_get("id")?),
        account_id: row.try_get("account_id")?,
        member_id: row.try_get("member_id")?,
        currency_id: row.try_get("currency_id")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        sum: row.try_get("sum")?,
        txid: row.try_get("txid")?,
        aasm_state: Some(decode_state::<WithdrawState>(row)?),
        block_number: row.try_get("block_number")?,
        kind: row.try_get("type")?,
        tid: decode_tid(row)?,
        rid: row.try_get("rid")?,
        to_address: row.try_get("to_address")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl EntityStore<Deposit> for PgFunding {
    async fn save(
        &self,
        deposit: &mut Deposit,
        tx: Option<&mut PgTx>,
    ) -> Result<(), PersistenceError> {
        let state = deposit.aasm_state.map(|s| s.as_str());
        match deposit.id {
            None => {
                let query = sqlx::query(
                    r#"
                    INSERT INTO deposits
                        (member_id, currency_id, amount, fee, address, txid, txout, aasm_state,
                         block_number, type, tid, completed_at, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW(), NOW())
                    RETURNING id, created_at, updated_at
                    "#,
                )
                .bind(deposit.member_id)
                .bind(&deposit.currency_id)
                .bind(deposit.amount)
                .bind(deposit.fee)
                .bind(&deposit.address)
                .bind(&deposit.txid)
                .bind(deposit.txout)
                .bind(state)
                .bind(deposit.block_number)
                .bind(&deposit.kind)
                .bind(deposit.tid.as_str())
                .bind(deposit.completed_at);
                let row = self
                    .fetch_optional(query, tx)
                    .await?
                    .ok_or(PersistenceError::Rejected("deposit insert returned no row".into()))?;
                deposit.id = Some(row.try_get("id")?);
                deposit.created_at = row.try_get("created_at")?;
                deposit.updated_at = row.try_get("updated_at")?;
            }
            Some(id) => {
                let query = sqlx::query(
                    r#"
                    UPDATE deposits
                    SET amount = $1, fee = $2, address = $3, txid = $4, txout = $5,
                        aasm_state = $6, block_number = $7, tid = $8, completed_at = $9,
                        updated_at = NOW()
                    WHERE id = $10
                    "#,
                )
                .bind(deposit.amount)
                .bind(deposit.fee)
                .bind(&deposit.address)
                .bind(&deposit.txid)
                .bind(deposit.txout)
                .bind(state)
                .bind(deposit.block_number)
                .bind(deposit.tid.as_str())
                .bind(deposit.completed_at)
                .bind(id);
                let result = self.execute(query, tx).await?;
                if result.rows_affected() == 0 {
                    return Err(PersistenceError::NotFound {
                        entity: "Deposit",
                        id,
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore<Withdraw> for PgFunding {
    async fn save(
        &self,
        withdraw: &mut Withdraw,
        tx: Option<&mut PgTx>,
    ) -> Result<(), PersistenceError> {
        let state = withdraw.aasm_state.map(|s| s.as_str());
        match withdraw.id {
            None => {
                let query = sqlx::query(
                    r#"
                    INSERT INTO withdraws
                        (account_id, member_id, currency_id, amount, fee, sum, txid, aasm_state,
                         block_number, type, tid, rid, to_address, completed_at, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW())
                    RETURNING id, created_at, updated_at
                    "#,
                )
                .bind(withdraw.account_id)
                .bind(withdraw.member_id)
                .bind(&withdraw.currency_id)
                .bind(withdraw.amount)
                .bind(withdraw.fee)
                .bind(withdraw.sum)
                .bind(&withdraw.txid)
                .bind(state)
                .bind(withdraw.block_number)
                .bind(&withdraw.kind)
                .bind(withdraw.tid.as_str())
                .bind(&withdraw.rid)
                .bind(&withdraw.to_address)
                .bind(withdraw.completed_at);
                let row = self
                    .fetch_optional(query, tx)
                    .await?
                    .ok_or(PersistenceError::Rejected("withdraw insert returned no row".into()))?;
                withdraw.id = Some(row.try_get("id")?);
                withdraw.created_at = row.try_get("created_at")?;
                withdraw.updated_at = row.try_get("updated_at")?;
            }
            Some(id) => {
                let query = sqlx::query(
                    r#"
                    UPDATE withdraws
                    SET amount = $1, fee = $2, sum = $3, txid = $4, aasm_state = $5,
                        block_number = $6, tid = $7, rid = $8, to_address = $9,
                        completed_at = $10, updated_at = NOW()
                    WHERE id = $11
                    "#,
                )
                .bind(withdraw.amount)
                .bind(withdraw.fee)
                .bind(withdraw.sum)
                .bind(&withdraw.txid)
                .bind(state)
                .bind(withdraw.block_number)
                .bind(withdraw.tid.as_str())
                .bind(&withdraw.rid)
                .bind(&withdraw.to_address)
                .bind(withdraw.completed_at)
                .bind(id);
                let result = self.execute(query, tx).await?;
                if result.rows_affected() == 0 {
                    return Err(PersistenceError::NotFound {
                        entity: "Withdraw",
                        id,
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AccountLedger for PgFunding {
    async fn plus_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError> {
        let sql = "UPDATE accounts SET balance = balance + $1, updated_at = NOW() WHERE id = $2";
        if !self.update_account(sql, account_id, amount, tx).await? {
            return Err(FundingError::Persistence(PersistenceError::NotFound {
                entity: "Account",
                id: account_id,
            }));
        }
        Ok(())
    }

    async fn lock_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError> {
        let sql = "UPDATE accounts SET balance = balance - $1, locked = locked + $1, \
                   updated_at = NOW() WHERE id = $2 AND balance >= $1";
        if !self.update_account(sql, account_id, amount, tx).await? {
            return Err(FundingError::InsufficientFunds { account_id, amount });
        }
        Ok(())
    }

    async fn unlock_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError> {
        let sql = "UPDATE accounts SET balance = balance + $1, locked = locked - $1, \
                   updated_at = NOW() WHERE id = $2 AND locked >= $1";
        if !self.update_account(sql, account_id, amount, tx).await? {
            return Err(FundingError::InsufficientLocked { account_id, amount });
        }
        Ok(())
    }

    async fn unlock_and_sub_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError> {
        let sql = "UPDATE accounts SET locked = locked - $1, updated_at = NOW() \
                   WHERE id = $2 AND locked >= $1";
        if !self.update_account(sql, account_id, amount, tx).await? {
            return Err(FundingError::InsufficientLocked { account_id, amount });
        }
        Ok(())
    }
}

#[async_trait]
impl MemberDirectory for PgFunding {
    async fn get_account(
        &self,
        member_id: i64,
        currency_id: &str,
        mut tx: Option<&mut PgTx>,
    ) -> Result<Account, FundingError> {
        self.execute(
            sqlx::query(
                "INSERT INTO accounts (member_id, currency_id, balance, locked, created_at, updated_at) \
                 VALUES ($1, $2, 0, 0, NOW(), NOW()) ON CONFLICT (member_id, currency_id) DO NOTHING",
            )
            .bind(member_id)
            .bind(currency_id),
            tx.as_deref_mut(),
        )
        .await?;

        // Re-fetch to return what is stored (another writer may have won the insert)
        let row = self
            .fetch_optional(
                sqlx::query(
                    "SELECT id, member_id, currency_id, balance, locked FROM accounts \
                     WHERE member_id = $1 AND currency_id = $2",
                )
                .bind(member_id)
                .bind(currency_id),
                tx,
            )
            .await?
            .ok_or_else(|| FundingError::AccountNotFound {
                member_id,
                currency_id: currency_id.to_string(),
            })?;

        Ok(Account {
            id: row.try_get("id")?,
            member_id: row.try_get("member_id")?,
            currency_id: row.try_get("currency_id")?,
            balance: row.try_get("balance")?,
            locked: row.try_get("locked")?,
        })
    }
}

#[async_trait]
impl CurrencyDirectory for PgFunding {
    async fn get_currency(&self, currency_id: &str) -> Result<Currency, FundingError> {
        let row = sqlx::query("SELECT id, type FROM currencies WHERE id = $1")
            .bind(currency_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FundingError::CurrencyNotFound(currency_id.to_string()))?;

        let kind: String = row.try_get("type")?;
        let kind = kind
            .parse::<CurrencyKind>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(Currency {
            id: row.try_get("id")?,
            kind,
        })
    }
}
