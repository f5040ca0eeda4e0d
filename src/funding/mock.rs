//! In-memory collaborators for exercising the workflows without a database

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::deposit::Deposit;
use super::error::FundingError;
use super::ports::{
    AccountLedger, Collector, CurrencyDirectory, EntityStore, FundingPorts, MemberDirectory,
    Settlement,
};
use super::types::{Account, Currency, CurrencyKind};
use super::withdraw::Withdraw;
use crate::db::PgTx;
use crate::fsm::{PersistenceError, Symbol};

pub struct MockFunding {
    /// Every side effect in call order, e.g. `lock_funds 1 2` or `save Withdraw submitted`
    journal: Mutex<Vec<String>>,
    accounts: Mutex<HashMap<i64, Account>>,
    currencies: Mutex<HashMap<String, CurrencyKind>>,
    collections: Mutex<Vec<(String, i64)>>,
    sent: Mutex<Vec<String>>,
    next_id: AtomicI64,
    plus_count: AtomicUsize,
    lock_count: AtomicUsize,
    unlock_count: AtomicUsize,
    unlock_and_sub_count: AtomicUsize,
    save_count: AtomicUsize,
    /// Configured behavior
    fail_save: AtomicBool,
    fail_plus_funds: AtomicBool,
    fail_collector: AtomicBool,
    fail_settlement: AtomicBool,
}

impl MockFunding {
    pub fn new() -> Arc<Self> {
        let mut currencies = HashMap::new();
        currencies.insert("btc".to_string(), CurrencyKind::Coin);
        currencies.insert("usd".to_string(), CurrencyKind::Fiat);
        Arc::new(Self {
            journal: Mutex::new(Vec::new()),
            accounts: Mutex::new(HashMap::new()),
            currencies: Mutex::new(currencies),
            collections: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            plus_count: AtomicUsize::new(0),
            lock_count: AtomicUsize::new(0),
            unlock_count: AtomicUsize::new(0),
            unlock_and_sub_count: AtomicUsize::new(0),
            save_count: AtomicUsize::new(0),
            fail_save: AtomicBool::new(false),
            fail_plus_funds: AtomicBool::new(false),
            fail_collector: AtomicBool::new(false),
            fail_settlement: AtomicBool::new(false),
        })
    }

    pub fn ports(self: &Arc<Self>) -> FundingPorts {
        FundingPorts {
            deposits: self.clone(),
            withdraws: self.clone(),
            accounts: self.clone(),
            members: self.clone(),
            currencies: self.clone(),
            collector: self.clone(),
            settlement: self.clone(),
        }
    }

    /// Seed an account and return its id
    pub fn open_account(&self, member_id: i64, currency_id: &str, balance: Decimal) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.accounts.lock().unwrap().insert(
            id,
            Account {
                id,
                member_id,
                currency_id: currency_id.to_string(),
                balance,
                locked: Decimal::ZERO,
            },
        );
        id
    }

    pub fn account(&self, account_id: i64) -> Account {
        self.accounts.lock().unwrap()[&account_id].clone()
    }

    pub fn find_account(&self, member_id: i64, currency_id: &str) -> Option<Account> {
        self.accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.member_id == member_id && a.currency_id == currency_id)
            .cloned()
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn collections(&self) -> Vec<(String, i64)> {
        self.collections.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn plus_count(&self) -> usize {
        self.plus_count.load(Ordering::SeqCst)
    }

    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::SeqCst)
    }

    pub fn unlock_count(&self) -> usize {
        self.unlock_count.load(Ordering::SeqCst)
    }

    pub fn unlock_and_sub_count(&self) -> usize {
        self.unlock_and_sub_count.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_plus_funds(&self, fail: bool) {
        self.fail_plus_funds.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_collector(&self, fail: bool) {
        self.fail_collector.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_settlement(&self, fail: bool) {
        self.fail_settlement.store(fail, Ordering::SeqCst);
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    fn store(
        &self,
        entity: &'static str,
        id: &mut Option<i64>,
        state: Option<&'static str>,
    ) -> Result<(), PersistenceError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(PersistenceError::Rejected("mock save failure".to_string()));
        }
        if id.is_none() {
            *id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        self.save_count.fetch_add(1, Ordering::SeqCst);
        self.record(format!("save {} {}", entity, state.unwrap_or("-")));
        Ok(())
    }

    fn mutate(
        &self,
        account_id: i64,
        f: impl FnOnce(&mut Account) -> Result<(), FundingError>,
    ) -> Result<(), FundingError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get_mut(&account_id)
            .ok_or(FundingError::Persistence(PersistenceError::NotFound {
                entity: "Account",
                id: account_id,
            }))?;
        f(account)
    }
}

#[async_trait]
impl EntityStore<Deposit> for MockFunding {
    async fn save(
        &self,
        deposit: &mut Deposit,
        _tx: Option<&mut PgTx>,
    ) -> Result<(), PersistenceError> {
        let state = deposit.aasm_state.map(|s| s.as_str());
        self.store("Deposit", &mut deposit.id, state)
    }
}

#[async_trait]
impl EntityStore<Withdraw> for MockFunding {
    async fn save(
        &self,
        withdraw: &mut Withdraw,
        _tx: Option<&mut PgTx>,
    ) -> Result<(), PersistenceError> {
        let state = withdraw.aasm_state.map(|s| s.as_str());
        self.store("Withdraw", &mut withdraw.id, state)
    }
}

#[async_trait]
impl AccountLedger for MockFunding {
    async fn plus_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        _tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError> {
        self.plus_count.fetch_add(1, Ordering::SeqCst);
        self.record(format!("plus_funds {} {}", account_id, amount));
        if self.fail_plus_funds.load(Ordering::SeqCst) {
            return Err(FundingError::Persistence(PersistenceError::Rejected(
                "mock ledger failure".to_string(),
            )));
        }
        self.mutate(account_id, |a| {
            a.balance += amount;
            Ok(())
        })
    }

    async fn lock_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        _tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError> {
        self.lock_count.fetch_add(1, Ordering::SeqCst);
        self.record(format!("lock_funds {} {}", account_id, amount));
        self.mutate(account_id, |a| {
            if a.balance < amount {
                return Err(FundingError::InsufficientFunds { account_id, amount });
            }
            a.balance -= amount;
            a.locked += amount;
            Ok(())
        })
    }

    async fn unlock_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        _tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError> {
        self.unlock_count.fetch_add(1, Ordering::SeqCst);
        self.record(format!("unlock_funds {} {}", account_id, amount));
        self.mutate(account_id, |a| {
            if a.locked < amount {
                return Err(FundingError::InsufficientLocked { account_id, amount });
            }
            a.locked -= amount;
            a.balance += amount;
            Ok(())
        })
    }

    async fn unlock_and_sub_funds(
        &self,
        account_id: i64,
        amount: Decimal,
        _tx: Option<&mut PgTx>,
    ) -> Result<(), FundingError> {
        self.unlock_and_sub_count.fetch_add(1, Ordering::SeqCst);
        self.record(format!("unlock_and_sub_funds {} {}", account_id, amount));
        self.mutate(account_id, |a| {
            if a.locked < amount {
                return Err(FundingError::InsufficientLocked { account_id, amount });
            }
            a.locked -= amount;
            Ok(())
        })
    }
}

#[async_trait]
impl MemberDirectory for MockFunding {
    async fn get_account(
        &self,
        member_id: i64,
        currency_id: &str,
        _tx: Option<&mut PgTx>,
    ) -> Result<Account, FundingError> {
        if let Some(account) = self.find_account(member_id, currency_id) {
            return Ok(account);
        }
        let id = self.open_account(member_id, currency_id, Decimal::ZERO);
        Ok(self.account(id))
    }
}

#[async_trait]
impl CurrencyDirectory for MockFunding {
    async fn get_currency(&self, currency_id: &str) -> Result<Currency, FundingError> {
        let kind = self
            .currencies
            .lock()
            .unwrap()
            .get(currency_id)
            .copied()
            .ok_or_else(|| FundingError::CurrencyNotFound(currency_id.to_string()))?;
        Ok(Currency {
            id: currency_id.to_string(),
            kind,
        })
    }
}

#[async_trait]
impl Collector for MockFunding {
    async fn enqueue_deposit_collection(
        &self,
        currency: &Currency,
        deposit_id: i64,
    ) -> Result<(), FundingError> {
        self.record(format!("collect {} {}", currency.id, deposit_id));
        if self.fail_collector.load(Ordering::SeqCst) {
            return Err(FundingError::DispatchClosed("collector"));
        }
        self.collections
            .lock()
            .unwrap()
            .push((currency.id.clone(), deposit_id));
        Ok(())
    }
}

#[async_trait]
impl Settlement for MockFunding {
    async fn send_coins(&self, withdraw: &Withdraw) -> Result<(), FundingError> {
        self.record(format!("send_coins {}", withdraw.rid));
        if self.fail_settlement.load(Ordering::SeqCst) {
            return Err(FundingError::DispatchClosed("settlement"));
        }
        self.sent.lock().unwrap().push(withdraw.rid.clone());
        Ok(())
    }
}
