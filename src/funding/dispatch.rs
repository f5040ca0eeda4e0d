//! In-process dispatch queue
//!
//! Hands collection and settlement requests, and committed lifecycle events,
//! to background workers over unbounded channels. Senders never block.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::FundingError;
use super::ports::{Collector, EventEmitter, Settlement};
use super::types::{Currency, LifecycleEvent};
use super::withdraw::Withdraw;

/// Work item for the settlement/collection workers
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchRequest {
    CollectDeposit { currency_id: String, deposit_id: i64 },
    SendCoins(Box<Withdraw>),
}

pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<DispatchRequest>,
}

impl DispatchQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, request: DispatchRequest) -> Result<(), FundingError> {
        self.tx
            .send(request)
            .map_err(|_| FundingError::DispatchClosed("dispatch"))
    }
}

#[async_trait]
impl Collector for DispatchQueue {
    async fn enqueue_deposit_collection(
        &self,
        currency: &Currency,
        deposit_id: i64,
    ) -> Result<(), FundingError> {
        self.push(DispatchRequest::CollectDeposit {
            currency_id: currency.id.clone(),
            deposit_id,
        })?;
        debug!(deposit_id, currency = %currency.id, "Deposit collection enqueued");
        Ok(())
    }
}

#[async_trait]
impl Settlement for DispatchQueue {
    async fn send_coins(&self, withdraw: &Withdraw) -> Result<(), FundingError> {
        self.push(DispatchRequest::SendCoins(Box::new(withdraw.clone())))
    }
}

/// Publishes lifecycle events on a channel; dropped receivers are tolerated
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(entity = e.0.entity, id = e.0.id, "No lifecycle listener, event dropped");
        }
    }
}
