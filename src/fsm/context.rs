//! Per-call transition values

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use super::Stateful;

/// One-off caller customization run on the entity around the persist step
pub type Callback<'c, E> =
    Box<dyn for<'a> FnOnce(&'a mut E) -> BoxFuture<'a, anyhow::Result<()>> + Send + 'c>;

/// Caller-supplied options for a single transition
pub struct TransitionOptions<'c, E: Stateful> {
    pub(super) env: &'c E::Env,
    pub(super) tx: Option<&'c mut E::Tx>,
    pub(super) before: Option<Callback<'c, E>>,
    pub(super) after: Option<Callback<'c, E>>,
    pub(super) extras: Map<String, Value>,
}

impl<'c, E: Stateful> TransitionOptions<'c, E> {
    pub fn new(env: &'c E::Env) -> Self {
        Self {
            env,
            tx: None,
            before: None,
            after: None,
            extras: Map::new(),
        }
    }

    /// Persist and run hooks inside this transaction
    pub fn with_tx(mut self, tx: &'c mut E::Tx) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Runs after the guard passes, ahead of the definition's before hooks
    pub fn before<F>(mut self, f: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut E) -> BoxFuture<'a, anyhow::Result<()>> + Send + 'c,
    {
        self.before = Some(Box::new(f));
        self
    }

    /// Runs after persist, ahead of the definition's after hooks
    pub fn after<F>(mut self, f: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut E) -> BoxFuture<'a, anyhow::Result<()>> + Send + 'c,
    {
        self.after = Some(Box::new(f));
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// Options merged with `{from, to}`, handed to every hook
pub struct TransitionContext<'c, E: Stateful> {
    pub event: E::Event,
    pub from: E::State,
    pub to: E::State,
    pub env: &'c E::Env,
    pub tx: Option<&'c mut E::Tx>,
    pub extras: Map<String, Value>,
}

impl<E: Stateful> TransitionContext<'_, E> {
    /// Reborrow the caller's transaction, if any
    pub fn tx(&mut self) -> Option<&mut E::Tx> {
        self.tx.as_deref_mut()
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }
}

/// Result of a transition request
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<S> {
    /// State changed and persisted
    Applied { from: S, to: S },
    /// Guard rejected in non-strict mode; nothing ran
    Rejected { from: Option<S> },
}

impl<S> Outcome<S> {
    #[inline]
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected { .. })
    }
}
