//! Declarative State Machines
//!
//! Attaches an immutable [`Machine`] definition to a persisted entity type and
//! derives guarded transitions, state predicates, query scopes and
//! introspection helpers from it.
//!
//! # Transition Contract
//!
//! ```text
//! guard ─┬─ rejected ──► Outcome::Rejected (non-strict) | InvalidTransition (strict)
//!        └─ passed ──► before callback ► before hooks ► set state ► persist
//!                                        ► after callback ► after hooks ► Outcome::Applied
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Guard-Before-Mutation**: a rejected guard never runs hooks or touches state
//! 2. **Before-Hooks Abort**: a failing before hook leaves nothing persisted
//! 3. **After-Hooks Do Not Roll Back**: a failing after hook is reported, but the
//!    new state is already persisted in the caller's transaction
//! 4. **No Entity Locking**: callers must hold an exclusive row lock on the entity

mod context;
mod definition;
mod engine;
mod error;
mod scope;

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use thiserror::Error;

pub use context::{Callback, Outcome, TransitionContext, TransitionOptions};
pub use definition::{DefinitionError, EventDef, Hook, HookFn, Machine, MachineBuilder, StateDef};
pub use engine::StateMachine;
pub use error::{FsmError, HookStage, PersistenceError};
pub use scope::StateScope;

/// A state or event name with a stable persisted spelling.
pub trait Symbol: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Name as stored in the state column
    fn as_str(&self) -> &'static str;
}

/// Raised when a stored name matches no declared symbol
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownSymbol {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownSymbol {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// An entity whose lifecycle is governed by a [`Machine`].
///
/// Implementors provide storage access and hook dispatch; the generated
/// operations come from the blanket [`StateMachine`] implementation.
#[async_trait]
pub trait Stateful: Sized + Send + Sync + 'static {
    type State: Symbol;
    type Event: Symbol;
    /// Hook methods the definition may reference by [`Hook::Method`]
    type Hook: Copy + fmt::Debug + Send + Sync + 'static;
    /// Collaborators visible to hooks and persistence
    type Env: ?Sized + Send + Sync;
    /// Transaction handle threaded through persist and hooks
    type Tx: Send;

    /// Entity name used in errors and logs
    const ENTITY: &'static str;

    fn machine() -> &'static Machine<Self>;

    /// Current state. `None` only before the first save.
    fn state(&self) -> Option<Self::State>;

    fn set_state(&mut self, state: Self::State);

    /// Write the entity as a single statement.
    async fn persist(
        &mut self,
        env: &Self::Env,
        tx: Option<&mut Self::Tx>,
    ) -> Result<(), PersistenceError>;

    async fn call_hook(
        &mut self,
        hook: Self::Hook,
        ctx: &mut TransitionContext<'_, Self>,
    ) -> anyhow::Result<()>;
}
