//! Transition Engine
//!
//! Runs the guard/hook/persist sequence for a [`Machine`] and composes the
//! generated operations onto every [`Stateful`] type.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::context::{Outcome, TransitionContext, TransitionOptions};
use super::definition::{Hook, Machine};
use super::error::{FsmError, HookStage, PersistenceError};
use super::{Stateful, Symbol};

impl<E: Stateful> Machine<E> {
    /// Guard check, no side effects
    pub fn may_fire(&self, entity: &E, event: E::Event) -> bool {
        self.event(event)
            .is_some_and(|def| def.permits(entity.state()))
    }

    /// Fire `event` on `entity`.
    ///
    /// After-hook failures are returned as errors although the new state has
    /// already been persisted; see [`FsmError::is_committed`].
    pub async fn fire(
        &self,
        entity: &mut E,
        event: E::Event,
        opts: TransitionOptions<'_, E>,
    ) -> Result<Outcome<E::State>, FsmError> {
        let def = self.event(event).ok_or(FsmError::UnknownEvent {
            entity: E::ENTITY,
            event: event.as_str(),
        })?;

        let current = entity.state();
        let from = match current {
            Some(state) if def.from.contains(&state) => state,
            _ => {
                if self.is_strict() {
                    return Err(FsmError::InvalidTransition {
                        entity: E::ENTITY,
                        from: current.map(|s| s.as_str()),
                        to: def.to.as_str(),
                    });
                }
                debug!(
                    entity = E::ENTITY,
                    event = %event,
                    from = ?current,
                    "Transition rejected by guard"
                );
                return Ok(Outcome::Rejected { from: current });
            }
        };

        let TransitionOptions {
            env,
            tx,
            before,
            after,
            extras,
        } = opts;
        let mut ctx = TransitionContext {
            event,
            from,
            to: def.to,
            env,
            tx,
            extras,
        };

        if let Some(callback) = before {
            callback(&mut *entity)
                .await
                .map_err(|e| hook_error(&ctx, HookStage::Before, "callback".into(), e))?;
        }
        run_hooks(entity, &def.before, &mut ctx, HookStage::Before).await?;

        entity.set_state(def.to);
        if let Err(e) = entity.persist(ctx.env, ctx.tx.as_deref_mut()).await {
            entity.set_state(from);
            return Err(e.into());
        }
        info!(
            entity = E::ENTITY,
            event = %event,
            from = %from,
            to = %def.to,
            "Transition committed"
        );

        if let Some(callback) = after {
            callback(&mut *entity)
                .await
                .map_err(|e| hook_error(&ctx, HookStage::After, "callback".into(), e))?;
        }
        run_hooks(entity, &def.after, &mut ctx, HookStage::After).await?;

        Ok(Outcome::Applied { from, to: def.to })
    }

    /// Set the initial state when none is present. Returns true if assigned.
    pub fn assign_initial_state(&self, entity: &mut E) -> bool {
        if entity.state().is_some() {
            return false;
        }
        entity.set_state(self.initial_state());
        true
    }

    pub fn permitted_events(&self, entity: &E) -> Vec<E::Event> {
        let state = entity.state();
        self.events()
            .iter()
            .filter(|def| def.permits(state))
            .map(|def| def.event)
            .collect()
    }

    pub fn disabled_events(&self, entity: &E) -> Vec<E::Event> {
        let state = entity.state();
        self.events()
            .iter()
            .filter(|def| !def.permits(state))
            .map(|def| def.event)
            .collect()
    }

    /// Declared states reachable through a permitted event
    pub fn permitted_states(&self, entity: &E) -> Vec<E::State> {
        self.targets_of(&self.permitted_events(entity))
    }

    /// Declared states that are targets of disabled events
    pub fn disabled_states(&self, entity: &E) -> Vec<E::State> {
        self.targets_of(&self.disabled_events(entity))
    }

    fn targets_of(&self, events: &[E::Event]) -> Vec<E::State> {
        let targets: Vec<E::State> = events
            .iter()
            .filter_map(|e| self.event(*e))
            .map(|def| def.to)
            .collect();
        self.states().filter(|s| targets.contains(s)).collect()
    }
}

async fn run_hooks<E: Stateful>(
    entity: &mut E,
    hooks: &[Hook<E>],
    ctx: &mut TransitionContext<'_, E>,
    stage: HookStage,
) -> Result<(), FsmError> {
    for hook in hooks {
        let result = match hook {
            Hook::Method(method) => entity.call_hook(*method, ctx).await,
            Hook::Call(f) => f(&mut *entity, &mut *ctx).await,
        };
        if let Err(e) = result {
            if stage == HookStage::After {
                warn!(
                    entity = E::ENTITY,
                    event = %ctx.event,
                    to = %ctx.to,
                    hook = %hook.label(),
                    "After hook failed; state already persisted"
                );
            }
            return Err(hook_error(ctx, stage, hook.label(), e));
        }
    }
    Ok(())
}

fn hook_error<E: Stateful>(
    ctx: &TransitionContext<'_, E>,
    stage: HookStage,
    hook: String,
    source: anyhow::Error,
) -> FsmError {
    FsmError::Hook {
        entity: E::ENTITY,
        event: ctx.event.as_str(),
        from: ctx.from.as_str(),
        to: ctx.to.as_str(),
        stage,
        hook,
        source,
    }
}

/// Generated operations, available on every [`Stateful`] entity
#[async_trait]
pub trait StateMachine: Stateful {
    fn may_transition(&self, event: Self::Event) -> bool {
        Self::machine().may_fire(self, event)
    }

    async fn transition(
        &mut self,
        event: Self::Event,
        opts: TransitionOptions<'_, Self>,
    ) -> Result<Outcome<Self::State>, FsmError> {
        Self::machine().fire(self, event, opts).await
    }

    fn is_in_state(&self, state: Self::State) -> bool {
        self.state() == Some(state)
    }

    fn permitted_events(&self) -> Vec<Self::Event> {
        Self::machine().permitted_events(self)
    }

    fn disabled_events(&self) -> Vec<Self::Event> {
        Self::machine().disabled_events(self)
    }

    fn permitted_states(&self) -> Vec<Self::State> {
        Self::machine().permitted_states(self)
    }

    fn disabled_states(&self) -> Vec<Self::State> {
        Self::machine().disabled_states(self)
    }

    /// Persist, assigning the initial state first if none is set
    async fn save(
        &mut self,
        env: &Self::Env,
        tx: Option<&mut Self::Tx>,
    ) -> Result<(), PersistenceError> {
        Self::machine().assign_initial_state(self);
        self.persist(env, tx).await
    }
}

impl<E: Stateful> StateMachine for E {}
