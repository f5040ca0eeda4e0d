//! Machine Definitions
//!
//! Immutable description of states, events and hooks. Validated once when
//! built; never mutated afterwards.

use std::collections::HashSet;
use std::fmt;

use futures::future::BoxFuture;
use thiserror::Error;

use super::scope::StateScope;
use super::{Stateful, Symbol, TransitionContext};

/// Direct hook callable, bound at definition time
pub type HookFn<E> = for<'a, 'c> fn(
    &'a mut E,
    &'a mut TransitionContext<'c, E>,
) -> BoxFuture<'a, anyhow::Result<()>>;

/// Hook reference, resolved when the definition is built
pub enum Hook<E: Stateful> {
    /// One of the entity's hook methods, dispatched by [`Stateful::call_hook`]
    Method(E::Hook),
    /// Plain function
    Call(HookFn<E>),
}

impl<E: Stateful> Hook<E> {
    /// Name used in logs and errors
    pub fn label(&self) -> String {
        match self {
            Hook::Method(m) => format!("{:?}", m),
            Hook::Call(_) => "<fn>".to_string(),
        }
    }
}

impl<E: Stateful> fmt::Debug for Hook<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Method(m) => f.debug_tuple("Method").field(m).finish(),
            Hook::Call(_) => f.write_str("Call(<fn>)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDef<S> {
    pub state: S,
    pub initial: bool,
}

/// One event: source states, target state and ordered hooks
#[derive(Debug)]
pub struct EventDef<E: Stateful> {
    pub event: E::Event,
    pub from: Vec<E::State>,
    pub to: E::State,
    pub before: Vec<Hook<E>>,
    pub after: Vec<Hook<E>>,
}

impl<E: Stateful> EventDef<E> {
    pub fn new(
        event: E::Event,
        from: impl IntoIterator<Item = E::State>,
        to: E::State,
    ) -> Self {
        Self {
            event,
            from: from.into_iter().collect(),
            to,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn before(mut self, hook: Hook<E>) -> Self {
        self.before.push(hook);
        self
    }

    pub fn after(mut self, hook: Hook<E>) -> Self {
        self.after.push(hook);
        self
    }

    /// Guard: is `state` one of this event's sources
    #[inline]
    pub fn permits(&self, state: Option<E::State>) -> bool {
        state.is_some_and(|s| self.from.contains(&s))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("state machine on `{0}` declares no states")]
    NoStates(&'static str),

    #[error("both `{0}` and `{1}` are marked initial")]
    MultipleInitial(&'static str, &'static str),

    #[error("state `{0}` declared twice")]
    DuplicateState(&'static str),

    #[error("event `{0}` declared twice")]
    DuplicateEvent(&'static str),

    #[error("event `{event}` references undeclared state `{state}`")]
    UndeclaredState {
        event: &'static str,
        state: &'static str,
    },

    #[error("event `{0}` has no source states")]
    NoSources(&'static str),
}

/// Immutable state machine definition for entity type `E`
#[derive(Debug)]
pub struct Machine<E: Stateful> {
    field: &'static str,
    strict: bool,
    states: Vec<StateDef<E::State>>,
    events: Vec<EventDef<E>>,
    initial: E::State,
}

impl<E: Stateful> Machine<E> {
    /// Start a definition for the given state column
    pub fn builder(field: &'static str) -> MachineBuilder<E> {
        MachineBuilder {
            field,
            strict: false,
            states: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Name of the state column
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Whether invalid transitions raise instead of returning a rejection
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn initial_state(&self) -> E::State {
        self.initial
    }

    pub fn state_defs(&self) -> &[StateDef<E::State>] {
        &self.states
    }

    /// Declared states in declaration order
    pub fn states(&self) -> impl Iterator<Item = E::State> + '_ {
        self.states.iter().map(|s| s.state)
    }

    pub fn state_names(&self) -> Vec<&'static str> {
        self.states().map(|s| s.as_str()).collect()
    }

    pub fn events(&self) -> &[EventDef<E>] {
        &self.events
    }

    pub fn event(&self, event: E::Event) -> Option<&EventDef<E>> {
        self.events.iter().find(|e| e.event == event)
    }

    /// Query filter selecting entities currently in `state`
    pub fn scope(&self, state: E::State) -> StateScope {
        StateScope::new(self.field, vec![state.as_str()])
    }

    /// Query filter selecting entities in any of `states`
    pub fn scope_in(&self, states: &[E::State]) -> StateScope {
        StateScope::new(self.field, states.iter().map(|s| s.as_str()).collect())
    }
}

/// Validating builder for [`Machine`]
pub struct MachineBuilder<E: Stateful> {
    field: &'static str,
    strict: bool,
    states: Vec<StateDef<E::State>>,
    events: Vec<EventDef<E>>,
}

impl<E: Stateful> MachineBuilder<E> {
    /// Raise [`super::FsmError::InvalidTransition`] on guard failure (whiny transitions)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn state(mut self, state: E::State) -> Self {
        self.states.push(StateDef {
            state,
            initial: false,
        });
        self
    }

    pub fn initial(mut self, state: E::State) -> Self {
        self.states.push(StateDef {
            state,
            initial: true,
        });
        self
    }

    pub fn event(mut self, event: EventDef<E>) -> Self {
        self.events.push(event);
        self
    }

    pub fn build(self) -> Result<Machine<E>, DefinitionError> {
        let first = self
            .states
            .first()
            .ok_or(DefinitionError::NoStates(self.field))?
            .state;

        let mut seen = HashSet::new();
        let mut initial: Option<E::State> = None;
        for def in &self.states {
            if !seen.insert(def.state) {
                return Err(DefinitionError::DuplicateState(def.state.as_str()));
            }
            if def.initial {
                if let Some(prev) = initial {
                    return Err(DefinitionError::MultipleInitial(
                        prev.as_str(),
                        def.state.as_str(),
                    ));
                }
                initial = Some(def.state);
            }
        }

        let mut seen_events = HashSet::new();
        for ev in &self.events {
            let name = ev.event.as_str();
            if !seen_events.insert(ev.event) {
                return Err(DefinitionError::DuplicateEvent(name));
            }
            if ev.from.is_empty() {
                return Err(DefinitionError::NoSources(name));
            }
            if let Some(s) = ev.from.iter().chain([&ev.to]).find(|s| !seen.contains(*s)) {
                return Err(DefinitionError::UndeclaredState {
                    event: name,
                    state: s.as_str(),
                });
            }
        }

        Ok(Machine {
            field: self.field,
            strict: self.strict,
            states: self.states,
            events: self.events,
            initial: initial.unwrap_or(first),
        })
    }
}
