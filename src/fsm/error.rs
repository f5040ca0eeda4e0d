//! State Machine Error Types

use std::fmt;

use thiserror::Error;

/// Which side of the persist step a hook ran on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Before,
    After,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::Before => "before",
            HookStage::After => "after",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage layer failure, propagated unchanged through transitions
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Transition errors
#[derive(Debug, Error)]
pub enum FsmError {
    /// Guard rejected in strict mode
    #[error("{entity} cannot transition from {} to {to}", .from.unwrap_or("(unset)"))]
    InvalidTransition {
        entity: &'static str,
        from: Option<&'static str>,
        to: &'static str,
    },

    #[error("{entity} has no `{event}` event")]
    UnknownEvent {
        entity: &'static str,
        event: &'static str,
    },

    /// A hook or callback failed. For the after stage the new state is already persisted.
    #[error("{stage} hook {hook} failed on {entity}.{event} ({from} -> {to}): {source}")]
    Hook {
        entity: &'static str,
        event: &'static str,
        from: &'static str,
        to: &'static str,
        stage: HookStage,
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl FsmError {
    /// True when the failure happened after the new state was written
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            FsmError::Hook {
                stage: HookStage::After,
                ..
            }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            FsmError::InvalidTransition { .. } => "INVALID_TRANSITION",
            FsmError::UnknownEvent { .. } => "UNKNOWN_EVENT",
            FsmError::Hook { .. } => "HOOK_FAILED",
            FsmError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}
