//! State Scopes
//!
//! Named filters selecting entities by their state column.

use sqlx::{Postgres, QueryBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateScope {
    field: &'static str,
    states: Vec<&'static str>,
}

impl StateScope {
    pub(super) fn new(field: &'static str, states: Vec<&'static str>) -> Self {
        Self { field, states }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn states(&self) -> &[&'static str] {
        &self.states
    }

    /// In-memory equivalent of the SQL filter
    pub fn matches(&self, state: &str) -> bool {
        self.states.contains(&state)
    }

    /// Append `field = $n` (one state) or `field = ANY($n)` to a query.
    ///
    /// The caller is responsible for the preceding `WHERE`/`AND`.
    pub fn push_filter(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(self.field);
        match self.states.as_slice() {
            [single] => {
                qb.push(" = ").push_bind(single.to_string());
            }
            many => {
                let values: Vec<String> = many.iter().map(|s| s.to_string()).collect();
                qb.push(" = ANY(").push_bind(values).push(")");
            }
        }
    }
}
