//! Statement failure policy.
//!
//! Repositories always return `Result<T, DieselError>`. Pipeline code routes
//! those results through [`Engine::settle`], which logs a failed statement and
//! then either swallows it (yielding the empty/default value, so "no rows" and
//! "statement failed" look alike to the caller) or hands the error back.

use serde::{Deserialize, Serialize};
use tracing::error;

use super::pool::DieselError;

/// What to do with a failed statement once it has been logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log, then return the default value for the call.
    #[default]
    Swallow,
    /// Log, then return the error.
    Propagate,
}

/// Applies the configured [`FailurePolicy`] to repository results.
#[derive(Debug, Clone, Copy, Default)]
pub struct Engine {
    policy: FailurePolicy,
}

impl Engine {
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Settle a repository result under the failure policy.
    pub fn settle<T: Default>(
        &self,
        statement: &str,
        result: Result<T, DieselError>,
    ) -> Result<T, DieselError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                error!(statement, error = %e, "Database statement failed");
                match self.policy {
                    FailurePolicy::Swallow => Ok(T::default()),
                    FailurePolicy::Propagate => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> Result<Vec<String>, DieselError> {
        Err(DieselError::NotFound)
    }

    #[test]
    fn test_swallow_returns_default() {
        let engine = Engine::new(FailurePolicy::Swallow);
        let rows = engine.settle("select pending", failed()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_propagate_returns_error() {
        let engine = Engine::new(FailurePolicy::Propagate);
        assert!(matches!(
            engine.settle("select pending", failed()),
            Err(DieselError::NotFound)
        ));
    }

    #[test]
    fn test_success_passes_through() {
        let engine = Engine::default();
        assert_eq!(engine.settle("count", Ok(7_i64)).unwrap(), 7);
    }
}
