//! Category scheduling.
//!
//! Categories move one way, `Pending -> Finished`. Each collector invocation
//! takes the oldest pending categories in declaration order.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{CategoryProgress, CategoryStatus};
use crate::repository::{CategoryProgressRepository, DbContext, DieselError, Engine};

/// Whether a category whose run failed still advances to `Finished`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// Mark every attempted category finished.
    #[default]
    Always,
    /// Leave failed categories pending for the next invocation.
    OnSuccess,
}

impl AdvancePolicy {
    pub fn should_advance(&self, succeeded: bool) -> bool {
        match self {
            Self::Always => true,
            Self::OnSuccess => succeeded,
        }
    }
}

/// First `limit` pending categories.
pub fn select_next(pending: &[String], limit: usize) -> &[String] {
    &pending[..limit.min(pending.len())]
}

/// Category progress bookkeeping.
#[derive(Clone)]
pub struct CategoryScheduler {
    progress: CategoryProgressRepository,
    engine: Engine,
    policy: AdvancePolicy,
}

impl CategoryScheduler {
    pub fn new(db: &DbContext, engine: Engine, policy: AdvancePolicy) -> Self {
        Self {
            progress: db.progress(),
            engine,
            policy,
        }
    }

    /// Add a `Pending` row for each declared category not yet tracked.
    ///
    /// Returns the names added, in declaration order.
    pub async fn sync_categories(&self, declared: &[String]) -> Result<Vec<String>, DieselError> {
        let existing: Vec<CategoryProgress> = self
            .engine
            .settle("select category progress", self.progress.get_all().await)?;

        let mut added: Vec<String> = Vec::new();
        for name in declared {
            if !existing.iter().any(|p| &p.name == name) && !added.contains(name) {
                added.push(name.clone());
            }
        }
        if !added.is_empty() {
            self.engine.settle(
                "insert category progress",
                self.progress.insert_pending(&added).await,
            )?;
            info!(categories = ?added, "Added new categories");
        }
        Ok(added)
    }

    /// All categories not yet finished, oldest first.
    pub async fn pending(&self) -> Result<Vec<String>, DieselError> {
        self.engine
            .settle("select pending categories", self.progress.pending_names().await)
    }

    /// The categories the next run should harvest.
    pub async fn next_batch(&self, limit: usize) -> Result<Vec<String>, DieselError> {
        let pending = self.pending().await?;
        Ok(select_next(&pending, limit).to_vec())
    }

    pub async fn mark_finished(&self, category: &str) -> Result<(), DieselError> {
        self.engine.settle(
            "mark category finished",
            self.progress
                .set_status(category, CategoryStatus::Finished)
                .await,
        )?;
        Ok(())
    }

    /// Apply the advance policy after a category run. Returns whether the
    /// category was marked finished.
    pub async fn finish_run(&self, category: &str, succeeded: bool) -> Result<bool, DieselError> {
        if self.policy.should_advance(succeeded) {
            self.mark_finished(category).await?;
            info!(category, "Category finished");
            Ok(true)
        } else {
            info!(category, "Category left pending after failed run");
            Ok(false)
        }
    }

    /// Return one category to `Pending`. Returns false if it is not tracked.
    pub async fn reset(&self, category: &str) -> Result<bool, DieselError> {
        let updated = self.engine.settle(
            "reset category",
            self.progress
                .set_status(category, CategoryStatus::Pending)
                .await,
        )?;
        Ok(updated > 0)
    }

    /// Return every finished category to `Pending`.
    pub async fn reset_all(&self) -> Result<usize, DieselError> {
        self.engine
            .settle("reset all categories", self.progress.reset_all().await)
    }

    /// Every tracked category with its state.
    pub async fn list(&self) -> Result<Vec<CategoryProgress>, DieselError> {
        self.engine
            .settle("select category progress", self.progress.get_all().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn scheduler(policy: AdvancePolicy) -> (TempDir, CategoryScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let db = DbContext::new(&dir.path().join("harvest.db"));
        db.init_schema().await.unwrap();
        (dir, CategoryScheduler::new(&db, Engine::default(), policy))
    }

    #[test]
    fn test_select_next_is_fifo_slice() {
        let pending = names(&["a", "b", "c"]);
        assert_eq!(select_next(&pending, 2), &pending[..2]);
        assert_eq!(select_next(&pending, 10), &pending[..]);
        assert!(select_next(&pending, 0).is_empty());
        assert!(select_next(&[], 3).is_empty());
    }

    #[test]
    fn test_advance_policy() {
        assert!(AdvancePolicy::Always.should_advance(false));
        assert!(AdvancePolicy::OnSuccess.should_advance(true));
        assert!(!AdvancePolicy::OnSuccess.should_advance(false));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_and_ordered() {
        let (_dir, s) = scheduler(AdvancePolicy::Always).await;
        let added = s.sync_categories(&names(&["cs.AI", "cs.LG"])).await.unwrap();
        assert_eq!(added, names(&["cs.AI", "cs.LG"]));

        let added = s
            .sync_categories(&names(&["math.CO", "cs.AI", "cs.LG"]))
            .await
            .unwrap();
        assert_eq!(added, names(&["math.CO"]));
        assert!(s.sync_categories(&names(&["cs.AI"])).await.unwrap().is_empty());

        assert_eq!(
            s.pending().await.unwrap(),
            names(&["cs.AI", "cs.LG", "math.CO"])
        );
    }

    #[tokio::test]
    async fn test_finish_and_reset() {
        let (_dir, s) = scheduler(AdvancePolicy::Always).await;
        s.sync_categories(&names(&["a", "b", "c"])).await.unwrap();

        assert_eq!(s.next_batch(2).await.unwrap(), names(&["a", "b"]));
        assert!(s.finish_run("a", false).await.unwrap());
        assert_eq!(s.next_batch(2).await.unwrap(), names(&["b", "c"]));

        assert!(s.reset("a").await.unwrap());
        assert!(!s.reset("unknown").await.unwrap());
        assert_eq!(s.pending().await.unwrap(), names(&["a", "b", "c"]));

        s.mark_finished("b").await.unwrap();
        s.mark_finished("c").await.unwrap();
        assert_eq!(s.reset_all().await.unwrap(), 2);
        assert_eq!(s.pending().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_on_success_keeps_failed_pending() {
        let (_dir, s) = scheduler(AdvancePolicy::OnSuccess).await;
        s.sync_categories(&names(&["a"])).await.unwrap();
        assert!(!s.finish_run("a", false).await.unwrap());
        assert_eq!(s.pending().await.unwrap(), names(&["a"]));
        assert!(s.finish_run("a", true).await.unwrap());
        assert!(s.pending().await.unwrap().is_empty());
    }
}
