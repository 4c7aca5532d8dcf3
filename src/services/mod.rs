//! Pipeline services.
//!
//! These hold the harvest logic independent of the CLI. Each service takes a
//! [`PipelineContext`] built once per invocation.

pub mod collector;
pub mod continuation;
pub mod loader;
pub mod scheduler;

pub use collector::{CategoryOutcome, CollectError, CollectReport, Collector, DedupSet};
pub use continuation::{ContinuationPayload, ContinuationTrigger, ProcessTrigger, TriggerError};
pub use loader::{LoadError, LoadReport, Loader};
pub use scheduler::{select_next, AdvancePolicy, CategoryScheduler};

use std::sync::Arc;

use crate::config::Settings;
use crate::repository::{DbContext, Engine};
use crate::search::SearchApi;
use crate::storage::ObjectStore;

/// Everything one collector or loader invocation works with.
///
/// Built explicitly by the caller; services keep no process-wide state.
#[derive(Clone)]
pub struct PipelineContext {
    pub settings: Settings,
    pub db: DbContext,
    pub store: Arc<dyn ObjectStore>,
    pub search: Arc<dyn SearchApi>,
    pub engine: Engine,
}

impl PipelineContext {
    pub fn new(
        settings: Settings,
        db: DbContext,
        store: Arc<dyn ObjectStore>,
        search: Arc<dyn SearchApi>,
    ) -> Self {
        let engine = Engine::new(settings.statement_failure_policy);
        Self {
            settings,
            db,
            store,
            search,
            engine,
        }
    }

    pub fn scheduler(&self) -> CategoryScheduler {
        CategoryScheduler::new(&self.db, self.engine, self.settings.advance_policy)
    }
}
