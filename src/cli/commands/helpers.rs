//! Shared helpers for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::Settings;
use crate::repository::DbContext;
use crate::search::ArxivClient;
use crate::services::PipelineContext;
use crate::storage::open_store;

/// Open the database and make sure the schema exists.
pub async fn open_db(settings: &Settings) -> anyhow::Result<DbContext> {
    settings.ensure_directories()?;
    let db = settings.create_db_context()?;
    db.init_schema().await?;
    Ok(db)
}

/// Build everything a collector or loader invocation needs.
pub async fn pipeline_context(settings: Settings) -> anyhow::Result<PipelineContext> {
    let db = open_db(&settings).await?;
    let store = open_store(&settings)?;
    let search = ArxivClient::new(
        &settings.search_api_url,
        &settings.user_agent,
        Duration::from_millis(settings.request_delay_ms),
        settings.request_retries,
    )?;
    Ok(PipelineContext::new(settings, db, store, Arc::new(search)))
}

/// Machine-readable result line printed by `collect` and `load`.
pub fn status_line(result: &Result<(), String>) -> String {
    match result {
        Ok(()) => json!({ "status": "ok" }).to_string(),
        Err(message) => json!({ "status": "error", "message": message }).to_string(),
    }
}
