//! Initialize command.

use console::style;

use super::helpers::open_db;
use crate::config::{Settings, StorageBackend};
use crate::repository::util::redact_url_password;
use crate::repository::Engine;
use crate::services::CategoryScheduler;

/// Initialize the data directory, database and category progress.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let db = open_db(settings).await?;

    let scheduler = CategoryScheduler::new(
        &db,
        Engine::new(settings.statement_failure_policy),
        settings.advance_policy,
    );
    let declared = settings.categories.flatten();
    let added = scheduler.sync_categories(&declared).await?;
    for name in &added {
        println!("  {} Added category: {}", style("✓").green(), name);
    }

    if declared.is_empty() {
        println!(
            "{} No categories configured in paperharvest.yaml",
            style("!").yellow()
        );
    }

    println!(
        "{} Initialized paperharvest in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!(
        "  Database: {}",
        redact_url_password(&settings.database_url())
    );
    match &settings.storage {
        StorageBackend::Local { root } => println!("  Objects:  {}", root.display()),
        StorageBackend::Http { url, .. } => println!("  Objects:  {}", url),
        StorageBackend::Memory => println!("  Objects:  in memory"),
    }

    Ok(())
}
