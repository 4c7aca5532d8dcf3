//! Category progress commands.

use console::style;

use super::helpers::open_db;
use crate::config::Settings;
use crate::models::CategoryStatus;
use crate::repository::Engine;
use crate::services::CategoryScheduler;

async fn scheduler(settings: &Settings) -> anyhow::Result<CategoryScheduler> {
    let db = open_db(settings).await?;
    let scheduler = CategoryScheduler::new(
        &db,
        Engine::new(settings.statement_failure_policy),
        settings.advance_policy,
    );
    scheduler
        .sync_categories(&settings.categories.flatten())
        .await?;
    Ok(scheduler)
}

/// List tracked categories.
pub async fn cmd_categories_list(settings: &Settings) -> anyhow::Result<()> {
    let categories = scheduler(settings).await?.list().await?;

    if categories.is_empty() {
        println!(
            "{} No categories tracked. Add some to the config and run 'paperharvest init'.",
            style("!").yellow()
        );
        return Ok(());
    }

    println!("\n{}", style("Categories").bold());
    println!("{}", "-".repeat(50));
    println!("{:<24} {:<10} Updated", "Name", "Status");
    println!("{}", "-".repeat(50));
    for progress in categories {
        let status = match progress.status {
            CategoryStatus::Pending => style(progress.status.as_str()).yellow(),
            CategoryStatus::Finished => style(progress.status.as_str()).green(),
        };
        println!(
            "{:<24} {:<10} {}",
            progress.name,
            status,
            progress.updated_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// Return one or all categories to pending.
pub async fn cmd_categories_reset(
    settings: &Settings,
    category: Option<&str>,
    all: bool,
) -> anyhow::Result<()> {
    let scheduler = scheduler(settings).await?;

    if all {
        let count = scheduler.reset_all().await?;
        println!("{} Reset {} categories", style("✓").green(), count);
        return Ok(());
    }

    let Some(category) = category else {
        println!(
            "{} Specify a category or pass --all",
            style("!").yellow()
        );
        return Ok(());
    };
    if scheduler.reset(category).await? {
        println!("{} Reset {}", style("✓").green(), category);
    } else {
        println!("{} Category '{}' not found", style("✗").red(), category);
    }
    Ok(())
}
