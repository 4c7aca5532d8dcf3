//! Raw batch commands.

use console::style;

use super::helpers::open_db;
use crate::config::Settings;

/// Return failed descriptors to pending.
pub async fn cmd_batches_requeue(settings: &Settings) -> anyhow::Result<()> {
    let db = open_db(settings).await?;
    let count = db.batches().requeue_failed().await?;
    if count == 0 {
        println!("{} No failed batches", style("!").yellow());
    } else {
        println!(
            "{} Requeued {} batches; run 'paperharvest load' to retry them",
            style("✓").green(),
            count
        );
    }
    Ok(())
}
