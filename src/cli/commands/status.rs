//! Status command.

use console::style;
use serde_json::json;

use super::helpers::open_db;
use crate::config::Settings;
use crate::models::CategoryStatus;

/// Show category progress, batch and tracking counts, and the last run of
/// each category.
pub async fn cmd_status(settings: &Settings, as_json: bool) -> anyhow::Result<()> {
    let db = open_db(settings).await?;

    let progress = db.progress().get_all().await?;
    let pending = progress
        .iter()
        .filter(|p| p.status == CategoryStatus::Pending)
        .count();
    let batches = db.batches().count_by_status().await?;
    let downloads = db.downloads().count_by_status().await?;
    let papers = db.papers().count_content().await?;
    let latest = db.stats().latest_per_category().await?;

    if as_json {
        let batch_counts: serde_json::Map<String, serde_json::Value> = batches
            .iter()
            .map(|(status, count)| (status.as_str().to_string(), json!(count)))
            .collect();
        let download_counts: serde_json::Map<String, serde_json::Value> = downloads
            .iter()
            .map(|(status, count)| (status.clone(), json!(count)))
            .collect();
        let status = json!({
            "categories": {
                "total": progress.len(),
                "pending": pending,
                "finished": progress.len() - pending,
            },
            "batches": batch_counts,
            "downloads": download_counts,
            "papers": papers,
            "last_runs": latest,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("\n{}", style("paperharvest status").bold());
    println!("{}", "-".repeat(50));
    println!(
        "{:<20} {} total, {} pending, {} finished",
        "Categories:",
        progress.len(),
        pending,
        progress.len() - pending
    );
    let batch_summary: Vec<String> = batches
        .iter()
        .map(|(status, count)| format!("{} {}", count, status.as_str()))
        .collect();
    println!("{:<20} {}", "Batches:", batch_summary.join(", "));
    let download_summary: Vec<String> = downloads
        .iter()
        .map(|(status, count)| format!("{} {}", count, status))
        .collect();
    if download_summary.is_empty() {
        println!("{:<20} none", "Tracked papers:");
    } else {
        println!("{:<20} {}", "Tracked papers:", download_summary.join(", "));
    }
    println!("{:<20} {}", "Loaded papers:", papers);

    if !latest.is_empty() {
        println!("\n{}", style("Last runs").bold());
        println!("{}", "-".repeat(50));
        println!(
            "{:<20} {:>8} {:>8} {:>9}  Recorded",
            "Category", "Stored", "Tracked", "Seconds"
        );
        for stats in &latest {
            println!(
                "{:<20} {:>8} {:>8} {:>9.1}  {}",
                stats.category,
                stats.s3_count,
                stats.pg_count,
                stats.elapsed_seconds,
                stats.recorded_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    Ok(())
}
