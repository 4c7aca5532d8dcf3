//! Collect command.

use console::style;

use super::helpers::{pipeline_context, status_line};
use crate::config::Settings;
use crate::services::{CollectReport, Collector};

/// Harvest the next scheduled categories.
pub async fn cmd_collect(settings: Settings) -> anyhow::Result<()> {
    let ctx = pipeline_context(settings).await?;
    let result = Collector::new(ctx).run().await;

    match result {
        Ok(report) => {
            print_report(&report);
            println!("{}", status_line(&Ok(())));
            Ok(())
        }
        Err(e) => {
            println!("{}", status_line(&Err(e.to_string())));
            Err(e.into())
        }
    }
}

fn print_report(report: &CollectReport) {
    if report.all_finished {
        println!("{} All categories are finished", style("✓").green());
        return;
    }

    for outcome in &report.categories {
        let marker = if outcome.succeeded() {
            style("✓").green()
        } else {
            style("✗").red()
        };
        eprintln!(
            "{} {}: {} uploaded in {} batches ({:.1}s)",
            marker,
            outcome.category,
            outcome.stats.s3_count,
            outcome.batches.len(),
            outcome.stats.elapsed_seconds
        );
        if let Some(ref error) = outcome.error {
            eprintln!("    {}", style(error).dim());
        }
    }

    if report.needs_another_run() {
        eprintln!(
            "{} {} categories remain, run collect again",
            style("→").cyan(),
            report.remaining_categories
        );
    }
}
