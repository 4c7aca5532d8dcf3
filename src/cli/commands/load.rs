//! Load command.

use console::style;
use tracing::{info, warn};

use super::helpers::{pipeline_context, status_line};
use crate::config::Settings;
use crate::services::{ContinuationPayload, LoadReport, Loader, ProcessTrigger};

/// Load claimed raw batches, chaining another invocation if more remain.
pub async fn cmd_load(
    settings: Settings,
    payload: Option<&str>,
    chain: bool,
    forwarded_args: Vec<String>,
) -> anyhow::Result<()> {
    if let Some(raw) = payload {
        match serde_json::from_str::<ContinuationPayload>(raw) {
            Ok(p) if p.is_auto() => info!("Started as automatic continuation"),
            Ok(p) => info!(trigger = %p.trigger, "Started with payload"),
            Err(e) => warn!(error = %e, "Ignoring unreadable payload"),
        }
    }

    let ctx = pipeline_context(settings).await?;
    let loader = Loader::new(ctx);
    let result = if chain {
        loader.run_and_chain(&ProcessTrigger::new(forwarded_args)).await
    } else {
        loader.run().await
    };

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

fn print_report(report: &LoadReport) {
    if report.claimed == 0 {
        eprintln!("{} No pending batches", style("!").yellow());
        return;
    }

    eprintln!(
        "{} Loaded {} of {} claimed batches: {} records, {} inserted, {} history rows",
        style("✓").green(),
        report.finished.len(),
        report.claimed,
        report.totals.records,
        report.totals.inserted,
        report.totals.history_rows
    );
    if report.totals.malformed_lines > 0 || report.totals.dropped_rows > 0 {
        eprintln!(
            "  {} malformed lines skipped, {} rows dropped",
            report.totals.malformed_lines, report.totals.dropped_rows
        );
    }
    for (batch_id, error) in &report.failed {
        eprintln!("{} {}: {}", style("✗").red(), batch_id, style(error).dim());
    }
    if report.needs_continuation() {
        eprintln!(
            "{} {} batches still pending",
            style("→").cyan(),
            report.remaining_pending
        );
    }
}
