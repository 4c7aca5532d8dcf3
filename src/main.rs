//! paperharvest - category-driven paper harvesting.
//!
//! Harvests arXiv categories into object storage and loads the stored
//! batches into a relational database.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paperharvest::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "paperharvest=info"
    } else {
        "paperharvest=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    cli::run().await
}
