use anyhow::Context;
use clap::Parser;
use services::{AppServices, Clock};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod db_url;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("coursehub: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.log.as_deref())?;

    // Open + migrate SQLite at startup so core/services stay storage-agnostic.
    let db_url = db_url::normalize_sqlite_url(&cli.db_url);
    db_url::prepare_sqlite_file(&db_url)?;
    let app = AppServices::new_sqlite(&db_url, Clock::default())
        .await
        .with_context(|| format!("failed to open database {db_url}"))?;
    tracing::debug!(db = %db_url, "services ready");

    commands::dispatch(cli.command, &app).await
}

fn init_tracing(directives: Option<&str>) -> anyhow::Result<()> {
    let filter = match directives {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter: {directives}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    // stdout carries JSON results, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
