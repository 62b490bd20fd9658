use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use roofline_storage::PgListingStore;
use roofline_sync::{IngestConfig, IngestOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "roofline")]
#[command(about = "Roofline listing ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, map, deduplicate and persist every enabled job once.
    Ingest {
        /// Read fixtures/<job_id>/items.json instead of calling the provider.
        #[arg(long)]
        fixtures: bool,
        /// Keep listings in memory; nothing is written to the database.
        #[arg(long)]
        memory: bool,
    },
    /// Insert country rules that are not stored yet.
    Seed {
        #[arg(long, default_value = "seeds/country_rules.yaml")]
        file: PathBuf,
    },
    /// Apply database migrations.
    Migrate,
    /// Run ingest on the configured cron schedule until interrupted.
    Schedule {
        #[arg(long)]
        fixtures: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Ingest {
        fixtures: false,
        memory: false,
    }) {
        Commands::Ingest { fixtures, memory } => {
            let outcome = roofline_sync::run_ingest(
                &config,
                IngestOptions {
                    use_fixtures: fixtures,
                    in_memory: memory,
                },
            )
            .await?;
            let totals = &outcome.summary.totals;
            println!(
                "ingest complete: run_id={} jobs={} failed={} new={} duplicates={} skipped={} reports={}",
                outcome.summary.run_id,
                totals.jobs,
                totals.failed_jobs,
                totals.new_records,
                totals.duplicates,
                totals.skipped,
                outcome.reports_dir.display()
            );
        }
        Commands::Seed { file } => {
            let store = connect(&config).await?;
            store.migrate().await.context("applying migrations")?;
            let summary = roofline_sync::seed_country_rules_from_file(&store, &file).await?;
            println!(
                "seed complete: inserted={} skipped={}",
                summary.inserted, summary.skipped
            );
        }
        Commands::Migrate => {
            let store = connect(&config).await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Schedule { fixtures } => {
            let options = IngestOptions {
                use_fixtures: fixtures,
                in_memory: false,
            };
            // Surface configuration problems now rather than at the first tick.
            roofline_sync::JobsFile::load(&config.jobs_file).await?;
            roofline_sync::build_pipeline(&config, options).await?;
            let Some(mut sched) = roofline_sync::maybe_build_scheduler(&config, options).await?
            else {
                bail!("scheduler is disabled; set ROOFLINE_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.ingest_cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}

async fn connect(config: &IngestConfig) -> Result<PgListingStore> {
    let url = config.require_database_url()?;
    PgListingStore::connect(url)
        .await
        .context("connecting to the listing database")
}
