use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lms_feed::{records, DateResolver};
use lms_sync::{build_scheduler, importer_from_config, ImporterConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lms-cli")]
#[command(about = "Imports LMS training events into the content repository")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one import and print the summary.
    Import,
    /// Run imports on the configured cron schedule until Ctrl-C.
    Schedule,
    /// Validate a local feed file without touching the repository.
    Check { path: PathBuf },
    /// Print the UID index of events under the target path.
    Index,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lms=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Import) {
        Commands::Import => {
            let summary = lms_sync::run_import_once_from_env().await?;
            println!("{}", summary.summary_line());
            if let Some(dir) = &summary.reports_dir {
                println!("reports: {dir}");
            }
        }
        Commands::Schedule => {
            let config = ImporterConfig::from_env()?;
            if !config.scheduler_enabled {
                bail!("scheduler disabled; set LMS_SCHEDULER_ENABLED=true to run on a schedule");
            }
            let schedule = config.schedule.clone();
            let allow_concurrent = config.allow_concurrent;
            let importer = Arc::new(importer_from_config(config)?);

            let mut sched = build_scheduler(importer, &schedule, allow_concurrent).await?;
            sched.start().await.context("starting scheduler")?;
            info!(%schedule, allow_concurrent, "scheduler running");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down scheduler");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Check { path } => {
            let config = ImporterConfig::from_env()?;
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let dates = DateResolver::new(config.timezone);

            let mut checked = 0usize;
            let mut problems = 0usize;
            for (line, parsed) in records(&text) {
                checked += 1;
                let problem = match parsed {
                    Err(err) => Some(err.to_string()),
                    Ok(record) => dates
                        .resolve_schedule(&record)
                        .err()
                        .map(|err| format!("{} ({})", err, record.uid.trim())),
                };
                if let Some(problem) = problem {
                    problems += 1;
                    println!("line {line}: {problem}");
                }
            }

            println!("{checked} records checked, {problems} problem(s)");
            if problems > 0 {
                bail!("{} contains {problems} invalid record(s)", path.display());
            }
        }
        Commands::Index => {
            let importer = importer_from_config(ImporterConfig::from_env()?)?;
            let index = importer.build_index().await;
            println!("index {} ({} entries)", index.status(), index.len());
            for (uid, path) in index.sorted_entries() {
                println!("{uid}\t{path}");
            }
        }
    }

    Ok(())
}
