//! GitHub Key Sync Agent
//!
//! Periodically fetches a GitHub user's public SSH keys and reconciles them
//! into an authorized_keys file. Keys written by the agent carry the
//! `synced from github` annotation; every other line is left alone.
//!
//! # Usage
//! ```bash
//! # Sync every minute, and on SIGHUP
//! github-key-sync octocat
//!
//! # Sync once (e.g. from cron) and exit non-zero on failure
//! github-key-sync --once --authorized-keys-path /home/deploy/.ssh/authorized_keys octocat
//!
//! # Show what would change
//! github-key-sync --once --dry-run octocat
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use github_key_sync::config::{Args, LogFormat, OutputFormat};
use github_key_sync::fetcher::GithubKeyFetcher;
use github_key_sync::scheduler::{self, Trigger, TriggerQueue};
use github_key_sync::{KeySync, SyncReport, WriteMode};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let path = args
        .resolve_authorized_keys_path()
        .context("Could not determine home directory, pass --authorized-keys-path")?;

    info!(
        user = %args.username,
        path = %path.display(),
        interval = ?args.sync_interval,
        once = args.once,
        dry_run = args.dry_run,
        "Starting GitHub key sync"
    );

    let fetcher = GithubKeyFetcher::new(&args.key_url).context("Failed to build HTTP client")?;
    let mode = if args.dry_run {
        WriteMode::DryRun
    } else {
        WriteMode::Write
    };
    let sync = KeySync::new(fetcher, &args.username, path).with_mode(mode);

    if args.once {
        match sync.run_once().await {
            Ok(report) => {
                print_report(&report, args.output)?;
                return Ok(());
            }
            Err(e) => {
                error!(kind = %e.kind(), error = %e.chain(), "sync failed");
                std::process::exit(1);
            }
        }
    }

    let (queue, triggers) = TriggerQueue::channel();
    queue.trigger(Trigger::Startup);

    let ticker = scheduler::spawn_ticker(queue.clone(), args.sync_interval);
    let reload =
        scheduler::spawn_reload_listener(queue.clone()).context("Failed to listen for SIGHUP")?;
    drop(queue);

    scheduler::run_worker(
        triggers,
        |trigger| {
            let sync = &sync;
            async move {
                match sync.run_once().await {
                    Ok(report) => info!(
                        trigger = %trigger,
                        added = report.added.len(),
                        removed = report.removed.len(),
                        written = report.written,
                        "Sync cycle complete"
                    ),
                    Err(e) => error!(
                        trigger = %trigger,
                        kind = %e.kind(),
                        error = %e.chain(),
                        "sync failed"
                    ),
                }
            }
        },
        scheduler::shutdown_signal(),
    )
    .await;

    ticker.abort();
    reload.abort();
    info!("GitHub key sync stopped");

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn print_report(report: &SyncReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Text => println!("{}", report.display()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to serialize report")?
        ),
    }
    Ok(())
}
