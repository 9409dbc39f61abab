//! `millstock` command-line entry point.
//!
//! Lists resources, replays the offline queue and prints stock reports as
//! JSON on stdout. `watch` keeps running, replaying queued writes whenever the
//! backend comes back. Logs go to stderr (`RUST_LOG` controls verbosity).

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use millstock_core::ResourceKind;
use millstock_observability::LogFormat;

use millstock_client::screens::{DateRange, ReportsController, ScreenController};
use millstock_client::{ClientConfig, SyncCoordinator};

#[derive(Debug, Parser)]
#[command(name = "millstock", about = "Offline-first inventory dashboard client")]
struct Cli {
    /// Emit logs as JSON instead of human-readable lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a resource table with derived columns.
    List {
        /// raw-materials, finished-products, stock-movements, dispatches or stocks
        resource: ResourceKind,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Show writes waiting for replay.
    Pending { resource: ResourceKind },
    /// Show writes the backend refused during replay.
    Rejected {
        resource: ResourceKind,
        /// Forget them after printing.
        #[arg(long)]
        clear: bool,
    },
    /// Replay queued writes for every resource.
    Sync,
    /// Follow connectivity and replay queued writes until Ctrl-C.
    Watch,
    /// Stock, dispatch and yield summary over a date range.
    Report {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    millstock_observability::init_with(if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let config = ClientConfig::from_env().context("invalid MILLSTOCK_* configuration")?;
    let coordinator = Arc::new(SyncCoordinator::connect(&config)?);

    let output = match cli.command {
        Command::List { resource, from, to } => {
            let mut screen = ScreenController::new(resource, coordinator.clone());
            screen.set_date_range(DateRange::new(from, to));
            screen.load().await?;
            if let Some(banner) = screen.banner() {
                tracing::warn!("{}", banner.message());
            }
            serde_json::to_value(screen.export_rows().await?)?
        }
        Command::Pending { resource } => serde_json::to_value(coordinator.pending_writes(resource).await?)?,
        Command::Rejected { resource, clear } => {
            let rejected = serde_json::to_value(coordinator.rejected_writes(resource).await?)?;
            if clear {
                coordinator.clear_rejected(resource).await?;
            }
            rejected
        }
        Command::Sync => {
            let reports = coordinator.reconnected().await;
            if reports.is_empty() {
                tracing::info!("nothing queued");
            }
            serde_json::to_value(reports)?
        }
        Command::Watch => {
            let monitor = coordinator.watch_connectivity();
            let mut notices = coordinator.subscribe();
            tracing::info!("watching connectivity, press Ctrl-C to stop");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    notice = notices.recv() => match notice {
                        Ok(notice) => println!("{}", serde_json::to_string(&notice)?),
                        Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notice stream lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            monitor.stop().await;
            return Ok(());
        }
        Command::Report { from, to } => {
            let report = ReportsController::new(coordinator.clone())
                .with_range(DateRange::new(from, to))
                .generate()
                .await?;
            if report.degraded {
                tracing::warn!("backend unreachable; report uses cached figures");
            }
            serde_json::to_value(report)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
