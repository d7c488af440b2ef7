#[cfg(test)]
mod tests;

use crate::app::Components;
use crate::config::credentials::missing_credentials;
use crate::config::{Config, load_config};
use crate::gateway;
use crate::queue::{DeadLetterStatus, QueueName, TaskQueue};
use crate::storage::Database;
use crate::telemetry;
use crate::worker;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Chat webhook ingestion and reply delivery pipeline")]
pub struct Cli {
    /// Path to config.json (defaults to ~/.switchboard/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook gateway and the workers
    Serve,
    /// Run the workers only
    Worker {
        /// Drain ready tasks once and exit
        #[arg(long)]
        once: bool,
    },
    /// Inspect and requeue dead letters
    Dlq {
        #[command(subcommand)]
        cmd: DlqCommands,
    },
    /// Configuration utilities
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List dead letters
    List {
        /// Filter by status (pending, requeued)
        #[arg(long, short = 's')]
        status: Option<String>,
    },
    /// Requeue a dead letter onto the reprocess queue
    Requeue { id: i64 },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate the configuration and report missing credentials
    Check,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => serve(&config).await,
        Commands::Worker { once } => run_workers(&config, once).await,
        Commands::Dlq { cmd } => match cmd {
            DlqCommands::List { status } => dlq_list(&config, status.as_deref()),
            DlqCommands::Requeue { id } => dlq_requeue(&config, id),
        },
        Commands::Config {
            cmd: ConfigCommands::Check,
        } => config_check(&config),
    }
}

async fn serve(config: &Config) -> Result<()> {
    if config.security.shared_secret.is_empty() {
        bail!(
            "security.sharedSecret is not set; configure it or export SWITCHBOARD_SHARED_SECRET"
        );
    }
    if config.tenants.is_empty() {
        warn!("no tenants configured, every webhook will be answered with 404");
    }

    let metrics = telemetry::install()?;
    let components = Components::open(config, Some(metrics))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = components.workers.spawn(&shutdown_rx);

    let state = components.gateway.clone();
    let host = config.gateway.host.clone();
    let port = config.gateway.port;
    let server_shutdown = shutdown_rx.clone();
    let mut server =
        tokio::spawn(async move { gateway::serve(state, &host, port, server_shutdown).await });

    println!(
        "switchboard {} listening on {}:{}",
        crate::VERSION,
        config.gateway.host,
        config.gateway.port
    );

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
            None
        }
        result = &mut server => Some(result),
    };

    let _ = shutdown_tx.send(true);
    let result = match finished {
        Some(result) => result,
        None => server.await,
    };
    join_workers(workers).await;
    result.context("gateway task panicked")?
}

async fn run_workers(config: &Config, once: bool) -> Result<()> {
    let components = Components::open(config, None)?;

    if once {
        for queue in [QueueName::Primary, QueueName::Reprocess] {
            let outcomes = worker::drain(&components.pipeline, queue).await?;
            println!("{}: processed {} task(s)", queue, outcomes.len());
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = components.workers.spawn(&shutdown_rx);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    println!("\nShutting down...");
    let _ = shutdown_tx.send(true);
    join_workers(workers).await;
    Ok(())
}

async fn join_workers(workers: Vec<JoinHandle<()>>) {
    let count = workers.len();
    for handle in workers {
        if let Err(e) = handle.await {
            error!("worker task failed: {}", e);
        }
    }
    info!("{} worker(s) stopped", count);
}

fn open_queue(config: &Config) -> Result<TaskQueue> {
    let db = Database::open(config.database_path()?)?;
    Ok(TaskQueue::new(Arc::new(db), &config.queue))
}

fn parse_status(status: Option<&str>) -> Result<Option<DeadLetterStatus>> {
    status
        .map(|s| {
            DeadLetterStatus::parse(s)
                .with_context(|| format!("unknown dead-letter status '{s}' (pending, requeued)"))
        })
        .transpose()
}

fn dlq_list(config: &Config, status: Option<&str>) -> Result<()> {
    let status = parse_status(status)?;
    let entries = open_queue(config)?.list_dead_letters(status)?;
    if entries.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }

    println!(
        "{:<6} {:<10} {:<12} {:<22} {:<9} {:<8} error",
        "id", "status", "tenant", "classification", "attempts", "task"
    );
    for entry in entries {
        println!(
            "{:<6} {:<10} {:<12} {:<22} {:<9} {:<8} {}",
            entry.id,
            entry.status.as_str(),
            entry.tenant_id,
            entry.classification,
            entry.attempts,
            entry.task_id,
            crate::security::preview(&entry.error_detail, 80)
        );
    }
    Ok(())
}

fn dlq_requeue(config: &Config, id: i64) -> Result<()> {
    let task_id = open_queue(config)?
        .requeue_dead_letter(id)
        .with_context(|| format!("failed to requeue dead letter {id}"))?;
    println!("Requeued dead letter {} as task {} on the reprocess queue", id, task_id);
    Ok(())
}

fn config_check(config: &Config) -> Result<()> {
    println!("Configuration is valid.");
    println!("  database: {}", config.database_path()?.display());
    println!(
        "  gateway:  {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!(
        "  workers:  {} primary, {} reprocess",
        config.workers.primary, config.workers.reprocess
    );

    let mut tenants: Vec<_> = config.tenants.iter().collect();
    tenants.sort_by_key(|(id, _)| id.as_str());
    println!("  tenants:  {}", tenants.len());
    for (id, tenant) in tenants {
        println!(
            "    {} -> {}{}{}",
            id,
            crate::tenants::normalize_domain(&tenant.domain),
            if tenant.enabled { "" } else { " (disabled)" },
            if tenant.ai_enabled { "" } else { " (ai off)" }
        );
    }

    let missing = missing_credentials(config);
    if !missing.is_empty() {
        println!("  missing credentials: {}", missing.join(", "));
    }
    Ok(())
}
