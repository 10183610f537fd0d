//! CLI entry point for the noema daemon.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use noema_contradiction::HeuristicClassifier;
use noema_core::config::NoemaConfig;
use noema_core::{AlertEvent, GroupId};
use noema_graph::{GraphClient, GraphStore, MemoryGraphStore};
use noema_jobs::JobQueue;
use noema_salience::SalienceEngine;

use noema_daemon::pipeline::{CognitiveService, Episode, SentenceExtractor};
use noema_daemon::scheduler::DecayScheduler;

#[derive(Parser)]
#[command(name = "noema")]
#[command(about = "Belief graph maintenance: contradictions, salience and decay")]
struct Cli {
    /// Config file prefix (default: noema).
    #[arg(short, long, default_value = "noema", global = true)]
    config: String,

    /// Use an in-process graph instead of Neo4j.
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the job queue and decay scheduler until Ctrl-C.
    ///
    /// Episodes are read from stdin, one per line, as `<group>\t<text>`.
    Serve,
    /// Like `serve`, and also print every alert event to stdout as JSON.
    Alerts,
    /// Run one decay cycle and print its stats as JSON.
    Decay {
        /// Limit the cycle to one group.
        #[arg(short, long)]
        group: Option<String>,

        /// Nodes per batch (default: from config).
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = NoemaConfig::load(&cli.config)?;
    let store = open_store(&cli, &config).await?;

    match cli.command {
        Command::Decay { group, batch_size } => {
            let engine = SalienceEngine::new(store, config.salience.clone());
            let group = group.map(GroupId::new);
            let stats = engine
                .run_decay_cycle(
                    group.as_ref(),
                    batch_size.unwrap_or(config.decay.batch_size),
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Serve => serve(store, config, false).await?,
        Command::Alerts => serve(store, config, true).await?,
    }

    Ok(())
}

async fn open_store(cli: &Cli, config: &NoemaConfig) -> anyhow::Result<Arc<dyn GraphStore>> {
    if cli.memory {
        tracing::warn!("Using in-memory graph; nothing will be persisted");
        return Ok(Arc::new(MemoryGraphStore::new()));
    }
    let client = GraphClient::connect(&config.neo4j).await?;
    Ok(Arc::new(client))
}

async fn serve(
    store: Arc<dyn GraphStore>,
    config: NoemaConfig,
    print_alerts: bool,
) -> anyhow::Result<()> {
    let queue = Arc::new(JobQueue::new(config.queue.clone()));
    queue.start();

    let service = Arc::new(CognitiveService::new(
        store,
        queue.clone(),
        Arc::new(SentenceExtractor::default()),
        Arc::new(HeuristicClassifier::new()),
        &config,
    ));
    let scheduler = Arc::new(DecayScheduler::new(
        config.decay.clone(),
        service.salience().clone(),
    ));

    let mut events = service.alerts().subscribe();
    let alert_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => report_alert(&event, print_alerts),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Alert subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let ingest_task = {
        let service = service.clone();
        tokio::spawn(async move { ingest_stdin(&service).await })
    };
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    tracing::info!("noema serving; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    ingest_task.abort();
    scheduler_task.abort();
    let discarded = queue.shutdown().await;
    alert_task.abort();

    let stats = queue.stats();
    tracing::info!(
        discarded,
        completed = stats.completed,
        abandoned = stats.abandoned,
        "noema stopped"
    );
    Ok(())
}

async fn ingest_stdin(service: &CognitiveService) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        let Some((group, text)) = line.split_once('\t') else {
            if !line.trim().is_empty() {
                tracing::warn!(%line, "Expected <group>\\t<text>, line ignored");
            }
            continue;
        };
        let depth = service.submit_episode(Episode::new(GroupId::new(group.trim()), text.trim()));
        tracing::debug!(depth, "Episode submitted");
    }
    tracing::info!("stdin closed, no more episodes");
}

fn report_alert(event: &AlertEvent, print: bool) {
    if let AlertEvent::Raised { alert } = event {
        tracing::info!(
            alert_id = %alert.id,
            group = %alert.group_id,
            severity = ?alert.severity,
            message = %alert.message,
            "Alert"
        );
    }
    if print {
        match serde_json::to_string(event) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(error = %e, "Failed to encode alert event"),
        }
    }
}
