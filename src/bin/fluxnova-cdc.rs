//! fluxnova-cdc CLI: run the change-capture pipeline and the task worker.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fluxnova_cdc::cdc::{CheckpointStore, FileCheckpointStore, Pipeline, Publisher, Streams};
use fluxnova_cdc::client::{EngineClient, HistorySource};
use fluxnova_cdc::config::{CheckpointBackend, Config};
use fluxnova_cdc::db::Db;
use fluxnova_cdc::model::Watermark;
use fluxnova_cdc::shutdown::Shutdown;
use fluxnova_cdc::sink::{LogSink, RecordSink};
use fluxnova_cdc::telemetry::{TelemetryConfig, init_telemetry};
use fluxnova_cdc::worker::Dispatcher;
use fluxnova_cdc::worker::handlers::customer_service_registry;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "fluxnova-cdc",
    about = "Change data capture and external task worker for Fluxnova"
)]
struct Cli {
    /// TOML config file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll engine history and publish process/activity records
    Pipeline,
    /// Lease and handle external tasks
    Worker,
    /// Run the pipeline and the worker side by side
    Run,
    /// Check that the engine is reachable
    Ping,
    /// Inspect or move the persisted watermark
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the stored watermark
    Show,
    /// Overwrite the watermark (RFC 3339 timestamp)
    Set { watermark: String },
    /// Clear the watermark; the next poll starts from the beginning
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "fluxnova-cdc"))?;

    match cli.command {
        Command::Pipeline => {
            let shutdown = on_signal();
            run_pipeline(&config, shutdown).await
        }
        Command::Worker => {
            let shutdown = on_signal();
            run_worker(&config, shutdown).await
        }
        Command::Run => {
            let shutdown = on_signal();
            let pipeline = async {
                let result = run_pipeline(&config, shutdown.clone()).await;
                if result.is_err() {
                    // a dead pipeline must not leave the worker running
                    shutdown.trigger();
                }
                result
            };
            let (pipeline, worker) = tokio::join!(pipeline, run_worker(&config, shutdown.clone()));
            pipeline.and(worker)
        }
        Command::Ping => cmd_ping(&config).await,
        Command::Checkpoint { action } => cmd_checkpoint(&config, action).await,
    }
}

/// Trigger shutdown on ctrl-c or SIGTERM.
fn on_signal() -> Shutdown {
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        trigger.trigger();
    });
    shutdown
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            return;
        }
    }
    tokio::signal::ctrl_c().await.ok();
}

async fn connect_db(config: &Config) -> anyhow::Result<Option<Arc<Db>>> {
    let Some(url) = &config.broker.database_url else {
        return Ok(None);
    };
    let db = Db::connect(url.expose_secret())
        .await
        .context("connecting to Postgres")?;
    db.migrate().await?;
    for stream in [
        &config.broker.processes_stream,
        &config.broker.events_stream,
        &config.broker.decisions_stream,
    ] {
        db.create_queue(stream).await?;
    }
    Ok(Some(Arc::new(db)))
}

fn record_sink(db: Option<&Arc<Db>>) -> Arc<dyn RecordSink> {
    match db {
        Some(db) => Arc::clone(db) as Arc<dyn RecordSink>,
        None => {
            warn!("DATABASE_URL not set, records will only be logged");
            Arc::new(LogSink)
        }
    }
}

fn checkpoint_store(
    config: &Config,
    db: Option<&Arc<Db>>,
) -> anyhow::Result<Arc<dyn CheckpointStore>> {
    match config.pipeline.checkpoint {
        CheckpointBackend::File => Ok(Arc::new(FileCheckpointStore::new(
            config.pipeline.checkpoint_path.clone(),
        ))),
        CheckpointBackend::Postgres => match db {
            Some(db) => Ok(Arc::clone(db) as Arc<dyn CheckpointStore>),
            None => anyhow::bail!("the postgres checkpoint backend needs DATABASE_URL"),
        },
    }
}

async fn run_pipeline(config: &Config, shutdown: Shutdown) -> anyhow::Result<()> {
    let engine: Arc<dyn HistorySource> = Arc::new(EngineClient::from_config(&config.engine)?);
    let db = connect_db(config).await?;
    let checkpoints = checkpoint_store(config, db.as_ref())?;
    let publisher = Publisher::new(record_sink(db.as_ref()), Streams::from_config(&config.broker))
        .with_attempts(config.pipeline.publish_attempts);

    info!(
        engine = %config.engine.base_url,
        poll_interval_secs = config.pipeline.poll_interval.as_secs(),
        batch_size = config.pipeline.batch_size,
        "starting pipeline"
    );
    let mut pipeline = Pipeline::new(engine, publisher, checkpoints, &config.pipeline, shutdown);
    pipeline.run().await?;
    Ok(())
}

async fn run_worker(config: &Config, shutdown: Shutdown) -> anyhow::Result<()> {
    let engine = Arc::new(EngineClient::from_config(&config.engine)?);
    let db = connect_db(config).await?;
    let registry = Arc::new(customer_service_registry());

    info!(
        engine = %config.engine.base_url,
        worker_id = %config.worker.worker_id,
        "starting worker"
    );
    let dispatcher = Dispatcher::new(engine, registry, &config.worker, shutdown)
        .with_decision_sink(record_sink(db.as_ref()), config.broker.decisions_stream.clone());
    dispatcher.run().await?;

    if let Some(db) = db {
        db.close_pool().await;
    }
    Ok(())
}

async fn cmd_ping(config: &Config) -> anyhow::Result<()> {
    let engine = EngineClient::from_config(&config.engine)?;
    engine.ping().await?;
    println!("engine reachable at {}", engine.base_url());
    Ok(())
}

async fn cmd_checkpoint(config: &Config, action: CheckpointAction) -> anyhow::Result<()> {
    let db = match config.pipeline.checkpoint {
        CheckpointBackend::Postgres => connect_db(config).await?,
        CheckpointBackend::File => None,
    };
    let store = checkpoint_store(config, db.as_ref())?;
    let name = &config.pipeline.checkpoint_name;

    match action {
        CheckpointAction::Show => {
            let watermark = store.load(name).await?;
            match watermark {
                Some(wm) => println!("{name}: {wm}"),
                None => println!("{name}: never saved"),
            }
        }
        CheckpointAction::Set { watermark } => {
            let at = DateTime::parse_from_rfc3339(&watermark)
                .with_context(|| format!("invalid RFC 3339 timestamp: {watermark}"))?;
            let wm = Watermark::at(at.with_timezone(&Utc));
            store.reset(name, &wm).await?;
            println!("{name}: set to {wm}");
        }
        CheckpointAction::Reset => {
            store.reset(name, &Watermark::empty()).await?;
            println!("{name}: cleared");
        }
    }
    Ok(())
}
