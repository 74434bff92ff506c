//! Wafer Sentinel - wafer defect inspection service
//!
//! # Usage
//!
//! ```bash
//! # Serve the HTTP API (default command)
//! wafer-sentinel --config inspection_config.toml
//!
//! # Classify one artifact and print the JSON record
//! wafer-sentinel analyze wafer_0042.npy
//!
//! # Wipe persisted history
//! wafer-sentinel reset-db --confirm
//! ```
//!
//! # Environment Variables
//!
//! - `WAFER_CONFIG`: Path to the TOML config (when `--config` is not given)
//! - `WAFER_SERVER_ADDR`: HTTP bind address override
//! - `WAFER_CORS_ORIGINS`: Comma-separated allowed origins
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wafer_sentinel::api::{self, ApiState};
use wafer_sentinel::background::DigestJob;
use wafer_sentinel::config::{self, InspectionConfig};
use wafer_sentinel::storage::{InMemoryWaferStore, ProcessLock, SledWaferStore, WaferRepository};
use wafer_sentinel::{ArtifactInput, ArtifactKind, ClassifierSet, InspectionCoordinator, NotificationService, WaferContext};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "wafer-sentinel")]
#[command(about = "Wafer defect inspection and fab analytics service")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (default: $WAFER_CONFIG, then ./inspection_config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory from the config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long, env = "WAFER_SERVER_ADDR", global = true)]
    addr: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and background jobs (default)
    Serve,

    /// Classify a single artifact and print the resulting record as JSON
    Analyze {
        /// Path to a `.npy` wafer map or a wafer photo
        file: PathBuf,
        /// Artifact kind (grid or photo); inferred from the extension when omitted
        #[arg(long)]
        kind: Option<ArtifactKind>,
        #[arg(long)]
        lot_id: Option<String>,
        #[arg(long)]
        tool_id: Option<String>,
    },

    /// Delete every persisted wafer record
    ResetDb {
        /// Required, this cannot be undone
        #[arg(long)]
        confirm: bool,
    },
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(args: &CliArgs) -> Result<InspectionConfig> {
    let mut cfg = match &args.config {
        Some(path) => InspectionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => InspectionConfig::load(),
    };
    if let Some(dir) = &args.data_dir {
        cfg.storage.data_dir = dir.clone();
    }
    if let Some(addr) = &args.addr {
        cfg.server.addr = addr.clone();
    }
    Ok(cfg)
}

// ============================================================================
// Task Supervision
// ============================================================================

/// Long-running tasks owned by `serve`.
#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    DigestJob,
}

impl TaskName {
    fn as_str(self) -> &'static str {
        match self {
            TaskName::HttpServer => "http-server",
            TaskName::DigestJob => "digest-job",
        }
    }
}

type Tasks = JoinSet<Result<TaskName>>;

fn spawn_http_server(tasks: &mut Tasks, listener: tokio::net::TcpListener, app: Router, shutdown: CancellationToken) {
    tasks.spawn(async move {
        let task = TaskName::HttpServer;
        info!(task = task.as_str(), "Accepting connections");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server stopped unexpectedly")?;
        info!(task = task.as_str(), "Drained in-flight requests");
        Ok(task)
    });
}

fn spawn_digest_job(tasks: &mut Tasks, job: DigestJob, shutdown: CancellationToken) {
    tasks.spawn(async move {
        job.run(shutdown).await;
        Ok(TaskName::DigestJob)
    });
}

/// Wait on every task. The first error or panic cancels the others and is
/// returned once they have been told to stop.
async fn run_supervisor(tasks: &mut Tasks, shutdown: CancellationToken) -> Result<()> {
    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok(Ok(task)) => {
                info!(task = task.as_str(), "Task finished");
                continue;
            }
            Ok(Err(e)) => e,
            Err(join_err) => anyhow::anyhow!("Task panicked: {join_err}"),
        };
        error!("Shutting down after task failure: {:#}", failure);
        shutdown.cancel();
        return Err(failure);
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn serve(cfg: InspectionConfig) -> Result<()> {
    let _process_lock = ProcessLock::acquire(&cfg.storage.data_dir).context("Failed to acquire process lock")?;

    let store: Arc<dyn WaferRepository> = Arc::new(
        SledWaferStore::open(cfg.storage.data_dir.join("wafers.db")).context("Failed to open wafer store")?,
    );
    let classifiers = ClassifierSet::load(&cfg.models).context("Failed to load classifiers")?;
    let notifier = Arc::new(
        NotificationService::load(cfg.notifications.clone(), store.clone())
            .context("Invalid notification config")?,
    );
    let coordinator = Arc::new(InspectionCoordinator::new(&cfg, classifiers, store.clone(), notifier.clone()));

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping");
                on_signal.cancel();
            }
            Err(e) => warn!("Ctrl-C handler unavailable: {}", e),
        }
    });

    let state = ApiState::new(&cfg, coordinator, notifier.clone(), shutdown.clone());
    let app = api::create_app(state, &cfg.server);
    let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", cfg.server.addr))?;
    info!(addr = %cfg.server.addr, backend = store.backend_name(), "HTTP API listening");

    let mut tasks = Tasks::new();
    spawn_http_server(&mut tasks, listener, app, shutdown.clone());
    spawn_digest_job(&mut tasks, DigestJob::new(notifier, store), shutdown.clone());

    run_supervisor(&mut tasks, shutdown).await
}

async fn analyze(
    cfg: InspectionConfig,
    file: PathBuf,
    kind: Option<ArtifactKind>,
    lot_id: Option<String>,
    tool_id: Option<String>,
) -> Result<()> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let kind = match kind.or_else(|| ArtifactKind::from_file_name(&name)) {
        Some(kind) => kind,
        None => bail!("Cannot infer artifact kind for {name}; pass --kind grid|photo"),
    };
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    // One-shot runs never touch the server's data directory
    let store: Arc<dyn WaferRepository> = Arc::new(InMemoryWaferStore::new());
    let notifier = Arc::new(NotificationService::new(Default::default(), store.clone())?);
    let classifiers = ClassifierSet::load(&cfg.models)?;
    let coordinator = InspectionCoordinator::new(&cfg, classifiers, store, notifier);

    let context = WaferContext {
        lot_id,
        tool_id,
        ..WaferContext::default()
    };
    let record = coordinator.inspect(ArtifactInput::new(name, kind, bytes), context).await;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn reset_db(cfg: &InspectionConfig, confirm: bool) -> Result<()> {
    if !confirm {
        bail!("reset-db deletes all wafer history; re-run with --confirm");
    }
    let _lock = ProcessLock::acquire(&cfg.storage.data_dir).context("Refusing to reset while the server is running")?;
    let store = SledWaferStore::open(cfg.storage.data_dir.join("wafers.db"))?;
    let before = store.count()?;
    store.clear()?;
    warn!(removed = before, data_dir = %cfg.storage.data_dir.display(), "Wafer history wiped");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let cfg = load_config(&args)?;
    config::init(cfg.clone());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg).await,
        Command::Analyze {
            file,
            kind,
            lot_id,
            tool_id,
        } => analyze(cfg, file, kind, lot_id, tool_id).await,
        Command::ResetDb { confirm } => reset_db(&cfg, confirm),
    }
}
