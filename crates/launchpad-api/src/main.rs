//! Launchpad webhook server.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use launchpad_api::{AppState, bootstrap, routes};
use launchpad_config::load_manifest;
use launchpad_core::secret::SecretStore;
use launchpad_engine::{RunDispatcher, RunHistory};
use launchpad_state::{EnvSecretStore, FileStateStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "launchpad-server")]
#[command(about = "Launchpad webhook server", long_about = None)]
struct Args {
    /// Deployment manifest
    #[arg(long, env = "LAUNCHPAD_MANIFEST", default_value = "launchpad.kdl")]
    manifest: PathBuf,

    /// Directory holding per-environment state
    #[arg(long, env = "LAUNCHPAD_STATE_DIR", default_value = ".launchpad/state")]
    state_dir: PathBuf,

    /// Directory sources are checked out into
    #[arg(long, env = "LAUNCHPAD_WORK_DIR", default_value = ".launchpad/work")]
    work_dir: PathBuf,

    /// Address to listen on
    #[arg(long, env = "LAUNCHPAD_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let manifest = load_manifest(&args.manifest)
        .with_context(|| format!("failed to load {}", args.manifest.display()))?;
    let settings = Arc::new(manifest.settings.clone());
    info!(
        environment = %settings.environment,
        repository = %settings.repository.full_name(),
        branch = %settings.branch,
        "manifest loaded"
    );

    let secrets: Arc<dyn SecretStore> = Arc::new(EnvSecretStore::new());
    let store = FileStateStore::new(&args.state_dir);
    let registry_uri = bootstrap::resolve_registry_uri(&manifest, &store).await?;

    let shutdown = CancellationToken::new();
    let orchestrator =
        bootstrap::orchestrator(&settings, &registry_uri, &args.work_dir, secrets.clone())
            .await?
            .with_cancellation(shutdown.clone());
    let dispatcher = Arc::new(RunDispatcher::new(orchestrator, Arc::new(RunHistory::new())));

    let mut state = AppState::new(settings.clone(), dispatcher.clone());
    if let Some(secret) = bootstrap::webhook_secret(&settings, secrets.as_ref()).await? {
        state = state.with_webhook_secret(secret);
    } else {
        info!("no webhook secret configured; signatures are not checked");
    }

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", args.listen);
    let listener = TcpListener::bind(args.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    shutdown.cancel();
    dispatcher.shutdown().await;
    Ok(())
}
