//! Launchpad CLI tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use url::Url;

mod commands;

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(about = "Launchpad deployment orchestrator", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Deployment manifest
    #[arg(long, global = true, env = "LAUNCHPAD_MANIFEST", default_value = "launchpad.kdl")]
    pub manifest: PathBuf,

    /// Directory holding per-environment state
    #[arg(long, global = true, env = "LAUNCHPAD_STATE_DIR", default_value = ".launchpad/state")]
    pub state_dir: PathBuf,

    /// Control-plane endpoint; overrides `settings.provider-endpoint`
    #[arg(long, global = true, env = "LAUNCHPAD_PROVIDER_ENDPOINT")]
    pub provider_endpoint: Option<Url>,

    /// Bearer token for the control plane
    #[arg(long, global = true, env = "LAUNCHPAD_PROVIDER_TOKEN", hide_env_values = true)]
    pub provider_token: Option<String>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the manifest and print the resource order
    Validate,
    /// Show the changes apply would make
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create, update and delete resources to match the manifest
    Apply {
        /// Apply against an in-memory provider and leave state untouched
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every resource recorded in state
    Destroy {
        /// Confirm the destroy
        #[arg(long)]
        yes: bool,
    },
    /// Re-read recorded resources from the provider
    Refresh,
    /// Run the pipeline once for a branch
    Run {
        /// Branch to build; defaults to `settings.branch`
        #[arg(long)]
        branch: Option<String>,
        /// Revision to check out; defaults to the branch head
        #[arg(long)]
        revision: Option<String>,
        /// Directory sources are checked out into
        #[arg(long, env = "LAUNCHPAD_WORK_DIR", default_value = ".launchpad/work")]
        work_dir: PathBuf,
    },
    /// Roll an image out to the configured service
    Deploy {
        /// Full image URI
        image: String,
        /// Container to update; defaults to `settings.container`
        #[arg(long)]
        container: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.log_format);

    let ctx = || commands::Context::load(&cli.global);
    match cli.command {
        Commands::Validate => commands::validate(&cli.global.manifest)?,
        Commands::Plan { json } => commands::infra::plan(&ctx()?, json).await?,
        Commands::Apply { dry_run } => commands::infra::apply(&ctx()?, dry_run).await?,
        Commands::Destroy { yes } => commands::infra::destroy(&ctx()?, yes).await?,
        Commands::Refresh => commands::infra::refresh(&ctx()?).await?,
        Commands::Run {
            branch,
            revision,
            work_dir,
        } => commands::run::run(&ctx()?, branch, revision, &work_dir).await?,
        Commands::Deploy { image, container } => {
            commands::deploy::deploy(&ctx()?, &image, container).await?
        }
    }

    Ok(())
}
