use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use ward_core::runtime_config::{load_runtime_config, RuntimeConfigLayer};

mod config;
mod server;
mod tools;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long)]
    workspace_root: Option<PathBuf>,
    #[arg(long)]
    policy_path: Option<PathBuf>,
    #[arg(long)]
    profile: Option<String>,
    /// Present-means-true; absence defers to env/config/default rather
    /// than forcing false.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    strict: bool,
    #[arg(long)]
    config: Option<PathBuf>,
}

use tracing_subscriber::{fmt, EnvFilter};

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::ServerTransportConfig::from_env();

    init_logging(&cfg.log_level);

    let cli_layer = RuntimeConfigLayer {
        workspace_root: args.workspace_root.clone(),
        policy_path: args.policy_path.clone(),
        profile: args.profile.clone(),
        strict: if args.strict { Some(true) } else { None },
    };
    let runtime = load_runtime_config(cli_layer, args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("invalid runtime configuration: {e}"))?;

    tracing::info!(
        event = "server_start",
        workspace_root = ?runtime.workspace_root,
        profile = %runtime.profile,
        strict = runtime.strict,
        config = ?cfg,
    );

    server::Server::run(runtime, cfg).await
}
