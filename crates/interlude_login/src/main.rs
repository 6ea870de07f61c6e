use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use interlude_login::{LoginConfig, LoginServer, MemoryAccountStore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "login_server", about = "Interlude login server")]
struct Args {
    /// Path to the YAML configuration.
    #[arg(long, default_value = "login.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = if args.config.exists() {
        match LoginConfig::load(&args.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {e:#}", args.config.display());
                return ExitCode::FAILURE;
            }
        }
    } else {
        LoginConfig::default()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !args.config.exists() {
        warn!(path = %args.config.display(), "config file not found, using defaults");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: LoginConfig) -> anyhow::Result<()> {
    if !config.database.url.is_empty() {
        warn!("database-backed account store is provided by the deployment; using memory store");
    }
    let accounts = Arc::new(MemoryAccountStore::new());

    let server = LoginServer::spawn(config, accounts).await?;

    wait_for_signal().await;
    info!("shutdown signal received");
    server.shutdown().await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
