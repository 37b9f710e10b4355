//! # dualdb
//!
//! Binary entry point: serve, migrate or check the configured targets.

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dualdb_server::Config;

#[derive(Parser, Debug)]
#[command(name = "dualdb", version)]
#[command(about = "Cached, replicated data-access layer runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    /// Log every statement (overrides DUALDB_DB_DEBUG)
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, migrate and hold the client open until SIGINT or SIGTERM
    Serve,
    /// Apply pending schema migrations
    Migrate {
        /// Report applied and pending versions without applying anything
        #[arg(long)]
        status: bool,
    },
    /// Probe every dependency once; exits non-zero when any is unhealthy
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if cli.debug {
        config.db.debug = true;
    }

    init_tracing(&config.log_level, cli.pretty);

    tracing::info!(version = dualdb_server::VERSION, "Starting dualdb");

    match cli.command {
        Command::Serve => {
            dualdb_server::serve(config, shutdown_signal()).await?;
            tracing::info!("Shut down gracefully");
        }
        Command::Migrate { status } => {
            let outcomes = dualdb_server::migrate(&config, status).await?;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        Command::Check => {
            let report = dualdb_server::check(&config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_ready() {
                anyhow::bail!("one or more dependencies are unhealthy");
            }
        }
    }
    Ok(())
}

fn init_tracing(log_level: &str, pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if pretty {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
