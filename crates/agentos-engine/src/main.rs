use agentos_core::TaskSubmission;
use agentos_engine::{run_batch, Engine, EngineConfig, LogConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "agentos-engine",
    about = "AgentOS agent engine: task scheduling and orchestration"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentos.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until interrupted
    Serve,
    /// Submit tasks from a JSON file and print their outcomes
    Run {
        /// JSON array of task submissions
        tasks: PathBuf,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    /// Print the effective configuration
    Config,
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = EngineConfig::load(&cli.config)?;
    config.apply_env();
    config.validate()?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Serve => {
            let engine = Engine::builder(config).with_builtins().build()?;
            engine.start().await?;
            info!(
                endpoint = %engine.config().bus.endpoint,
                slots = engine.config().scheduler.slots,
                "Agent engine running, waiting for shutdown signal"
            );
            shutdown_signal().await;
            info!("Shutdown signal received");
            engine.stop().await;
            let status = engine.status().await;
            info!(status = %status, "Final status");
        }
        Commands::Run {
            tasks,
            timeout_secs,
        } => {
            let raw = tokio::fs::read_to_string(&tasks).await.map_err(|e| {
                anyhow::anyhow!("Failed to read tasks file '{}': {}", tasks.display(), e)
            })?;
            let submissions: Vec<TaskSubmission> = serde_json::from_str(&raw)?;

            let engine = Engine::builder(config).with_builtins().build()?;
            engine.start().await?;
            let report = run_batch(&engine, submissions, Duration::from_secs(timeout_secs)).await;
            engine.stop().await;

            let report = report?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
