//! podbox CLI: serve the in-pod execution endpoint, or run code one-shot
//! against a freshly provisioned sandbox.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use podbox::config::Config;
use podbox::manager::PodManager;
use podbox::scheduler::KubeScheduler;
use podbox::server::{self, AppState, PythonRunner};

#[derive(Parser)]
#[command(name = "podbox")]
#[command(
    author,
    version,
    about = "Kubernetes pod sandbox orchestrator for untrusted code execution"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the execution endpoint (inside the sandbox workload)
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PODBOX_PORT", default_value = "8080")]
        port: u16,

        /// Session id reported by the health routes
        #[arg(long, env = "SESSION_ID", default_value = "unknown")]
        session_id: String,

        /// Interpreter binary for submitted code
        #[arg(long, default_value = "python3")]
        interpreter: String,
    },

    /// Provision a sandbox, execute code, print the result, and tear down
    Exec {
        /// File containing the code to run (stdin if omitted and --code unset)
        file: Option<PathBuf>,

        /// Code to run, passed inline
        #[arg(short, long, conflicts_with = "file")]
        code: Option<String>,

        /// Per-call timeout in seconds (capped by the configured session timeout)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("podbox=debug")
    } else {
        EnvFilter::new("podbox=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve {
            port,
            session_id,
            interpreter,
        } => {
            let runner = PythonRunner::with_interpreter(interpreter);
            let state = AppState::new(Arc::new(runner), session_id);
            server::run_server(port, state).await?;
        }
        Commands::Exec {
            file,
            code,
            timeout,
        } => {
            let code = read_code(file, code)?;
            exec(&code, timeout).await?;
        }
    }

    Ok(())
}

fn read_code(file: Option<PathBuf>, code: Option<String>) -> Result<String> {
    if let Some(code) = code {
        return Ok(code);
    }
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read code file: {}", path.display())),
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read code from stdin")?;
            Ok(buf)
        }
    }
}

async fn exec(code: &str, timeout: Option<u64>) -> Result<()> {
    let config = Config::load(&std::env::current_dir()?)?;
    let scheduler =
        KubeScheduler::new(&config.scheduler).context("Failed to build scheduler client")?;
    let mut manager = PodManager::new(config, Arc::new(scheduler));

    manager.start().await?;
    let outcome = manager
        .execute(code, timeout.map(std::time::Duration::from_secs))
        .await;
    // Tear down before reporting so a failed execution still cleans up.
    if let Err(e) = manager.stop().await {
        tracing::warn!("Teardown failed: {e}");
    }

    let outcome = outcome?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.success {
        anyhow::bail!(
            "execution failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}
