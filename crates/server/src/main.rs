//! Foundry Server
//!
//! Axum server and CLI around the agent-creation pipeline in
//! crates/core. `serve` exposes the pipeline over HTTP, `run` drives one
//! requirements file through every stage, `schema` prints input schemas.

mod api;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use foundry_core::config::FoundryConfig;
use foundry_core::skills::artifact_registry::{DeploymentConfig, GenerationOptions};
use foundry_core::state::CreationRequest;
use foundry_core::swarm::{CancelToken, PipelineOrchestrator};

use api::AppState;

#[derive(Parser, Clone)]
#[command(author, version, about = "Foundry - agent creation pipeline")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Foundry server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,
    },
    /// Run one requirements file through every stage (CLI mode, no server)
    Run {
        /// JSON file with the creation requirements
        requirements: PathBuf,
        /// Target environment
        #[arg(short, long, default_value = "staging")]
        environment: String,
        /// Skip generating the agent's test file
        #[arg(long)]
        no_tests: bool,
    },
    /// Print JSON schemas for requirements, generation options and deployment config
    Schema,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("foundry_server=info,foundry_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load `.foundry/.env` (if present), then the config file
async fn load_config() -> anyhow::Result<FoundryConfig> {
    let env_path = Path::new(".foundry/.env");
    if env_path.exists() {
        if let Err(e) = dotenvy::from_path(env_path) {
            tracing::warn!("Failed to load {:?}: {}", env_path, e);
        }
    }
    FoundryConfig::load().await
}

async fn run_server(config: FoundryConfig, host: IpAddr, port: u16) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let shutdown = state.shutdown.clone();
    let app = api::router(state);

    let addr = SocketAddr::new(host, port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Foundry server running at http://{}", addr);
    tracing::info!("Pipeline: /api/v1/concepts, /concepts/:id/generate, /generations/:id/deploy");
    tracing::info!("Status:   /api/v1/status, /api/v1/events, /api/v1/requests/:id");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down, cancelling in-flight stages");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

async fn run_once(
    config: FoundryConfig,
    requirements: &Path,
    environment: String,
    include_tests: bool,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(requirements)
        .await
        .with_context(|| format!("Failed to read {:?}", requirements))?;
    let value = serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {:?}", requirements))?;
    let request = CreationRequest::from_json(value)
        .with_context(|| format!("Invalid requirements in {:?}", requirements))?;

    let orchestrator = PipelineOrchestrator::from_config(&config)?;
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });

    let options = GenerationOptions {
        include_tests,
        ..Default::default()
    };
    let run = orchestrator
        .run_to_completion(request, options, DeploymentConfig::new(&environment), &cancel)
        .await?;

    println!("{}", serde_json::to_string_pretty(&run)?);
    if !run.deployment.is_successful {
        anyhow::bail!(
            "Deployment {} failed post-deployment verification",
            run.deployment.deployment_id
        );
    }
    tracing::info!(
        "Deployed {} to {}",
        run.conceptualization.concept.name,
        run.deployment.receipt.location
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config().await?;

    match args.command.unwrap_or(CliCommand::Serve {
        port: 8080,
        host: IpAddr::from([127, 0, 0, 1]),
    }) {
        CliCommand::Serve { port, host } => run_server(config, host, port).await,
        CliCommand::Run {
            requirements,
            environment,
            no_tests,
        } => run_once(config, &requirements, environment, !no_tests).await,
        CliCommand::Schema => {
            println!("{}", serde_json::to_string_pretty(&api::input_schemas())?);
            Ok(())
        }
    }
}
