use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kestrel_domain::config::Config;
use kestrel_gateway::api;
use kestrel_gateway::state::AppState;
use kestrel_providers::OpenAiCompatClient;

#[derive(Parser)]
#[command(name = "kestrel", about = "Voice-first coding assistant orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Arc::new(Config::from_env());
            run_server(config).await
        }
        Some(Command::Version) => {
            println!("kestrel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kestrel_gateway=debug")),
        )
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(
        workdir = %config.workdir_root.display(),
        llm = %config.llm.base_url,
        model = %config.llm.model,
        "Kestrel starting"
    );

    let provider =
        Arc::new(OpenAiCompatClient::new(&config.llm).context("building LLM client")?);

    // STT is injected by deployments that bundle an engine; the bare
    // server runs text-only and answers 503 on the audio endpoint.
    let state = AppState::new(config.clone(), provider, None).context("building app state")?;

    let app = api::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down all agent sessions");
    state.sessions.shutdown_all();
}
