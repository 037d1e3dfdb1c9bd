mod brain;
mod face;
mod hands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use screen_guide::{ElementProbe, HistoryLog, NoProbe, Orchestrator, Services, Timings};

use brain::{Brain, DEFAULT_POINTER_PROMPT, DEFAULT_REASONER_PROMPT, ServiceConfig};
use face::AppState;
use hands::{FrameStore, UiaProbe};

const RESPONSES_ENDPOINT: &str = "https://api.openai.com/v1/responses";

/// On-screen guidance daemon.
#[derive(Parser, Debug)]
#[command(name = "agent", version, about)]
struct Args {
    /// First port to try for the shell endpoint.
    #[arg(long, env = "GUIDE_PORT", default_value_t = 3000)]
    port: u16,

    #[arg(long, env = "REASONER_ENDPOINT", default_value = RESPONSES_ENDPOINT)]
    reasoner_endpoint: String,

    #[arg(long, env = "REASONER_MODEL", default_value = "gpt-5.2")]
    reasoner_model: String,

    /// File holding the reasoner instructions.
    #[arg(long, env = "REASONER_PROMPT_PATH")]
    reasoner_prompt: Option<PathBuf>,

    #[arg(long, env = "CUA_ENDPOINT", default_value = RESPONSES_ENDPOINT)]
    pointer_endpoint: String,

    #[arg(long, env = "CUA_MODEL", default_value = "computer-use-preview")]
    pointer_model: String,

    /// File holding the pointer instructions.
    #[arg(long, env = "CUA_PROMPT_PATH")]
    pointer_prompt: Option<PathBuf>,

    /// Environment declared to the pointer's computer tool.
    #[arg(long, env = "CUA_ENVIRONMENT", default_value = "windows")]
    environment: String,

    /// UI-automation helper URL; element highlights are off without it.
    #[arg(long, env = "UIA_PROBE_URL")]
    probe_url: Option<String>,

    #[arg(long, env = "GUIDE_HISTORY_FILE")]
    history_file: Option<PathBuf>,

    /// Keep history in memory only.
    #[arg(long)]
    no_history: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,screen_guide=debug")),
        )
        .init();

    let args = Args::parse();
    let timings = Timings::default();

    let reasoner = ServiceConfig::new(
        args.reasoner_endpoint,
        args.reasoner_model,
        "REASONER_API_KEY",
        args.reasoner_prompt.as_deref(),
        DEFAULT_REASONER_PROMPT,
    )?;
    let pointer = ServiceConfig::new(
        args.pointer_endpoint,
        args.pointer_model,
        "CUA_API_KEY",
        args.pointer_prompt.as_deref(),
        DEFAULT_POINTER_PROMPT,
    )?;
    let brain = Brain::new(reasoner, pointer, args.environment, timings.pointer_backoff);

    let frames = Arc::new(FrameStore::new());
    let probe: Arc<dyn ElementProbe> = match args.probe_url {
        Some(url) => Arc::new(UiaProbe::new(url)),
        None => {
            warn!("no element probe configured; highlights disabled");
            Arc::new(NoProbe)
        }
    };

    let history = if args.no_history {
        HistoryLog::in_memory()
    } else {
        let path = args.history_file.unwrap_or_else(HistoryLog::default_path);
        HistoryLog::persistent(&path)
            .with_context(|| format!("opening history at {}", path.display()))?
    };

    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (shell_tx, _) = broadcast::channel(64);

    face::start_server(
        args.port,
        AppState {
            inbound: inbound_tx.clone(),
            shell: shell_tx.clone(),
            frames: frames.clone(),
        },
    )
    .await?;

    let services = Services {
        proposer: Arc::new(brain),
        frames,
        probe,
    };
    let orchestrator = Orchestrator::new(services, history, shell_tx, inbound_tx, timings);
    info!("ready; waiting for a display and a question");

    tokio::select! {
        _ = orchestrator.run(inbound_rx) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("listening for ctrl-c")?;
            info!("shutting down");
        }
    }

    Ok(())
}
