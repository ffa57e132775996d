mod dom;
mod face;
mod hands;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use browser_agent::{
    AgentConfig, AgentContext, Brain, Orchestrator, SecurityGate, StdinConfirmer, WorkerLimits, logging,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Autonomous browser agent. Tasks are queued from the web UI (or the
/// command line) and carried out in Chrome, one tab per worker.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of tasks that may run at the same time.
    #[arg(long)]
    workers: Option<usize>,

    /// Step budget per task.
    #[arg(long)]
    max_steps: Option<usize>,

    /// Preferred port for the web UI; the next nine are tried if it is taken.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Run Chrome without a window.
    #[arg(long)]
    headless: bool,

    /// Attach to a Chrome already listening on 127.0.0.1:9222.
    #[arg(long)]
    attach: bool,

    /// Tasks to queue at startup.
    tasks: Vec<String>,
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run());
    // An abandoned confirmation prompt can still be blocked on stdin.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let mut config = AgentConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.workers = WorkerLimits::fixed(workers)?;
    }
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    config.validate()?;
    info!(
        model = %config.decision.model,
        workers = config.workers.current,
        max_steps = config.max_steps,
        "starting browser agent"
    );

    let brain = Brain::new(config.decision.clone())?;
    let gate = SecurityGate::new(Box::new(StdinConfirmer::new()));
    let ctx = AgentContext::new(config, Arc::new(brain), gate);

    let (attach, headless) = (args.attach, args.headless);
    let provider = tokio::task::spawn_blocking(move || hands::ChromeProvider::connect(attach, headless)).await??;

    let orchestrator = Arc::new(Orchestrator::new(ctx, Arc::new(provider)));
    orchestrator.start(Vec::new()).await?;

    let server_shutdown = CancellationToken::new();
    face::start_server(orchestrator.clone(), args.port, server_shutdown.clone()).await?;

    for task in args.tasks {
        let id = orchestrator.submit(task).await?;
        info!(task_id = %id, "queued from command line");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down; running tasks will finish (press Ctrl-C again to cancel them)");

    let mut stopping = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.stop().await })
    };
    tokio::select! {
        joined = &mut stopping => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!("cancelling running tasks");
            orchestrator.cancel();
            stopping.await?;
        }
    }

    server_shutdown.cancel();
    info!("agent stopped");
    Ok(())
}
