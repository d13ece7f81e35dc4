mod face;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use page_pilot::{Agent, BrowserSession, EventSink, OpenAiModel, PilotConfig, TaskEnd};
use tokio::sync::Mutex;

#[derive(Debug, Parser)]
#[command(name = "agent", about = "Drive a Chrome page toward a goal, one decision at a time")]
struct Cli {
    /// Show the browser window.
    #[arg(long)]
    headed: bool,

    /// Port for the local control page (falls back to the next nine).
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Model name, overriding PILOT_MODEL.
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    max_steps: Option<usize>,

    /// Run this task once and exit instead of serving the control page.
    #[arg(long)]
    task: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = PilotConfig::from_env().context("loading configuration")?;
    if cli.headed {
        config.browser.headless = false;
    }
    if let Some(model) = cli.model {
        config.model.model = model;
    }
    if let Some(steps) = cli.max_steps {
        config.agent.max_steps = steps;
    }

    let model = Arc::new(OpenAiModel::new(config.model.clone())?);
    let session = BrowserSession::new(config.browser.clone());
    let events = EventSink::default();
    let mut agent = Agent::new(session, model, config, events.clone());

    if let Some(task) = cli.task {
        let outcome = agent.run_task(&task).await;
        agent.cleanup();
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        if outcome.end != TaskEnd::Done {
            std::process::exit(1);
        }
        return Ok(());
    }

    let agent = Arc::new(Mutex::new(agent));
    let addr = face::serve(agent.clone(), events, cli.port).await?;
    tracing::info!(%addr, "control page ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    agent.lock().await.cleanup();
    Ok(())
}
