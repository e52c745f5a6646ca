use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use gamepilot_lib::commands;
use gamepilot_lib::config::load_config;
use gamepilot_lib::errors::PilotResult;
use gamepilot_lib::navigation::graph::ScreenId;
use gamepilot_lib::scenario_engine::engine::{Scenario, ScenarioEngine};

#[derive(Debug, Parser)]
#[command(
    name = "gamepilot",
    version,
    about = "Screen-graph navigation and farming for windowed games"
)]
struct Cli {
    /// Path to config.toml; otherwise GAMEPILOT_CONFIG, the executable dir, then the working dir.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the screen graph.
    Screens,
    /// Print the screen currently shown.
    Identify,
    /// Navigate to a screen.
    Goto { screen: ScreenId },
    /// Farm a game mode until it finishes, hits a loop limit, or Ctrl-C.
    Run {
        #[arg(value_enum)]
        scenario: Scenario,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    gamepilot_lib::init();
    let cli = Cli::parse();

    let process_token = CancellationToken::new();
    let ctrl_c_token = process_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping");
            ctrl_c_token.cancel();
        }
    });

    let result: PilotResult<()> = async {
        let config = load_config(cli.config.as_deref())?;
        let engine = ScenarioEngine::from_config(config, process_token).await?;
        match cli.command {
            Command::Screens => {
                commands::screens(&engine);
                Ok(())
            }
            Command::Identify => commands::identify(&engine).await,
            Command::Goto { screen } => commands::go_to(&engine, screen).await,
            Command::Run { scenario } => commands::run(&engine, scenario).await.map(|_| ()),
        }
    }
    .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => ExitCode::from(130),
        Err(e) => {
            tracing::error!(error = %e, "gamepilot failed");
            ExitCode::FAILURE
        }
    }
}
