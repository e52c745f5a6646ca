//! Handlers behind the CLI subcommands.

use tokio::sync::broadcast::error::RecvError;

use crate::errors::PilotResult;
use crate::navigation::graph::{ScreenGraph, ScreenId};
use crate::scenario_engine::engine::{Scenario, ScenarioEngine};
use crate::scenario_engine::event_bus::EventBus;
use crate::scenarios::farming::RunSummary;

/// One line per screen: id, parent and outgoing transitions.
pub fn describe_screens(graph: &ScreenGraph) -> Vec<String> {
    graph
        .screens()
        .map(|screen| {
            let targets: Vec<String> =
                screen.transitions.iter().map(|t| t.target.to_string()).collect();
            let parent = screen.parent.map(|p| format!(" (in {p})")).unwrap_or_default();
            if targets.is_empty() {
                format!("{}{parent}", screen.id)
            } else {
                format!("{}{parent} -> {}", screen.id, targets.join(", "))
            }
        })
        .collect()
}

pub fn screens(engine: &ScenarioEngine) {
    for line in describe_screens(engine.graph()) {
        println!("{line}");
    }
}

pub async fn identify(engine: &ScenarioEngine) -> PilotResult<()> {
    match engine.identify().await? {
        Some(id) => println!("{id}"),
        None => println!("unknown"),
    }
    Ok(())
}

pub async fn go_to(engine: &ScenarioEngine, target: ScreenId) -> PilotResult<()> {
    let reached = engine.go_to(target).await?;
    println!("{reached}");
    Ok(())
}

/// Logs every bus event as one JSON line until the bus closes.
fn spawn_event_log(events: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!(target: "gamepilot::events", "{json}"),
                    Err(e) => tracing::warn!("event serialization failed: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub async fn run(engine: &ScenarioEngine, scenario: Scenario) -> PilotResult<RunSummary> {
    let log = spawn_event_log(engine.events());
    let result = engine.run(scenario).await;
    log.abort();
    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}
