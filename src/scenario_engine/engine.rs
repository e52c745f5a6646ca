use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::PilotResult;
use crate::executor::coordinator::Coordinator;
use crate::executor::input::{EnigoInput, InputDevice};
use crate::navigation::graph::{ScreenGraph, ScreenId};
use crate::navigation::identifier::ScreenIdentifier;
use crate::navigation::navigator::Navigator;
use crate::perception::ocr::TextReader;
use crate::perception::screenshot::{FrameSource, WindowCapture, WindowLocator};
use crate::perception::templates::TemplateStore;
use crate::scenario_engine::event_bus::EventBus;
use crate::scenario_engine::monitor::{InterruptMonitor, MonitorHandle};
use crate::scenario_engine::poller::Poller;
use crate::scenario_engine::state::StopReason;
use crate::scenarios::arena::ArenaHooks;
use crate::scenarios::dungeon::DungeonHooks;
use crate::scenarios::farming::{FarmingDriver, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Arena,
    Dungeon,
}

impl Scenario {
    pub fn name(self) -> &'static str {
        match self {
            Scenario::Arena => "arena",
            Scenario::Dungeon => "dungeon",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owns everything that outlives a single run: configuration, the loaded
/// screen graph and templates, and the game backends.
pub struct ScenarioEngine {
    config: AppConfig,
    graph: Arc<ScreenGraph>,
    templates: Arc<TemplateStore>,
    source: Arc<dyn FrameSource>,
    input: Arc<dyn InputDevice>,
    reader: Option<Arc<dyn TextReader>>,
    events: EventBus,
    /// Parent of every run token; cancelled on Ctrl-C.
    process_token: CancellationToken,
}

impl ScenarioEngine {
    pub fn new(
        config: AppConfig,
        graph: ScreenGraph,
        templates: TemplateStore,
        source: Arc<dyn FrameSource>,
        input: Arc<dyn InputDevice>,
        process_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            graph: Arc::new(graph),
            templates: Arc::new(templates),
            source,
            input,
            reader: None,
            events: EventBus::new(),
            process_token,
        }
    }

    /// Loads the screen graph and templates and attaches to the game window.
    pub async fn from_config(
        config: AppConfig,
        process_token: CancellationToken,
    ) -> PilotResult<Self> {
        let graph = ScreenGraph::load_dir(&config.paths.screens_dir)?;
        let templates = TemplateStore::load_dir(&config.paths.templates_dir).await?;
        tracing::info!(screens = graph.len(), templates = templates.len(), "game data loaded");

        let locator = WindowLocator::new(&config.window);
        let source = Arc::new(WindowCapture::new(locator.clone()));
        let input = Arc::new(EnigoInput::new(
            locator,
            config.input.drag_steps,
            Duration::from_millis(config.input.step_delay_ms),
        ));
        Ok(Self::new(config, graph, templates, source, input, process_token))
    }

    /// Attaches a text recognition backend for resource counters. Without
    /// one, runs are bounded by the loop limits and the in-game screens.
    pub fn with_reader(mut self, reader: Arc<dyn TextReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn graph(&self) -> &ScreenGraph {
        &self.graph
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn parts(&self, token: CancellationToken) -> (Arc<Coordinator>, Arc<ScreenIdentifier>) {
        let coordinator = Arc::new(Coordinator::new(
            self.source.clone(),
            self.input.clone(),
            Poller::new(token),
            self.config.coordinator_settings(),
        ));
        let identifier = Arc::new(ScreenIdentifier::new(
            self.graph.clone(),
            self.templates.clone(),
            self.config.navigation.threshold,
        ));
        (coordinator, identifier)
    }

    /// A navigator bound to a fresh child of the process token.
    pub fn navigator(&self) -> Navigator {
        let (coordinator, identifier) = self.parts(self.process_token.child_token());
        Navigator::new(coordinator, identifier, self.config.navigation.navigator_settings())
    }

    pub async fn identify(&self) -> PilotResult<Option<ScreenId>> {
        let nav = self.navigator();
        Ok(nav.current_screen().await?.map(|s| s.id))
    }

    pub async fn go_to(&self, target: ScreenId) -> PilotResult<ScreenId> {
        let nav = self.navigator();
        Ok(nav.go_to(target).await?.id)
    }

    /// Runs one scenario to its end, with the interrupt monitor alongside.
    pub async fn run(&self, scenario: Scenario) -> PilotResult<RunSummary> {
        let run_token = self.process_token.child_token();
        let (coordinator, identifier) = self.parts(run_token.clone());
        let nav = Navigator::new(
            coordinator.clone(),
            identifier.clone(),
            self.config.navigation.navigator_settings(),
        );

        let monitor: Option<MonitorHandle> = self.config.monitor.enabled.then(|| {
            let config = self.config.monitor.clone();
            InterruptMonitor::new(coordinator, identifier, config, self.events.clone()).spawn()
        });

        let mut driver = FarmingDriver::new(
            self.config.run.clone(),
            scenario.name(),
            self.config.paths.history_dir.as_deref(),
            self.events.clone(),
        );
        let result = match scenario {
            Scenario::Arena => {
                let config = self.config.arena.clone();
                let mut hooks = ArenaHooks::new(config, self.reader.clone(), self.events.clone());
                driver.run(&nav, &mut hooks).await
            }
            Scenario::Dungeon => {
                let config = self.config.dungeon.clone();
                let mut hooks = DungeonHooks::new(config, self.reader.clone(), self.events.clone());
                driver.run(&nav, &mut hooks).await
            }
        };

        let interrupted = match monitor {
            Some(handle) => handle.stop().await,
            None => None,
        };

        match result {
            Ok(mut summary) => {
                if let Some(screen) = interrupted {
                    summary.reason = StopReason::Interrupted { screen };
                }
                tracing::info!(
                    scenario = %scenario,
                    run_id = %summary.run_id,
                    rounds = summary.rounds,
                    reason = ?summary.reason,
                    elapsed_ms = summary.elapsed_ms,
                    "run ended"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(scenario = %scenario, error = %e, "run failed");
                Err(e)
            }
        }
    }
}
