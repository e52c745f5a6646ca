//! The generic farming loop that every game mode plugs into.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::errors::PilotResult;
use crate::navigation::graph::ScreenId;
use crate::navigation::navigator::Navigator;
use crate::perception::ocr::Counter;
use crate::scenario_engine::event_bus::{EventBus, PilotEvent};
use crate::scenario_engine::history::RunHistory;
use crate::scenario_engine::loop_control::LoopController;
use crate::scenario_engine::state::{LoopConfig, RunState, StopReason};

/// Result of one round as reported by a game mode.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundOutcome {
    pub success: bool,
    /// The mode has nothing left to do; ends the run.
    pub finished: bool,
    pub detail: serde_json::Value,
}

/// Game-mode specific steps driven by [`FarmingDriver`].
#[async_trait]
pub trait FarmingHooks: Send {
    fn name(&self) -> &'static str;

    /// Screen every round starts from.
    fn home_screen(&self) -> ScreenId;

    /// Runs once, on the home screen, before the first round.
    async fn prepare(&mut self, _nav: &Navigator) -> PilotResult<()> {
        Ok(())
    }

    /// Remaining resources (tokens, keys). `None` when unknown.
    async fn remaining(&mut self, _nav: &Navigator) -> PilotResult<Option<Counter>> {
        Ok(None)
    }

    async fn run_round(&mut self, nav: &Navigator, round: u32) -> PilotResult<RoundOutcome>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scenario: String,
    pub rounds: u32,
    pub failures: u32,
    #[serde(flatten)]
    pub reason: StopReason,
    pub elapsed_ms: u64,
}

/// Repeats a mode's rounds until it finishes, a loop limit hits, or the
/// run is cancelled.
pub struct FarmingDriver {
    loop_ctrl: LoopController,
    max_errors: u32,
    history: RunHistory,
    events: EventBus,
}

impl FarmingDriver {
    pub fn new(
        loop_config: LoopConfig,
        scenario: &str,
        history_dir: Option<&Path>,
        events: EventBus,
    ) -> Self {
        let max_errors = loop_config.max_failures.unwrap_or(3).max(1);
        Self {
            loop_ctrl: LoopController::new(loop_config),
            max_errors,
            history: RunHistory::new(scenario, history_dir),
            events,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.history.run_id
    }

    fn set_state(&self, state: RunState) {
        self.events.send(PilotEvent::StateChanged { state });
    }

    /// Drives `hooks` to completion. Cancellation ends the run cleanly with
    /// [`StopReason::Cancelled`]; other errors are returned once they repeat
    /// `max_failures` times in a row.
    pub async fn run<H: FarmingHooks>(
        &mut self,
        nav: &Navigator,
        hooks: &mut H,
    ) -> PilotResult<RunSummary> {
        match self.drive(nav, hooks).await {
            Ok(reason) => Ok(self.finish(hooks.name(), reason)),
            Err(e) if e.is_cancelled() => {
                let rounds = self.loop_ctrl.rounds();
                tracing::info!(scenario = hooks.name(), rounds, "run cancelled");
                self.set_state(RunState::Cancelled);
                Ok(self.finish(hooks.name(), StopReason::Cancelled))
            }
            Err(e) => {
                let detail = serde_json::json!({ "error": e.to_string() });
                self.history.record("end", None, Some(detail));
                self.set_state(RunState::Failed { error: e.to_string() });
                Err(e)
            }
        }
    }

    async fn drive<H: FarmingHooks>(
        &mut self,
        nav: &Navigator,
        hooks: &mut H,
    ) -> PilotResult<StopReason> {
        let scenario = hooks.name().to_string();
        self.set_state(RunState::Preparing { scenario: scenario.clone() });
        tracing::info!(scenario = %scenario, run_id = %self.history.run_id, "starting run");

        let mut feed = self.events.subscribe();
        nav.go_to(hooks.home_screen()).await?;
        hooks.prepare(nav).await?;

        let mut consecutive_errors = 0u32;
        loop {
            nav.poller().check()?;
            if self.loop_ctrl.should_stop() {
                tracing::info!(rounds = self.loop_ctrl.rounds(), "loop limit reached");
                return Ok(StopReason::LoopLimit);
            }

            if let Some(counter) = hooks.remaining(nav).await? {
                tracing::info!(current = counter.current, max = ?counter.max, "resources");
                if counter.current == 0 {
                    tracing::info!(scenario = %scenario, "out of resources");
                    return Ok(StopReason::Finished);
                }
            }

            let round = self.loop_ctrl.rounds() + 1;
            self.set_state(RunState::Farming { scenario: scenario.clone(), round });

            let played = hooks.run_round(nav, round).await;
            self.record_events(&mut feed, round);
            match played {
                Ok(outcome) => {
                    consecutive_errors = 0;
                    if outcome.success {
                        self.loop_ctrl.record_success();
                    } else {
                        self.loop_ctrl.record_failure();
                    }
                    tracing::info!(
                        round,
                        success = outcome.success,
                        detail = %outcome.detail,
                        "round finished"
                    );
                    self.history.record("round", Some(round), Some(outcome.detail.clone()));
                    self.events.send(PilotEvent::RoundFinished {
                        round,
                        success: outcome.success,
                        detail: outcome.detail.to_string(),
                    });
                    if outcome.finished {
                        return Ok(StopReason::Finished);
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    consecutive_errors += 1;
                    self.loop_ctrl.record_failure();
                    tracing::warn!(round, error = %e, consecutive_errors, "round failed");
                    let detail = serde_json::json!({ "error": e.to_string() });
                    self.history.record("round", Some(round), Some(detail));
                    self.events.send(PilotEvent::RoundFinished {
                        round,
                        success: false,
                        detail: e.to_string(),
                    });
                    if consecutive_errors >= self.max_errors {
                        return Err(e);
                    }
                    if let Err(nav_err) = nav.go_to(hooks.home_screen()).await {
                        if nav_err.is_cancelled() {
                            return Err(nav_err);
                        }
                        tracing::warn!(error = %nav_err, "could not return to home screen");
                    }
                }
            }
        }
    }

    /// Copies item and interrupt events of the last round into the history.
    fn record_events(&self, feed: &mut broadcast::Receiver<PilotEvent>, round: u32) {
        loop {
            match feed.try_recv() {
                Ok(PilotEvent::ItemFinished { index, status }) => self.history.record(
                    "item",
                    Some(round),
                    Some(serde_json::json!({ "index": index, "status": status })),
                ),
                Ok(PilotEvent::Interrupt { screen, action, .. }) => self.history.record(
                    "interrupt",
                    Some(round),
                    Some(serde_json::json!({ "screen": screen, "action": action })),
                ),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "history missed run events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn finish(&self, scenario: &str, reason: StopReason) -> RunSummary {
        let summary = RunSummary {
            run_id: self.history.run_id.clone(),
            scenario: scenario.to_string(),
            rounds: self.loop_ctrl.rounds(),
            failures: self.loop_ctrl.failures(),
            reason,
            elapsed_ms: self.loop_ctrl.elapsed().as_millis() as u64,
        };
        self.history.record("end", None, serde_json::to_value(&summary).ok());
        if summary.reason != StopReason::Cancelled {
            self.set_state(RunState::Done {
                summary: format!("{} rounds, {:?}", summary.rounds, summary.reason),
            });
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PilotError;
    use crate::navigation::graph::tests::element;
    use crate::navigation::graph::Screen;
    use crate::perception::templates::TemplateStore;
    use crate::scenario_engine::history::HistoryEntry;
    use crate::scenario_engine::state::FightStatus;
    use crate::testkit::{blank, marker, navigator, stamp, FakeGame, Gesture, Scripted};
    use image::GrayImage;
    use tokio_util::sync::CancellationToken;

    struct Home;

    impl Scripted for Home {
        fn render(&self) -> Option<GrayImage> {
            let mut img = blank(40, 40);
            stamp(&mut img, &marker(9), 5, 5);
            Some(img)
        }
        fn react(&mut self, _gesture: &Gesture) {}
    }

    fn home_navigator(cancel: CancellationToken) -> Navigator {
        let game = FakeGame::new(Home);
        let screen = Screen {
            id: ScreenId::Bastion,
            parent: None,
            verification: vec![element("home")],
            elements: Vec::new(),
            transitions: Vec::new(),
        };
        let mut templates = TemplateStore::new();
        templates.insert("home.png", marker(9));
        navigator(&game, vec![screen], templates, cancel)
    }

    /// Plays back scripted round results.
    struct Script {
        rounds: Vec<PilotResult<RoundOutcome>>,
        keys: Option<u32>,
        played: u32,
        cancel_on: Option<(u32, CancellationToken)>,
        events: Option<EventBus>,
    }

    impl Script {
        fn new(rounds: Vec<PilotResult<RoundOutcome>>) -> Self {
            Self { rounds, keys: None, played: 0, cancel_on: None, events: None }
        }
    }

    fn ok(success: bool, finished: bool) -> PilotResult<RoundOutcome> {
        Ok(RoundOutcome { success, finished, detail: serde_json::json!({}) })
    }

    #[async_trait]
    impl FarmingHooks for Script {
        fn name(&self) -> &'static str {
            "script"
        }

        fn home_screen(&self) -> ScreenId {
            ScreenId::Bastion
        }

        async fn remaining(&mut self, _nav: &Navigator) -> PilotResult<Option<Counter>> {
            Ok(self.keys.map(|current| Counter { current, max: Some(5) }))
        }

        async fn run_round(&mut self, _nav: &Navigator, _round: u32) -> PilotResult<RoundOutcome> {
            self.played += 1;
            if let Some((at, token)) = &self.cancel_on {
                if *at == self.played {
                    token.cancel();
                    return Err(PilotError::Cancelled);
                }
            }
            if let Some(events) = &self.events {
                events.send(PilotEvent::ItemFinished {
                    index: self.played as usize,
                    status: FightStatus::Won,
                });
            }
            if let Some(keys) = self.keys.as_mut() {
                *keys = keys.saturating_sub(1);
            }
            if self.rounds.is_empty() {
                return ok(true, false);
            }
            self.rounds.remove(0)
        }
    }

    fn driver(config: LoopConfig) -> FarmingDriver {
        let dir = std::env::temp_dir().join(format!("gamepilot-farming-{}", uuid::Uuid::new_v4()));
        FarmingDriver::new(config, "script", Some(&dir), EventBus::new())
    }

    #[tokio::test]
    async fn finished_round_ends_the_run() {
        let nav = home_navigator(CancellationToken::new());
        let mut hooks = Script::new(vec![ok(true, false), ok(true, true), ok(true, false)]);
        let summary = driver(LoopConfig::default()).run(&nav, &mut hooks).await.unwrap();
        assert_eq!(summary.reason, StopReason::Finished);
        assert_eq!(summary.rounds, 2);
        assert_eq!(hooks.played, 2);
    }

    #[tokio::test]
    async fn round_limit_stops_the_run() {
        let nav = home_navigator(CancellationToken::new());
        let mut hooks = Script::new(Vec::new());
        let config = LoopConfig { max_rounds: Some(3), ..LoopConfig::default() };
        let summary = driver(config).run(&nav, &mut hooks).await.unwrap();
        assert_eq!(summary.reason, StopReason::LoopLimit);
        assert_eq!(hooks.played, 3);
    }

    #[tokio::test]
    async fn empty_counter_finishes_before_playing() {
        let nav = home_navigator(CancellationToken::new());
        let mut hooks = Script::new(Vec::new());
        hooks.keys = Some(2);
        let summary = driver(LoopConfig::default()).run(&nav, &mut hooks).await.unwrap();
        assert_eq!(summary.reason, StopReason::Finished);
        assert_eq!(hooks.played, 2);
    }

    #[tokio::test]
    async fn cancellation_is_a_clean_stop() {
        let token = CancellationToken::new();
        let nav = home_navigator(token.clone());
        let mut hooks = Script::new(Vec::new());
        hooks.cancel_on = Some((2, token));
        let summary = driver(LoopConfig::default()).run(&nav, &mut hooks).await.unwrap();
        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.rounds, 1);
    }

    #[tokio::test]
    async fn repeated_errors_fail_the_run() {
        let nav = home_navigator(CancellationToken::new());
        let err = || Err(PilotError::ItemUnreachable { attempts: 3 });
        let mut hooks = Script::new(vec![err(), ok(true, false), err(), err(), ok(true, false)]);
        let config = LoopConfig { max_failures: Some(2), ..LoopConfig::default() };
        let result = driver(config).run(&nav, &mut hooks).await;
        assert!(matches!(result, Err(PilotError::ItemUnreachable { .. })));
        assert_eq!(hooks.played, 4);
    }

    #[tokio::test]
    async fn item_events_are_written_to_the_history() {
        let nav = home_navigator(CancellationToken::new());
        let events = EventBus::new();
        let dir = std::env::temp_dir().join(format!("gamepilot-farming-{}", uuid::Uuid::new_v4()));
        let config = LoopConfig { max_rounds: Some(2), ..LoopConfig::default() };
        let mut driver = FarmingDriver::new(config, "script", Some(&dir), events.clone());
        let mut hooks = Script::new(Vec::new());
        hooks.events = Some(events);

        let summary = driver.run(&nav, &mut hooks).await.unwrap();
        let path = dir.join(format!("run_script_{}.jsonl", summary.run_id));
        let entries: Vec<HistoryEntry> = std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let kinds: Vec<&str> = entries.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["item", "round", "item", "round", "end"]);
        assert_eq!(entries[2].round, Some(2));
        assert_eq!(entries[2].detail.as_ref().unwrap()["status"], "won");
    }
}
