//! Dungeon farming: start the deepest unlocked stage and keep rerunning it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::executor::input::Drag;
use crate::navigation::graph::{Screen, ScreenId};
use crate::navigation::navigator::{Navigator, ScreenFlow, ScreenHandler};
use crate::perception::ocr::{self, Counter, TextReader};
use crate::perception::types::{Match, Rect};
use crate::scenario_engine::event_bus::{EventBus, PilotEvent};
use crate::scenario_engine::state::FightStatus;
use crate::scenarios::farming::{FarmingHooks, RoundOutcome};
use crate::scenarios::pagination::scroll_and_compare;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DungeonConfig {
    pub home: ScreenId,
    pub preparing: ScreenId,
    pub buy_keys: ScreenId,
    pub victory: ScreenId,
    pub defeat: ScreenId,
    /// Key icon on the stage list; the counter sits to its left.
    pub keys_element: String,
    pub keys_text_width: u32,
    /// Stage fight buttons; the lowest one is played.
    pub fight_element: String,
    pub start_button: String,
    pub auto_toggle: Option<String>,
    pub rerun_button: String,
    pub close_button: String,
    pub scroll: Drag,
    /// Fixed area compared across scrolls. When unset, a band starting at
    /// the lowest fight button is used.
    pub check_area: Option<Rect>,
    pub check_x: u32,
    pub check_width: u32,
    pub check_height: u32,
    pub max_scroll_attempts: u32,
    pub settle_ms: u64,
    pub end_threshold: f32,
    /// Victories per session; 0 is unlimited.
    pub max_battles: u32,
    /// Defeats tolerated per session; -1 is unlimited.
    pub max_defeats: i32,
    pub session_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for DungeonConfig {
    fn default() -> Self {
        Self {
            home: ScreenId::DungeonStages,
            preparing: ScreenId::DungeonPreparing,
            buy_keys: ScreenId::DungeonBuyKeys,
            victory: ScreenId::DungeonVictory,
            defeat: ScreenId::DungeonDefeat,
            keys_element: "keys".into(),
            keys_text_width: 36,
            fight_element: "fight".into(),
            start_button: "Start".into(),
            auto_toggle: None,
            rerun_button: "Rerun".into(),
            close_button: "Close".into(),
            scroll: Drag::vertical(542, 613, 155),
            check_area: None,
            check_x: 325,
            check_width: 770,
            check_height: 50,
            max_scroll_attempts: 5,
            settle_ms: 1000,
            end_threshold: 0.98,
            max_battles: 0,
            max_defeats: 0,
            session_timeout_ms: 600_000,
            poll_interval_ms: 1000,
        }
    }
}

/// Why a dungeon session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    BattleLimit,
    DefeatLimit,
    OutOfKeys,
}

/// Reacts to the screens of a rerun chain.
struct Session<'a> {
    config: &'a DungeonConfig,
    events: &'a EventBus,
    victories: u32,
    defeats: u32,
    end: Option<SessionEnd>,
}

impl Session<'_> {
    fn defeats_exhausted(&self) -> bool {
        match u32::try_from(self.config.max_defeats) {
            Ok(max) => self.defeats > max,
            Err(_) => false,
        }
    }

    async fn close(&self, nav: &Navigator, screen: &Screen) -> PilotResult<()> {
        match screen.element(&self.config.close_button) {
            Some(close) => nav.click_element(close).await,
            None => Ok(()),
        }
    }

    fn record(&self, status: FightStatus) {
        let index = (self.victories + self.defeats) as usize;
        self.events.send(PilotEvent::ItemFinished { index, status });
    }
}

#[async_trait]
impl ScreenHandler for Session<'_> {
    async fn on_screen(&mut self, nav: &Navigator, screen: &Screen) -> PilotResult<ScreenFlow> {
        let config = self.config;
        if screen.id == config.preparing {
            if let Some(toggle) = config.auto_toggle.as_deref().and_then(|t| screen.element(t)) {
                if nav.is_element_visible(toggle).await? {
                    nav.click_element(toggle).await?;
                }
            }
            tracing::info!("starting stage");
            nav.click_element(screen.require_element(&config.start_button)?).await?;
            return Ok(ScreenFlow::Continue);
        }

        if screen.id == config.buy_keys {
            tracing::info!("out of keys");
            self.close(nav, screen).await?;
            self.end = Some(SessionEnd::OutOfKeys);
            return Ok(ScreenFlow::Stop);
        }

        if screen.id == config.victory {
            self.victories += 1;
            self.record(FightStatus::Won);
            tracing::info!(victories = self.victories, "victory");
            if config.max_battles > 0 && self.victories >= config.max_battles {
                self.end = Some(SessionEnd::BattleLimit);
                return Ok(ScreenFlow::Stop);
            }
            nav.click_element(screen.require_element(&config.rerun_button)?).await?;
            return Ok(ScreenFlow::ContinueFresh);
        }

        if screen.id == config.defeat {
            self.defeats += 1;
            self.record(FightStatus::Lost);
            tracing::info!(defeats = self.defeats, "defeat");
            if self.defeats_exhausted() {
                self.end = Some(SessionEnd::DefeatLimit);
                return Ok(ScreenFlow::Stop);
            }
            nav.click_element(screen.require_element(&config.rerun_button)?).await?;
            return Ok(ScreenFlow::ContinueFresh);
        }

        Ok(ScreenFlow::Continue)
    }
}

/// Dungeon mode for [`crate::scenarios::farming::FarmingDriver`]. A round is
/// one session: pick the stage, then rerun until a limit or the keys end it.
pub struct DungeonHooks {
    config: DungeonConfig,
    reader: Option<Arc<dyn TextReader>>,
    events: EventBus,
    victories: u32,
    defeats: u32,
}

impl DungeonHooks {
    pub fn new(
        config: DungeonConfig,
        reader: Option<Arc<dyn TextReader>>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            reader,
            events,
            victories: 0,
            defeats: 0,
        }
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.victories + self.defeats;
        if total == 0 {
            0.0
        } else {
            f64::from(self.victories) / f64::from(total) * 100.0
        }
    }

    fn missing_fight(&self) -> PilotError {
        PilotError::UnknownElement {
            screen: self.config.home,
            element: self.config.fight_element.clone(),
        }
    }

    /// Fight buttons on the stage list, lowest last.
    async fn stages(&self, nav: &Navigator) -> PilotResult<Vec<Match>> {
        let home = nav.graph().require(self.config.home)?;
        let fight = home.require_element(&self.config.fight_element)?;
        let frame = nav.frame().await?;
        let mut stages = nav.identifier().locate_all(&frame, fight)?;
        stages.sort_by_key(|m| (m.rect.y, m.rect.x));
        Ok(stages)
    }

    /// The configured check area, or a band at the lowest fight button cut
    /// to the frame.
    async fn check_area(&self, nav: &Navigator) -> PilotResult<Rect> {
        if let Some(area) = self.config.check_area {
            return Ok(area);
        }
        let lowest = self.stages(nav).await?.pop().ok_or_else(|| self.missing_fight())?;
        let band = Rect::new(
            self.config.check_x,
            lowest.rect.y,
            self.config.check_width,
            self.config.check_height,
        );
        let frame = nav.frame().await?;
        band.clamp_to(frame.width(), frame.height()).ok_or_else(|| {
            PilotError::InvalidInput(format!("check area {band:?} outside frame"))
        })
    }

    /// Scrolls the stage list down until it stops moving, bounded.
    async fn scroll_to_end(&self, nav: &Navigator) -> PilotResult<()> {
        for attempt in 0..self.config.max_scroll_attempts {
            let area = self.check_area(nav).await?;
            let unchanged = scroll_and_compare(
                nav.coordinator(),
                area,
                self.config.scroll,
                Duration::from_millis(self.config.settle_ms),
                self.config.end_threshold,
            )
            .await?;
            if unchanged {
                tracing::debug!(attempt, "end of stage list");
                return Ok(());
            }
        }
        tracing::warn!(
            attempts = self.config.max_scroll_attempts,
            "stage list end not confirmed"
        );
        Ok(())
    }
}

#[async_trait]
impl FarmingHooks for DungeonHooks {
    fn name(&self) -> &'static str {
        "dungeon"
    }

    fn home_screen(&self) -> ScreenId {
        self.config.home
    }

    async fn remaining(&mut self, nav: &Navigator) -> PilotResult<Option<Counter>> {
        let Some(reader) = &self.reader else {
            return Ok(None);
        };
        let home = nav.graph().require(self.config.home)?;
        let keys = home.require_element(&self.config.keys_element)?;
        let frame = nav.frame().await?;
        let Some(icon) = nav.identifier().locate(&frame, keys)? else {
            tracing::warn!(element = %keys.name, "key counter not visible");
            return Ok(None);
        };
        let width = self.config.keys_text_width;
        let region = Rect::new(
            icon.rect.x.saturating_sub(width),
            icon.rect.y + 3,
            width,
            icon.rect.height.saturating_sub(5).max(1),
        );
        ocr::read_counter(reader.as_ref(), &frame, region).await
    }

    async fn run_round(&mut self, nav: &Navigator, round: u32) -> PilotResult<RoundOutcome> {
        self.scroll_to_end(nav).await?;

        let stage = self.stages(nav).await?.pop().ok_or_else(|| self.missing_fight())?;
        tracing::info!(round, y = stage.rect.y, "starting deepest stage");
        nav.click_at(stage.rect.center()).await?;

        let config = &self.config;
        let mut session = Session {
            config,
            events: &self.events,
            victories: 0,
            defeats: 0,
            end: None,
        };
        let candidates = [config.preparing, config.buy_keys, config.victory, config.defeat];
        let outcome = nav
            .process_screens(
                &candidates,
                &mut session,
                Duration::from_millis(config.session_timeout_ms),
                Duration::from_millis(config.poll_interval_ms),
            )
            .await;
        if let Err(e) = outcome {
            if !e.is_timeout() {
                return Err(e);
            }
            tracing::warn!("dungeon session timed out");
        }

        let (victories, defeats, end) = (session.victories, session.defeats, session.end);
        self.victories += victories;
        self.defeats += defeats;
        tracing::info!(
            victories = self.victories,
            defeats = self.defeats,
            win_rate = format!("{:.1}%", self.win_rate()),
            "dungeon session done"
        );

        if let Err(e) = nav.go_to(self.config.home).await {
            if e.is_cancelled() {
                return Err(e);
            }
            tracing::warn!(error = %e, "could not return to stage list");
        }

        Ok(RoundOutcome {
            success: end.is_some_and(|e| e != SessionEnd::DefeatLimit),
            // A timed out session is retried from the stage list.
            finished: end.is_some(),
            detail: serde_json::json!({
                "victories": victories,
                "defeats": defeats,
                "end": end,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::graph::tests::element;
    use crate::navigation::graph::{Transition, UiElement};
    use crate::perception::templates::TemplateStore;
    use crate::perception::types::Point;
    use crate::testkit::{
        blank, button_marker, marker, navigator, stamp, FakeGame, Gesture, Scripted,
    };
    use image::GrayImage;
    use tokio_util::sync::CancellationToken;

    use ScreenId::{DungeonBuyKeys, DungeonDefeat, DungeonPreparing, DungeonStages, DungeonVictory};

    const STAGE_X: u32 = 100;
    const STAGES_Y: [u32; 3] = [20, 50, 80];
    const BUTTON_AT: (u32, u32) = (40, 60);
    const CLOSE_AT: (u32, u32) = (70, 60);

    /// Stage list plus battle screens. Each battle consumes the next entry of
    /// `results`; with none left the key shop opens. The stage list never
    /// scrolls, but a reward ticker beside it changes on every drag.
    struct DungeonSim {
        screen: ScreenId,
        results: Vec<bool>,
        started_stage: Option<u32>,
        drags: u32,
    }

    fn badge(id: ScreenId) -> u32 {
        match id {
            DungeonStages => 60,
            DungeonPreparing => 61,
            DungeonVictory => 62,
            DungeonDefeat => 63,
            _ => 64,
        }
    }

    fn hit(p: &Point, at: (u32, u32), size: u32) -> bool {
        (at.0 as i32..(at.0 + size) as i32).contains(&p.x)
            && (at.1 as i32..(at.1 + size) as i32).contains(&p.y)
    }

    impl DungeonSim {
        fn battle(&mut self) {
            self.screen = if self.results.is_empty() {
                DungeonBuyKeys
            } else if self.results.remove(0) {
                DungeonVictory
            } else {
                DungeonDefeat
            };
        }
    }

    impl Scripted for DungeonSim {
        fn render(&self) -> Option<GrayImage> {
            let mut img = blank(160, 100);
            stamp(&mut img, &marker(badge(self.screen)), 5, 5);
            match self.screen {
                DungeonStages => {
                    for y in STAGES_Y {
                        stamp(&mut img, &button_marker(), STAGE_X, y);
                    }
                    stamp(&mut img, &marker(40 + self.drags % 10), 5, 40);
                }
                DungeonPreparing => stamp(&mut img, &marker(70), BUTTON_AT.0, BUTTON_AT.1),
                DungeonVictory | DungeonDefeat => {
                    stamp(&mut img, &marker(71), BUTTON_AT.0, BUTTON_AT.1);
                    stamp(&mut img, &marker(72), CLOSE_AT.0, CLOSE_AT.1);
                }
                _ => stamp(&mut img, &marker(72), CLOSE_AT.0, CLOSE_AT.1),
            }
            Some(img)
        }

        fn react(&mut self, gesture: &Gesture) {
            let p = match gesture {
                Gesture::Click(p) => p,
                Gesture::Drag(_, _) => {
                    self.drags += 1;
                    return;
                }
                Gesture::Key(_) => return,
            };
            match self.screen {
                DungeonStages => {
                    if let Some(&y) = STAGES_Y.iter().find(|&&y| hit(p, (STAGE_X, y), 8)) {
                        self.started_stage = Some(y);
                        self.screen = DungeonPreparing;
                    }
                }
                DungeonPreparing if hit(p, BUTTON_AT, 12) => self.battle(),
                DungeonVictory | DungeonDefeat if hit(p, BUTTON_AT, 12) => self.battle(),
                _ if hit(p, CLOSE_AT, 12) => self.screen = DungeonStages,
                _ => {}
            }
        }
    }

    fn screen(id: ScreenId, elements: Vec<UiElement>) -> Screen {
        let close = matches!(id, DungeonVictory | DungeonDefeat | DungeonBuyKeys);
        Screen {
            id,
            parent: None,
            verification: vec![element(&format!("badge_{id}"))],
            elements,
            transitions: close
                .then(|| Transition {
                    target: DungeonStages,
                    trigger: element("Close"),
                    horizontal_search: false,
                })
                .into_iter()
                .collect(),
        }
    }

    fn setup(results: Vec<bool>) -> (FakeGame<DungeonSim>, Navigator) {
        let game = FakeGame::new(DungeonSim {
            screen: DungeonStages,
            results,
            started_stage: None,
            drags: 0,
        });
        let fight = UiElement {
            area: Some(Rect::new(90, 0, 30, 100)),
            ..element("fight")
        };
        let screens = vec![
            screen(DungeonStages, vec![fight]),
            screen(DungeonPreparing, vec![element("Start")]),
            screen(DungeonVictory, vec![element("Rerun"), element("Close")]),
            screen(DungeonDefeat, vec![element("Rerun"), element("Close")]),
            screen(DungeonBuyKeys, vec![element("Close")]),
        ];
        let mut templates = TemplateStore::new();
        for id in [DungeonStages, DungeonPreparing, DungeonVictory, DungeonDefeat, DungeonBuyKeys] {
            templates.insert(&format!("badge_{id}.png"), marker(badge(id)));
        }
        templates.insert("fight.png", button_marker());
        templates.insert("start.png", marker(70));
        templates.insert("rerun.png", marker(71));
        templates.insert("close.png", marker(72));
        let nav = navigator(&game, screens, templates, CancellationToken::new());
        (game, nav)
    }

    fn config() -> DungeonConfig {
        DungeonConfig {
            scroll: Drag { from: Point::new(50, 90), to: Point::new(50, 10), hold_ms: 0 },
            check_x: 90,
            check_width: 30,
            settle_ms: 0,
            session_timeout_ms: 2000,
            poll_interval_ms: 1,
            ..DungeonConfig::default()
        }
    }

    #[tokio::test]
    async fn battle_limit_ends_the_session_on_the_deepest_stage() {
        let (game, nav) = setup(vec![true, true, true]);
        let config = DungeonConfig { max_battles: 2, ..config() };
        let mut hooks = DungeonHooks::new(config, None, EventBus::new());

        let outcome = hooks.run_round(&nav, 1).await.unwrap();
        assert_eq!(outcome.detail["victories"], 2);
        assert_eq!(outcome.detail["end"], "battle_limit");
        assert!(outcome.finished);
        assert_eq!(game.with_state(|s| s.started_stage), Some(80));
        assert_eq!(game.with_state(|s| s.results.len()), 1);
        assert_eq!(game.with_state(|s| s.screen), DungeonStages);
    }

    #[tokio::test]
    async fn defeats_are_tolerated_up_to_the_limit() {
        let (game, nav) = setup(vec![false, false, false]);
        let config = DungeonConfig { max_defeats: 1, ..config() };
        let mut hooks = DungeonHooks::new(config, None, EventBus::new());

        let outcome = hooks.run_round(&nav, 1).await.unwrap();
        assert_eq!(outcome.detail["defeats"], 2);
        assert_eq!(outcome.detail["end"], "defeat_limit");
        assert_eq!(game.with_state(|s| s.results.len()), 1);
        assert_eq!(hooks.win_rate(), 0.0);
    }

    #[tokio::test]
    async fn unlimited_session_runs_until_keys_are_gone() {
        let (game, nav) = setup(vec![true, false, true]);
        let config = DungeonConfig { max_defeats: -1, ..config() };
        let mut hooks = DungeonHooks::new(config, None, EventBus::new());

        let outcome = hooks.run_round(&nav, 1).await.unwrap();
        assert_eq!(outcome.detail["victories"], 2);
        assert_eq!(outcome.detail["defeats"], 1);
        assert_eq!(outcome.detail["end"], "out_of_keys");
        assert_eq!(game.with_state(|s| s.screen), DungeonStages);
    }

    #[tokio::test]
    async fn stage_list_end_is_judged_at_the_lowest_fight_button() {
        let (game, nav) = setup(Vec::new());
        let hooks = DungeonHooks::new(config(), None, EventBus::new());
        assert_eq!(hooks.check_area(&nav).await.unwrap(), Rect::new(90, 80, 30, 20));

        hooks.scroll_to_end(&nav).await.unwrap();
        assert_eq!(game.with_state(|s| s.drags), 1);
    }

    #[tokio::test]
    async fn fixed_check_area_overrides_the_fight_band() {
        let (game, nav) = setup(Vec::new());
        let config = DungeonConfig {
            check_area: Some(Rect::new(0, 30, 40, 30)),
            max_scroll_attempts: 3,
            ..config()
        };
        let hooks = DungeonHooks::new(config, None, EventBus::new());

        hooks.scroll_to_end(&nav).await.unwrap();
        assert_eq!(game.with_state(|s| s.drags), 3);
    }
}
