//! Classic arena: fight every opponent of the list once per round.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PilotResult;
use crate::navigation::graph::{Screen, ScreenId};
use crate::navigation::navigator::{Navigator, ScreenFlow, ScreenHandler};
use crate::perception::ocr::{self, Counter, TextReader};
use crate::perception::types::{Match, Rect};
use crate::scenario_engine::event_bus::{EventBus, PilotEvent};
use crate::scenario_engine::poller::PollSpec;
use crate::scenario_engine::state::FightStatus;
use crate::scenarios::farming::{FarmingHooks, RoundOutcome};
use crate::scenarios::pagination::{
    CycleEnd, CycleReport, ItemAction, ItemOutcome, ListItem, ListLayout, Paginator,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    pub home: ScreenId,
    pub preparing: ScreenId,
    pub free_tokens: ScreenId,
    pub buy_tokens: ScreenId,
    pub victory: Vec<ScreenId>,
    pub defeat: Vec<ScreenId>,
    /// Per-opponent fight button on the home screen.
    pub battle_button: String,
    pub refresh_button: String,
    /// Start button of the preparing screen.
    pub start_button: String,
    /// Auto-battle toggle on the preparing screen, clicked when visible.
    pub auto_toggle: Option<String>,
    /// Confirm button on the token screens.
    pub token_button: String,
    /// Where the token counter is read.
    pub token_area: Option<Rect>,
    /// Paid token refills allowed per run.
    pub token_purchases: u32,
    /// Fights per run; 0 is unlimited.
    pub max_fights: u32,
    pub refresh_on_start: bool,
    pub refresh_after_cycle: bool,
    pub enter_attempts: u32,
    pub enter_interval_ms: u64,
    pub result_timeout_ms: u64,
    pub result_interval_ms: u64,
    pub list: ListLayout,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            home: ScreenId::ClassicArena,
            preparing: ScreenId::ClassicArenaPreparing,
            free_tokens: ScreenId::ClassicArenaFreeTokens,
            buy_tokens: ScreenId::ClassicArenaBuyTokens,
            victory: vec![ScreenId::ClassicArenaVin, ScreenId::ClassicArenaVinResult],
            defeat: vec![ScreenId::ClassicArenaDefeat, ScreenId::ClassicArenaDefeatResult],
            battle_button: "Battle".into(),
            refresh_button: "Refresh".into(),
            start_button: "Start".into(),
            auto_toggle: Some("UncheckedAuto".into()),
            token_button: "BuyTokens".into(),
            token_area: Some(Rect::new(841, 13, 52, 22)),
            token_purchases: 0,
            max_fights: 0,
            refresh_on_start: true,
            refresh_after_cycle: false,
            enter_attempts: 12,
            enter_interval_ms: 500,
            result_timeout_ms: 600_000,
            result_interval_ms: 1000,
            list: ListLayout::default(),
        }
    }
}

impl ArenaConfig {
    fn enter_wait(&self) -> PollSpec {
        PollSpec::millis(self.enter_attempts, self.enter_interval_ms)
    }
}

#[derive(Debug, Default)]
struct Tally {
    won: u32,
    lost: u32,
    purchases_left: u32,
}

/// Watches one fight from the preparing screen to its result.
struct FightWatch<'a> {
    config: &'a ArenaConfig,
    started: bool,
    status: FightStatus,
}

#[async_trait]
impl ScreenHandler for FightWatch<'_> {
    async fn on_screen(&mut self, nav: &Navigator, screen: &Screen) -> PilotResult<ScreenFlow> {
        if screen.id == self.config.preparing {
            let toggle = self.config.auto_toggle.as_deref().and_then(|t| screen.element(t));
            if let Some(toggle) = toggle {
                if nav.is_element_visible(toggle).await? {
                    nav.click_element(toggle).await?;
                }
            }
            nav.click_element(screen.require_element(&self.config.start_button)?).await?;
            if !self.started {
                tracing::info!("fight started");
            }
            self.started = true;
            self.status = FightStatus::Fighting;
            return Ok(ScreenFlow::Continue);
        }
        if self.config.victory.contains(&screen.id) {
            self.status = FightStatus::Won;
            return Ok(ScreenFlow::Stop);
        }
        if self.config.defeat.contains(&screen.id) {
            self.status = FightStatus::Lost;
            return Ok(ScreenFlow::Stop);
        }
        Ok(ScreenFlow::Continue)
    }
}

/// Fights the opponent whose button was handed over by the paginator.
struct ArenaFight<'a> {
    config: &'a ArenaConfig,
    tally: &'a mut Tally,
    events: &'a EventBus,
    fights: u32,
}

impl ArenaFight<'_> {
    async fn fight(&mut self, nav: &Navigator) -> PilotResult<FightStatus> {
        let mut candidates = self.config.defeat.clone();
        candidates.extend(self.config.victory.iter().copied());
        candidates.push(self.config.preparing);

        let mut watch = FightWatch {
            config: self.config,
            started: false,
            status: FightStatus::NotFought,
        };
        let started = Instant::now();
        let outcome = nav
            .process_screens(
                &candidates,
                &mut watch,
                Duration::from_millis(self.config.result_timeout_ms),
                Duration::from_millis(self.config.result_interval_ms),
            )
            .await;
        match outcome {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(elapsed_ms, "fight result never showed");
            }
            Err(e) => return Err(e),
        }
        nav.go_to(self.config.home).await?;
        Ok(watch.status)
    }
}

#[async_trait]
impl ItemAction for ArenaFight<'_> {
    async fn act(
        &mut self,
        nav: &Navigator,
        item: &ListItem,
        button: Match,
    ) -> PilotResult<ItemOutcome> {
        if self.config.max_fights > 0 && self.fights >= self.config.max_fights {
            return Ok(ItemOutcome::Exhausted);
        }
        tracing::info!(opponent = item.index, depth = item.depth, "attacking opponent");
        nav.click_at(button.rect.center()).await?;

        let entered = nav
            .wait_for_screens(
                &[self.config.preparing, self.config.free_tokens, self.config.buy_tokens],
                self.config.enter_wait(),
            )
            .await;
        let screen = match entered {
            Ok(screen) => screen,
            Err(e) if e.is_timeout() => {
                tracing::warn!(opponent = item.index, "fight did not open, skipping opponent");
                nav.go_to(self.config.home).await?;
                return Ok(ItemOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        if screen.id == self.config.free_tokens {
            tracing::info!("claiming free arena tokens");
            nav.click_element(screen.require_element(&self.config.token_button)?).await?;
            nav.go_to(self.config.home).await?;
            return Ok(ItemOutcome::Skipped);
        }
        if screen.id == self.config.buy_tokens {
            if self.tally.purchases_left == 0 {
                tracing::info!("out of arena tokens");
                nav.go_to(self.config.home).await?;
                return Ok(ItemOutcome::Exhausted);
            }
            self.tally.purchases_left -= 1;
            tracing::info!(left = self.tally.purchases_left, "buying arena tokens");
            nav.click_element(screen.require_element(&self.config.token_button)?).await?;
            nav.go_to(self.config.home).await?;
            return Ok(ItemOutcome::Skipped);
        }

        let status = self.fight(nav).await?;
        self.fights += 1;
        match status {
            FightStatus::Won => {
                self.tally.won += 1;
                tracing::info!(opponent = item.index, won = self.tally.won, "victory");
            }
            FightStatus::Lost => {
                self.tally.lost += 1;
                tracing::info!(opponent = item.index, lost = self.tally.lost, "defeat");
            }
            _ => return Ok(ItemOutcome::Skipped),
        }
        self.events.send(PilotEvent::ItemFinished { index: item.index, status });
        Ok(ItemOutcome::Finished(status))
    }
}

/// Arena mode for [`crate::scenarios::farming::FarmingDriver`]: one list
/// cycle per round.
pub struct ArenaHooks {
    config: ArenaConfig,
    reader: Option<Arc<dyn TextReader>>,
    events: EventBus,
    tally: Tally,
    need_refresh: bool,
    fights: u32,
}

impl ArenaHooks {
    pub fn new(config: ArenaConfig, reader: Option<Arc<dyn TextReader>>, events: EventBus) -> Self {
        let tally = Tally {
            purchases_left: config.token_purchases,
            ..Tally::default()
        };
        Self {
            need_refresh: config.refresh_on_start,
            config,
            reader,
            events,
            tally,
            fights: 0,
        }
    }

    /// Win rate in percent over the run so far.
    pub fn win_rate(&self) -> f64 {
        let total = self.tally.won + self.tally.lost;
        if total == 0 {
            0.0
        } else {
            f64::from(self.tally.won) / f64::from(total) * 100.0
        }
    }

    async fn refresh(&self, nav: &Navigator) -> PilotResult<()> {
        let home = nav.graph().require(self.config.home)?;
        let refresh = home.require_element(&self.config.refresh_button)?;
        tracing::info!("refreshing opponent list");
        nav.click_element(refresh).await
    }
}

#[async_trait]
impl FarmingHooks for ArenaHooks {
    fn name(&self) -> &'static str {
        "arena"
    }

    fn home_screen(&self) -> ScreenId {
        self.config.home
    }

    async fn remaining(&mut self, nav: &Navigator) -> PilotResult<Option<Counter>> {
        let (Some(reader), Some(area)) = (&self.reader, self.config.token_area) else {
            return Ok(None);
        };
        let frame = nav.frame().await?;
        let counter = ocr::read_counter(reader.as_ref(), &frame, area).await?;
        // an empty pouch can still be refilled from the token screens
        Ok(counter.filter(|c| c.current > 0 || self.tally.purchases_left == 0))
    }

    async fn run_round(&mut self, nav: &Navigator, round: u32) -> PilotResult<RoundOutcome> {
        if self.need_refresh {
            self.refresh(nav).await?;
        }

        let home = nav.graph().require(self.config.home)?;
        let button = home.require_element(&self.config.battle_button)?;
        let mut action = ArenaFight {
            config: &self.config,
            tally: &mut self.tally,
            events: &self.events,
            fights: self.fights,
        };
        let mut paginator = Paginator::new(nav, &self.config.list, button);
        let report: CycleReport = paginator.run_cycle(&mut action).await?;
        self.fights = action.fights;

        let any_lost = paginator.items().iter().any(|i| i.status == FightStatus::Lost);
        self.need_refresh = any_lost || self.config.refresh_after_cycle;
        tracing::info!(
            round,
            fought = report.fought,
            won = report.won,
            lost = report.lost,
            resets = report.resets,
            win_rate = format!("{:.1}%", self.win_rate()),
            "arena cycle done"
        );

        Ok(RoundOutcome {
            success: report.unreachable == 0,
            finished: report.end == CycleEnd::Exhausted,
            detail: serde_json::json!({
                "fought": report.fought,
                "won": report.won,
                "lost": report.lost,
                "skipped": report.skipped,
                "unreachable": report.unreachable,
                "resets": report.resets,
                "depth": report.depth,
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
    use crate::scenarios::pagination::tests::{button, layout, ScrollList};
    use crate::testkit::{button_marker, marker, navigator, stamp, FakeGame, Gesture, Scripted};
    use image::GrayImage;
    use tokio_util::sync::CancellationToken;

    const BADGE_AT: (u32, u32) = (104, 5);
    const BUTTON_AT: (u32, u32) = (104, 60);

    /// Arena list plus the fight screens. Opponents listed in `losers` win
    /// against us.
    struct ArenaSim {
        screen: ScreenId,
        list: ScrollList,
        losers: Vec<u32>,
        refreshes: u32,
        out_of_tokens: bool,
    }

    fn badge(id: ScreenId) -> u32 {
        match id {
            ScreenId::ClassicArena => 40,
            ScreenId::ClassicArenaPreparing => 41,
            ScreenId::ClassicArenaVin => 42,
            ScreenId::ClassicArenaDefeat => 43,
            ScreenId::ClassicArenaFreeTokens => 44,
            _ => 45,
        }
    }

    /// The one button each non-list screen shows at `BUTTON_AT`.
    fn screen_button(id: ScreenId) -> u32 {
        match id {
            ScreenId::ClassicArena => 50,
            ScreenId::ClassicArenaPreparing => 51,
            ScreenId::ClassicArenaVin | ScreenId::ClassicArenaDefeat => 52,
            _ => 53,
        }
    }

    impl Scripted for ArenaSim {
        fn render(&self) -> Option<GrayImage> {
            let mut img = if self.screen == ScreenId::ClassicArena {
                self.list.render()?
            } else {
                crate::testkit::blank(120, 100)
            };
            stamp(&mut img, &marker(badge(self.screen)), BADGE_AT.0, BADGE_AT.1);
            stamp(&mut img, &marker(screen_button(self.screen)), BUTTON_AT.0, BUTTON_AT.1);
            Some(img)
        }

        fn react(&mut self, gesture: &Gesture) {
            let on_button = matches!(gesture, Gesture::Click(p)
                if (BUTTON_AT.0 as i32..BUTTON_AT.0 as i32 + 12).contains(&p.x)
                    && (BUTTON_AT.1 as i32..BUTTON_AT.1 as i32 + 12).contains(&p.y));
            match self.screen {
                ScreenId::ClassicArena if on_button => self.refreshes += 1,
                ScreenId::ClassicArena => {
                    let before = self.list.fights.len();
                    self.list.react(gesture);
                    if self.list.fights.len() > before {
                        self.screen = if self.out_of_tokens {
                            self.list.fights.pop();
                            ScreenId::ClassicArenaBuyTokens
                        } else {
                            ScreenId::ClassicArenaPreparing
                        };
                    }
                }
                ScreenId::ClassicArenaPreparing if on_button => {
                    let opponent = self.list.fights.last().copied().unwrap_or_default();
                    self.screen = if self.losers.contains(&opponent) {
                        ScreenId::ClassicArenaDefeat
                    } else {
                        ScreenId::ClassicArenaVin
                    };
                }
                _ if on_button => self.screen = ScreenId::ClassicArena,
                _ => {}
            }
        }
    }

    fn screen(id: ScreenId, elements: Vec<UiElement>, home_via: Option<&str>) -> Screen {
        Screen {
            id,
            parent: None,
            verification: vec![element(&format!("badge_{id}"))],
            elements,
            transitions: home_via
                .map(|name| Transition {
                    target: ScreenId::ClassicArena,
                    trigger: element(name),
                    horizontal_search: false,
                })
                .into_iter()
                .collect(),
        }
    }

    fn setup(sim: ArenaSim) -> (FakeGame<ArenaSim>, Navigator) {
        use ScreenId::*;
        let game = FakeGame::new(sim);
        let screens = vec![
            screen(ClassicArena, vec![button(), element("Refresh")], None),
            screen(ClassicArenaPreparing, vec![element("Start")], None),
            screen(ClassicArenaVin, vec![], Some("Continue")),
            screen(ClassicArenaDefeat, vec![], Some("Continue")),
            screen(ClassicArenaFreeTokens, vec![element("BuyTokens")], Some("BuyTokens")),
            screen(ClassicArenaBuyTokens, vec![element("BuyTokens")], Some("BuyTokens")),
        ];
        let mut templates = TemplateStore::new();
        let ids = [
            ClassicArena,
            ClassicArenaPreparing,
            ClassicArenaVin,
            ClassicArenaDefeat,
            ClassicArenaFreeTokens,
            ClassicArenaBuyTokens,
        ];
        for id in ids {
            templates.insert(&format!("badge_{id}.png"), marker(badge(id)));
        }
        templates.insert("battle.png", button_marker());
        templates.insert("refresh.png", marker(50));
        templates.insert("start.png", marker(51));
        templates.insert("continue.png", marker(52));
        templates.insert("buytokens.png", marker(53));
        let nav = navigator(&game, screens, templates, CancellationToken::new());
        (game, nav)
    }

    fn config() -> ArenaConfig {
        ArenaConfig {
            victory: vec![ScreenId::ClassicArenaVin],
            defeat: vec![ScreenId::ClassicArenaDefeat],
            auto_toggle: None,
            token_area: None,
            refresh_on_start: false,
            enter_attempts: 5,
            enter_interval_ms: 1,
            result_timeout_ms: 2000,
            result_interval_ms: 1,
            list: layout(),
            ..ArenaConfig::default()
        }
    }

    fn sim(ids: Vec<u32>, losers: Vec<u32>) -> ArenaSim {
        ArenaSim {
            screen: ScreenId::ClassicArena,
            list: ScrollList::new(ids, 50),
            losers,
            refreshes: 0,
            out_of_tokens: false,
        }
    }

    #[tokio::test]
    async fn a_round_fights_every_opponent_and_refreshes_after_a_loss() {
        let (game, nav) = setup(sim(vec![0, 1, 2], vec![1]));
        let mut hooks = ArenaHooks::new(config(), None, EventBus::new());

        let outcome = hooks.run_round(&nav, 1).await.unwrap();
        assert_eq!(outcome.detail["fought"], 3);
        assert_eq!(outcome.detail["won"], 2);
        assert_eq!(outcome.detail["lost"], 1);
        assert!(!outcome.finished);
        assert_eq!(game.with_state(|s| s.list.fights.clone()), vec![0, 1, 2]);
        assert_eq!(game.with_state(|s| s.screen), ScreenId::ClassicArena);
        assert_eq!(game.with_state(|s| s.refreshes), 0);

        hooks.run_round(&nav, 2).await.unwrap();
        assert_eq!(game.with_state(|s| s.refreshes), 1);
        assert!((hooks.win_rate() - 66.666).abs() < 0.1);
    }

    #[tokio::test]
    async fn missing_tokens_end_the_run() {
        let mut state = sim(vec![0, 1, 2], vec![]);
        state.out_of_tokens = true;
        let (game, nav) = setup(state);
        let mut hooks = ArenaHooks::new(config(), None, EventBus::new());

        let outcome = hooks.run_round(&nav, 1).await.unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.detail["fought"], 0);
        assert_eq!(game.with_state(|s| s.screen), ScreenId::ClassicArena);
    }

    #[tokio::test]
    async fn fight_limit_exhausts_the_cycle() {
        let (game, nav) = setup(sim(vec![0, 1, 2], vec![]));
        let config = ArenaConfig { max_fights: 2, ..config() };
        let mut hooks = ArenaHooks::new(config, None, EventBus::new());

        let outcome = hooks.run_round(&nav, 1).await.unwrap();
        assert!(outcome.finished);
        assert_eq!(game.with_state(|s| s.list.fights.len()), 2);
    }
}
