//! Enumerating a scrollable list whose items have no stable id.
//!
//! An item is remembered by a pixel snapshot of its row. A cycle scrolls to
//! the top, takes a control snapshot of the first rows, then works down the
//! list one screen at a time: new items are acted on top to bottom, and the
//! scroll depth (number of scroll-down drags from the top) is the only record
//! of position. Actions are expected to leave the list at the top, so after
//! each one the depth is replayed from the top. A missing control snapshot
//! means the list was rebuilt and the cycle starts over.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::executor::coordinator::Coordinator;
use crate::executor::input::Drag;
use crate::navigation::graph::UiElement;
use crate::navigation::navigator::Navigator;
use crate::perception::matcher;
use crate::perception::types::{Frame, Match, Rect, Snapshot};
use crate::scenario_engine::state::FightStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListLayout {
    /// Left edge of an item's fingerprint region.
    pub item_x: u32,
    pub item_width: u32,
    pub item_height: u32,
    /// How far the item's top edge sits above its button's top edge.
    pub item_offset_y: u32,
    /// Horizontal slack when re-matching snapshots inside the list column.
    pub column_slack: u32,
    /// Compared before and after each drag to notice that the list stopped.
    pub check_area: Rect,
    /// Taken at the top of the list; disappears when the list is rebuilt.
    pub control_area: Rect,
    pub scroll_down: Drag,
    pub scroll_up: Drag,
    pub settle_ms: u64,
    pub max_scroll_to_top: u32,
    /// Extra scroll-downs allowed while looking for a known item.
    pub max_reposition_attempts: u32,
    pub top_threshold: f32,
    pub end_threshold: f32,
    pub identity_threshold: f32,
    pub control_threshold: f32,
}

impl Default for ListLayout {
    fn default() -> Self {
        Self {
            item_x: 228,
            item_width: 207,
            item_height: 85,
            item_offset_y: 21,
            column_slack: 8,
            check_area: Rect::new(228, 540, 207, 88),
            control_area: Rect::new(228, 540, 207, 88),
            scroll_down: Drag::vertical(542, 613, 155),
            scroll_up: Drag::vertical(542, 208, 534),
            settle_ms: 1000,
            max_scroll_to_top: 5,
            max_reposition_attempts: 3,
            top_threshold: 0.95,
            end_threshold: 0.98,
            identity_threshold: 0.98,
            control_threshold: 0.98,
        }
    }
}

impl ListLayout {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Region of the item whose button sits at `button`, unclipped.
    fn item_rect(&self, button: Rect) -> Option<Rect> {
        let y = button.y.checked_sub(self.item_offset_y)?;
        Some(Rect::new(self.item_x, y, self.item_width, self.item_height))
    }

    /// Full-height band around `rect`'s column.
    fn column(&self, rect: Rect, frame: &Frame) -> Rect {
        let x = rect.x.saturating_sub(self.column_slack);
        let width = rect.width + 2 * self.column_slack;
        Rect::new(x, 0, width, frame.height())
            .clamp_to(frame.width(), frame.height())
            .unwrap_or_else(|| frame.bounds())
    }
}

/// One remembered list entry. Owns its snapshot; dropped with the cycle.
#[derive(Debug, Clone)]
pub struct ListItem {
    snapshot: Snapshot,
    pub status: FightStatus,
    /// Discovery order within the cycle.
    pub index: usize,
    /// Scroll depth at which the item was first seen.
    pub depth: u32,
}

impl ListItem {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

/// What an [`ItemAction`] did with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Finished(FightStatus),
    Skipped,
    /// Nothing left to spend; ends the cycle.
    Exhausted,
}

/// Acts on a list item whose button is at `button` (frame coordinates).
#[async_trait]
pub trait ItemAction: Send {
    async fn act(&mut self, nav: &Navigator, item: &ListItem, button: Match)
        -> PilotResult<ItemOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleEnd {
    #[default]
    EndOfList,
    Exhausted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fought: u32,
    pub won: u32,
    pub lost: u32,
    pub skipped: u32,
    pub unreachable: u32,
    pub resets: u32,
    pub depth: u32,
    pub end: CycleEnd,
}

impl CycleReport {
    fn record(&mut self, status: FightStatus) {
        match status {
            FightStatus::Won => {
                self.fought += 1;
                self.won += 1;
            }
            FightStatus::Lost => {
                self.fought += 1;
                self.lost += 1;
            }
            FightStatus::NotFought | FightStatus::Fighting => self.skipped += 1,
        }
    }
}

/// Drags once and reports whether `check_area` stayed the same, i.e. the
/// list could not move any further in that direction.
pub async fn scroll_and_compare(
    coordinator: &Coordinator,
    check_area: Rect,
    drag: Drag,
    settle: Duration,
    threshold: f32,
) -> PilotResult<bool> {
    let before = coordinator.snapshot(check_area).await?;
    coordinator.drag(drag).await?;
    coordinator.poller().delay(settle).await?;
    let after = coordinator.snapshot(check_area).await?;
    after.same_as(&before, threshold)
}

/// Pagination state of one farming cycle.
pub struct Paginator<'a> {
    nav: &'a Navigator,
    layout: &'a ListLayout,
    button: &'a UiElement,
    items: Vec<ListItem>,
    depth: u32,
    /// Set while the list sits below `depth` after a reposition search.
    displaced: bool,
    control: Option<Snapshot>,
}

impl<'a> Paginator<'a> {
    /// `button` is the actionable button every list row carries.
    pub fn new(nav: &'a Navigator, layout: &'a ListLayout, button: &'a UiElement) -> Self {
        Self {
            nav,
            layout,
            button,
            items: Vec::new(),
            depth: 0,
            displaced: false,
            control: None,
        }
    }

    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Forgets every item and the control snapshot.
    pub fn reset(&mut self) {
        self.items.clear();
        self.depth = 0;
        self.displaced = false;
        self.control = None;
    }

    fn coordinator(&self) -> &Coordinator {
        self.nav.coordinator()
    }

    pub async fn scroll_to_top(&self) -> PilotResult<bool> {
        for _ in 0..self.layout.max_scroll_to_top {
            let unchanged = scroll_and_compare(
                self.coordinator(),
                self.layout.check_area,
                self.layout.scroll_up,
                self.layout.settle(),
                self.layout.top_threshold,
            )
            .await?;
            if unchanged {
                return Ok(true);
            }
        }
        tracing::warn!(attempts = self.layout.max_scroll_to_top, "top of list not confirmed");
        Ok(false)
    }

    /// One scroll-down. `true` when the list did not move: end of list.
    pub async fn scroll_down(&mut self) -> PilotResult<bool> {
        let unchanged = self.drag_down().await?;
        if !unchanged {
            self.depth += 1;
        }
        Ok(unchanged)
    }

    async fn drag_down(&self) -> PilotResult<bool> {
        scroll_and_compare(
            self.coordinator(),
            self.layout.check_area,
            self.layout.scroll_down,
            self.layout.settle(),
            self.layout.end_threshold,
        )
        .await
    }

    /// Scrolls to the top and replays the recorded depth.
    pub async fn restore_depth(&mut self) -> PilotResult<()> {
        let displaced = std::mem::take(&mut self.displaced);
        if self.depth == 0 && !displaced {
            return Ok(());
        }
        tracing::debug!(depth = self.depth, displaced, "restoring list position");
        self.scroll_to_top().await?;
        for _ in 0..self.depth {
            self.coordinator().drag(self.layout.scroll_down).await?;
            self.coordinator().poller().delay(self.layout.settle()).await?;
        }
        Ok(())
    }

    pub async fn take_control_snapshot(&mut self) -> PilotResult<()> {
        self.control = Some(self.coordinator().snapshot(self.layout.control_area).await?);
        Ok(())
    }

    pub async fn control_visible(&self) -> PilotResult<bool> {
        let Some(control) = &self.control else {
            return Ok(true);
        };
        let frame = self.nav.frame().await?;
        let band = self.layout.column(control.region(), &frame);
        let found = matcher::find_best(
            frame.image(),
            control.image(),
            Some(band),
            self.layout.control_threshold,
        )?;
        Ok(found.is_some())
    }

    /// Where `item` currently is, in frame coordinates.
    fn find_item(&self, frame: &Frame, item: &ListItem) -> PilotResult<Option<Match>> {
        let band = self.layout.column(item.snapshot.region(), frame);
        matcher::locate(
            frame.image(),
            item.snapshot.image(),
            Some(band),
            self.layout.identity_threshold,
        )
    }

    fn is_known(&self, frame: &Frame, region: Rect) -> PilotResult<bool> {
        for item in &self.items {
            if let Some(found) = self.find_item(frame, item)? {
                if found.rect.intersects(&region) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn buttons(&self, frame: &Frame) -> PilotResult<Vec<Match>> {
        let mut buttons = self.nav.identifier().locate_all(frame, self.button)?;
        buttons.sort_by_key(|m| (m.rect.y, m.rect.x));
        Ok(buttons)
    }

    /// Records every button row not matching a known item and returns the
    /// indices of the new items, top to bottom. Rows cut off by the frame
    /// edge are left for a later scroll.
    pub fn scan(&mut self, frame: &Frame) -> PilotResult<Vec<usize>> {
        let mut fresh = Vec::new();
        for button in self.buttons(frame)? {
            let Some(region) = self
                .layout
                .item_rect(button.rect)
                .filter(|r| frame.bounds().contains(r))
            else {
                tracing::debug!(y = button.rect.y, "row only partly visible");
                continue;
            };
            if self.is_known(frame, region)? {
                continue;
            }
            let index = self.items.len();
            self.items.push(ListItem {
                snapshot: frame.snapshot(region)?,
                status: FightStatus::NotFought,
                index,
                depth: self.depth,
            });
            fresh.push(index);
        }
        if !fresh.is_empty() {
            tracing::debug!(
                new = fresh.len(),
                known = self.items.len(),
                depth = self.depth,
                "list scanned"
            );
        }
        Ok(fresh)
    }

    fn button_for(&self, frame: &Frame, item_at: Rect) -> PilotResult<Option<Match>> {
        Ok(self.buttons(frame)?.into_iter().find(|b| {
            self.layout
                .item_rect(b.rect)
                .map_or(false, |r| r.intersects(&item_at))
        }))
    }

    /// Finds the button of item `index`, scrolling down a bounded number of
    /// times if the item is not on screen. These extra drags leave the
    /// recorded depth alone; the next `restore_depth` undoes them.
    pub async fn bring_into_view(&mut self, index: usize) -> PilotResult<Match> {
        let attempts = self.layout.max_reposition_attempts;
        for attempt in 0..=attempts {
            let frame = self.nav.frame().await?;
            if let Some(at) = self.find_item(&frame, &self.items[index])? {
                if let Some(button) = self.button_for(&frame, at.rect)? {
                    return Ok(button);
                }
            }
            drop(frame);
            if attempt == attempts {
                break;
            }
            tracing::debug!(item = index, attempt, "item not in view, scrolling");
            if self.drag_down().await? {
                break;
            }
            self.displaced = true;
        }
        Err(PilotError::ItemUnreachable { attempts })
    }

    /// Works through the whole list once.
    pub async fn run_cycle<A: ItemAction>(&mut self, action: &mut A) -> PilotResult<CycleReport> {
        let mut report = CycleReport::default();
        'restart: loop {
            self.reset();
            self.scroll_to_top().await?;
            self.take_control_snapshot().await?;

            loop {
                let frame = self.nav.frame().await?;
                let fresh = self.scan(&frame)?;
                drop(frame);

                for index in fresh {
                    let button = match self.bring_into_view(index).await {
                        Ok(button) => button,
                        Err(e @ PilotError::ItemUnreachable { .. }) => {
                            tracing::warn!(item = index, error = %e, "skipping item");
                            self.items[index].status = FightStatus::Lost;
                            report.unreachable += 1;
                            self.restore_depth().await?;
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    self.items[index].status = FightStatus::Fighting;
                    match action.act(self.nav, &self.items[index], button).await? {
                        ItemOutcome::Finished(status) => {
                            self.items[index].status = status;
                            report.record(status);
                        }
                        ItemOutcome::Skipped => {
                            self.items[index].status = FightStatus::NotFought;
                            report.skipped += 1;
                        }
                        ItemOutcome::Exhausted => {
                            self.items[index].status = FightStatus::NotFought;
                            report.depth = self.depth;
                            report.end = CycleEnd::Exhausted;
                            return Ok(report);
                        }
                    }

                    if !self.control_visible().await? {
                        tracing::warn!(depth = self.depth, "list was rebuilt, restarting cycle");
                        report.resets += 1;
                        continue 'restart;
                    }
                    self.restore_depth().await?;
                }

                if self.scroll_down().await? {
                    tracing::info!(depth = self.depth, items = self.items.len(), "end of list");
                    report.depth = self.depth;
                    report.end = CycleEnd::EndOfList;
                    return Ok(report);
                }
            }
        }
    }
}
