use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::errors::{PilotError, PilotResult};
use crate::executor::coordinator::Coordinator;
use crate::navigation::graph::{Screen, ScreenGraph, ScreenId, Transition, UiElement};
use crate::navigation::identifier::ScreenIdentifier;
use crate::perception::types::{Frame, Match, Point};
use crate::scenario_engine::poller::{PollSpec, Poller};

#[derive(Debug, Clone)]
pub struct NavigatorSettings {
    /// Wait for a hop's target screen after clicking its trigger.
    pub hop_wait: PollSpec,
    /// Wait for an element to show up before clicking it.
    pub element_wait: PollSpec,
    /// Click-and-wait repetitions before a timeout is surfaced.
    pub action_retries: u32,
    /// Generic pop-up close button, swept before identification and hops.
    pub popup_close: Option<UiElement>,
    pub max_popup_sweeps: u32,
}

impl Default for NavigatorSettings {
    fn default() -> Self {
        Self {
            hop_wait: PollSpec::millis(10, 500),
            element_wait: PollSpec::millis(10, 500),
            action_retries: 3,
            popup_close: None,
            max_popup_sweeps: 5,
        }
    }
}

/// What a [`ScreenHandler`] wants after handling a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenFlow {
    Continue,
    /// Continue and restart the deadline.
    ContinueFresh,
    Stop,
}

/// Callback for [`Navigator::process_screens`].
#[async_trait]
pub trait ScreenHandler: Send {
    async fn on_screen(&mut self, nav: &Navigator, screen: &Screen) -> PilotResult<ScreenFlow>;
}

/// Moves through the screen graph and interacts with on-screen elements.
pub struct Navigator {
    coordinator: Arc<Coordinator>,
    identifier: Arc<ScreenIdentifier>,
    settings: NavigatorSettings,
}

impl Navigator {
    pub fn new(
        coordinator: Arc<Coordinator>,
        identifier: Arc<ScreenIdentifier>,
        settings: NavigatorSettings,
    ) -> Self {
        Self {
            coordinator,
            identifier,
            settings,
        }
    }

    pub fn graph(&self) -> &ScreenGraph {
        self.identifier.graph()
    }

    pub fn identifier(&self) -> &ScreenIdentifier {
        &self.identifier
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn poller(&self) -> &Poller {
        self.coordinator.poller()
    }

    pub fn settings(&self) -> &NavigatorSettings {
        &self.settings
    }

    pub async fn frame(&self) -> PilotResult<Frame> {
        self.coordinator.frame().await
    }

    // ── Graph navigation ───────────────────────────────────────────────────

    /// The screen currently displayed, after closing stray pop-ups.
    pub async fn current_screen(&self) -> PilotResult<Option<&Screen>> {
        self.close_popups().await?;
        let frame = self.frame().await?;
        self.identifier.identify(&frame, None)
    }

    /// Walks the shortest path to `target`, verifying every hop.
    pub async fn go_to(&self, target: ScreenId) -> PilotResult<&Screen> {
        let target_screen = self.graph().require(target)?;
        let current = self
            .current_screen()
            .await?
            .ok_or(PilotError::CurrentScreenUnknown)?;

        if current.id == target {
            tracing::debug!(screen = %target, "already on target screen");
            return Ok(target_screen);
        }

        let path = self
            .graph()
            .find_path(current.id, target)
            .ok_or(PilotError::NoPath {
                from: current.id,
                to: target,
            })?;
        let route: Vec<String> = path.iter().map(|t| t.target.to_string()).collect();
        tracing::info!(from = %current.id, to = %target, route = %route.join(" -> "), "path found");

        let mut from = current.id;
        for (hop, transition) in path.into_iter().enumerate() {
            let started = Instant::now();
            let outcome = match self.close_popups().await {
                Ok(_) => self.traverse(transition).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                // Only a trigger or target that never showed up fails the hop.
                if !e.is_timeout() {
                    return Err(e);
                }
                return Err(PilotError::HopFailed {
                    hop,
                    from,
                    to: transition.target,
                    trigger: transition.trigger.name.clone(),
                    elapsed: started.elapsed(),
                    reason: e.to_string(),
                });
            }
            tracing::debug!(hop, from = %from, to = %transition.target, "hop done");
            from = transition.target;
        }

        Ok(target_screen)
    }

    async fn traverse(&self, transition: &Transition) -> PilotResult<()> {
        let trigger = &transition.trigger;
        if trigger.has_template() {
            let found = self
                .wait_for(trigger, self.settings.element_wait, transition.horizontal_search)
                .await?;
            self.coordinator.click(found.rect.center()).await?;
        } else if let Some(key) = &trigger.key {
            self.coordinator.key_press(key).await?;
        } else {
            return Err(PilotError::InvalidInput(format!(
                "trigger '{}' has neither template nor key",
                trigger.name
            )));
        }

        let target = transition.target;
        let what = format!("screen {target}");
        self.poller()
            .poll(&what, self.settings.hop_wait, move |is_final| async move {
                let visible = self.is_screen_visible(target).await?;
                if is_final && !visible {
                    tracing::warn!(screen = %target, "hop target still not visible");
                }
                Ok(visible)
            })
            .await
    }

    /// Clicks the pop-up close element until it disappears. Returns how many
    /// pop-ups were closed.
    pub async fn close_popups(&self) -> PilotResult<u32> {
        let Some(close) = &self.settings.popup_close else {
            return Ok(0);
        };
        let mut closed = 0;
        while closed < self.settings.max_popup_sweeps {
            let frame = self.frame().await?;
            let Some(found) = self.identifier.locate(&frame, close)? else {
                return Ok(closed);
            };
            tracing::warn!(element = %close.name, "closing pop-up");
            self.coordinator.click(found.rect.center()).await?;
            closed += 1;
        }
        tracing::warn!(sweeps = closed, "pop-up sweep cap reached");
        Ok(closed)
    }

    // ── Element helpers ────────────────────────────────────────────────────

    pub async fn is_element_visible(&self, element: &UiElement) -> PilotResult<bool> {
        let frame = self.frame().await?;
        self.identifier.is_visible(&frame, element)
    }

    pub async fn is_screen_visible(&self, id: ScreenId) -> PilotResult<bool> {
        let frame = self.frame().await?;
        self.identifier.is_screen_visible(&frame, id)
    }

    /// Waits until `element` is visible and returns where it is.
    pub async fn wait_for_element(
        &self,
        element: &UiElement,
        spec: PollSpec,
    ) -> PilotResult<Match> {
        self.wait_for(element, spec, false).await
    }

    async fn wait_for(
        &self,
        element: &UiElement,
        spec: PollSpec,
        horizontal: bool,
    ) -> PilotResult<Match> {
        let what = format!("element '{}'", element.name);
        self.poller()
            .poll_until(&what, spec, move |is_final| async move {
                let frame = self.frame().await?;
                let found = if horizontal {
                    self.identifier.locate_horizontal(&frame, element)?
                } else {
                    self.identifier.locate(&frame, element)?
                };
                if is_final && found.is_none() {
                    tracing::warn!(element = %element.name, "element never appeared");
                }
                Ok(found)
            })
            .await
    }

    /// Waits for the first of `candidates` to be displayed.
    pub async fn wait_for_screens(
        &self,
        candidates: &[ScreenId],
        spec: PollSpec,
    ) -> PilotResult<&Screen> {
        let what = format!("one of {candidates:?}");
        self.poller()
            .poll_until(&what, spec, move |_| async move {
                let frame = self.frame().await?;
                self.identifier.identify(&frame, Some(candidates))
            })
            .await
    }

    pub async fn click_at(&self, at: Point) -> PilotResult<()> {
        self.coordinator.click(at).await
    }

    /// Clicks an element once it is visible, or presses its key when it has
    /// no template.
    pub async fn click_element(&self, element: &UiElement) -> PilotResult<()> {
        if element.has_template() {
            let found = self.wait_for_element(element, self.settings.element_wait).await?;
            tracing::debug!(
                element = %element.name,
                x = found.rect.x,
                y = found.rect.y,
                "clicking element"
            );
            self.coordinator.click(found.rect.center()).await
        } else if let Some(key) = &element.key {
            self.coordinator.key_press(key).await
        } else {
            Err(PilotError::InvalidInput(format!(
                "element '{}' has neither template nor key",
                element.name
            )))
        }
    }

    /// Clicks `element`, then waits for `condition`. A timed-out wait repeats
    /// the click, up to the configured number of retries.
    pub async fn click_and_wait<F, Fut>(
        &self,
        element: &UiElement,
        what: &str,
        spec: PollSpec,
        mut condition: F,
    ) -> PilotResult<()>
    where
        F: FnMut(bool) -> Fut,
        Fut: Future<Output = PilotResult<bool>>,
    {
        let retries = self.settings.action_retries.max(1);
        let mut last = None;
        for attempt in 1..=retries {
            self.click_element(element).await?;
            match self.poller().poll(what, spec, &mut condition).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_timeout() => {
                    tracing::warn!(
                        element = %element.name,
                        attempt,
                        retries,
                        "no reaction to click, retrying"
                    );
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| PilotError::TimedOut {
            what: what.to_string(),
            attempts: 0,
            elapsed: Duration::ZERO,
        }))
    }

    /// Identifies frames among `candidates` and hands each recognized screen
    /// to `handler` until it says stop. Fails with `TimedOut` once `deadline`
    /// passes without a stop. Returns the screen the handler stopped on.
    pub async fn process_screens<H: ScreenHandler>(
        &self,
        candidates: &[ScreenId],
        handler: &mut H,
        deadline: Duration,
        interval: Duration,
    ) -> PilotResult<ScreenId> {
        let started = Instant::now();
        let mut window_start = started;
        let mut rounds = 0u32;
        loop {
            self.poller().check()?;
            if window_start.elapsed() >= deadline {
                return Err(PilotError::TimedOut {
                    what: format!("screens {candidates:?}"),
                    attempts: rounds,
                    elapsed: started.elapsed(),
                });
            }
            rounds += 1;

            let frame = self.frame().await?;
            if let Some(screen) = self.identifier.identify(&frame, Some(candidates))? {
                drop(frame);
                match handler.on_screen(self, screen).await? {
                    ScreenFlow::Continue => {}
                    ScreenFlow::ContinueFresh => window_start = Instant::now(),
                    ScreenFlow::Stop => return Ok(screen.id),
                }
            }
            self.poller().delay(interval).await?;
        }
    }
}
